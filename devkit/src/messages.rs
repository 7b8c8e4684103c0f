/*!
Construction de messages au format firmware des modules ESP32

Topics et payloads tels que publiés par les modules (heartbeat, capteurs, statuts,
erreurs) et messages de session tels qu'envoyés par le dashboard.
*/

use crate::mqtt_stub::MockMessage;
use serde_json::{json, Value};

pub struct DeviceMessageBuilder {
    namespace: String,
}

impl Default for DeviceMessageBuilder {
    fn default() -> Self {
        Self::new("smartcamper")
    }
}

impl DeviceMessageBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn topic(&self, path: &str) -> String {
        format!("{}/{}", self.namespace, path)
    }

    /// Heartbeat firmware : {moduleId, uptime, wifiRSSI}
    pub fn heartbeat(&self, device: &str, rssi: Option<i32>) -> MockMessage {
        let mut payload = json!({"moduleId": device, "uptime": 60});
        if let Some(rssi) = rssi {
            payload["wifiRSSI"] = json!(rssi);
        }
        MockMessage::json(self.topic(&format!("heartbeat/{device}")), &payload)
    }

    /// Premier heartbeat après redémarrage
    pub fn boot_heartbeat(&self, device: &str, rssi: i32, reset_reason: &str) -> MockMessage {
        let payload = json!({"moduleId": device, "uptime": 0, "wifiRSSI": rssi, "resetReason": reset_reason});
        MockMessage::json(self.topic(&format!("heartbeat/{device}")), &payload)
    }

    /// Capteur scalaire en texte : sensors/{path}
    pub fn scalar(&self, path: &str, value: &str) -> MockMessage {
        MockMessage::new(self.topic(&format!("sensors/{path}")), value)
    }

    pub fn leveling(&self, device: &str, pitch: f64, roll: f64) -> MockMessage {
        MockMessage::json(
            self.topic(&format!("sensors/{device}/leveling")),
            &json!({"pitch": pitch, "roll": roll}),
        )
    }

    /// Snapshot éclairage ; strips = (index, state, brightness)
    pub fn lighting_status(&self, device: &str, strips: &[(u8, &str, u8)], relay_on: bool) -> MockMessage {
        let strips: serde_json::Map<String, Value> = strips
            .iter()
            .map(|(i, state, brightness)| (i.to_string(), json!({"state": state, "brightness": brightness})))
            .collect();
        let relay = if relay_on { "ON" } else { "OFF" };
        MockMessage::json(
            self.topic(&format!("sensors/{device}/status")),
            &json!({"strips": strips, "relays": {"0": {"state": relay}}}),
        )
    }

    pub fn circle_status(&self, device: &str, index: u8, mode: &str, relay: &str, temperature: f64) -> MockMessage {
        MockMessage::json(
            self.topic(&format!("sensors/{device}/status")),
            &json!({
                "type": "circle",
                "index": index,
                "mode": mode,
                "relay": relay,
                "temperature": temperature,
                "error": false
            }),
        )
    }

    pub fn damper_angle(&self, device: &str, index: u8, angle: u16) -> MockMessage {
        MockMessage::json(
            self.topic(&format!("sensors/{device}/damper/{index}/angle")),
            &json!({"angle": angle}),
        )
    }

    pub fn table_direction(&self, device: &str, direction: &str, auto_moving: bool) -> MockMessage {
        MockMessage::json(
            self.topic(&format!("sensors/{device}/table/direction")),
            &json!({"direction": direction, "autoMoving": auto_moving}),
        )
    }

    pub fn component_error(&self, device: &str, component: &str, id: u8, detail: Value) -> MockMessage {
        MockMessage::json(self.topic(&format!("errors/{device}/{component}/{id}")), &detail)
    }

    /// Message de session dashboard : {event, data}
    pub fn session_intent(event: &str, data: Value) -> String {
        json!({"event": event, "data": data}).to_string()
    }
}
