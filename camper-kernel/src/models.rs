/**
 * MODÈLES - Payloads modules, schémas de statut par domaine et événements normalisés
 *
 * RÔLE :
 * Chaque payload JSON publié par un module est décodé dans un schéma typé par domaine.
 * Les champs inconnus ne sont pas perdus : ils atterrissent dans `extra` et ressortent
 * tels quels vers les dashboards (dérive firmware visible, pas de spread aveugle).
 */

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

pub type DeviceId = String;

/// Bag typé pour les attributs que le schéma ne connaît pas (encore)
pub type Extra = Map<String, Value>;

/// Sentinelle firmware : pas de lien WiFi
pub const RSSI_NO_LINK: i32 = -999;

// Heartbeat publié sur {ns}/heartbeat/{deviceId}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatIn {
    #[serde(rename = "deviceId", alias = "moduleId", default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(rename = "wifiRSSI", default)]
    pub wifi_rssi: Option<i32>,
    #[serde(rename = "resetReason", default)]
    pub reset_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl HeartbeatIn {
    /// Décodage champ par champ : un champ connu au mauvais type est écarté (et signalé)
    /// sans invalider le reste du heartbeat. Retourne aussi les noms des champs écartés.
    pub fn from_object(mut body: Map<String, Value>) -> (Self, Vec<&'static str>) {
        let mut ignored = Vec::new();
        let heartbeat = Self {
            device_id: take_field(&mut body, &["deviceId", "moduleId"], &mut ignored),
            uptime: take_field(&mut body, &["uptime"], &mut ignored),
            wifi_rssi: take_field(&mut body, &["wifiRSSI"], &mut ignored),
            reset_reason: take_field(&mut body, &["resetReason"], &mut ignored),
            extra: body,
        };
        (heartbeat, ignored)
    }
}

/// Retire toutes les clés, garde la première valeur non nulle qui se décode
fn take_field<T: DeserializeOwned>(
    body: &mut Map<String, Value>,
    keys: &[&'static str],
    ignored: &mut Vec<&'static str>,
) -> Option<T> {
    let mut found = None;
    for key in keys {
        let Some(raw) = body.remove(*key) else { continue };
        if raw.is_null() || found.is_some() {
            continue;
        }
        match serde_json::from_value(raw) {
            Ok(value) => found = Some(value),
            Err(_) => ignored.push(*key),
        }
    }
    found
}

/// Domaines pilotables depuis un dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    LightingStrip,
    LightingRelay,
    ClimateCircle,
    AirflowDamper,
    LiftTable,
    Leveling,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::LightingStrip => "lighting-strip",
            Domain::LightingRelay => "lighting-relay",
            Domain::ClimateCircle => "climate-circle",
            Domain::AirflowDamper => "airflow-damper",
            Domain::LiftTable => "lift-table",
            Domain::Leveling => "leveling",
        }
    }

    /// Type de composant tel qu'il apparaît dans les topics firmware
    pub fn component_segment(&self) -> &'static str {
        match self {
            Domain::LightingStrip => "strip",
            Domain::LightingRelay => "relay",
            Domain::ClimateCircle => "circle",
            Domain::AirflowDamper => "damper",
            Domain::LiftTable => "table",
            Domain::Leveling => "leveling",
        }
    }

    pub fn from_component_segment(segment: &str) -> Option<Self> {
        match segment {
            "strip" => Some(Domain::LightingStrip),
            "relay" => Some(Domain::LightingRelay),
            "circle" => Some(Domain::ClimateCircle),
            "damper" => Some(Domain::AirflowDamper),
            "table" => Some(Domain::LiftTable),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl SwitchState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ON" | "on" => Some(SwitchState::On),
            "OFF" | "off" => Some(SwitchState::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StripMode {
    Off,
    On,
    Auto,
}

impl StripMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OFF" => Some(StripMode::Off),
            "ON" => Some(StripMode::On),
            "AUTO" => Some(StripMode::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircleMode {
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "TEMP_CONTROL")]
    TempControl,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StripStatus {
    #[serde(default)]
    pub state: Option<SwitchState>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub mode: Option<StripMode>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStatus {
    #[serde(default)]
    pub state: Option<SwitchState>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircleStatus {
    #[serde(default)]
    pub mode: Option<CircleMode>,
    #[serde(default)]
    pub relay: Option<SwitchState>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamperStatus {
    pub angle: u16,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatus {
    pub direction: String, // "up" | "down" | "stopped"
    #[serde(rename = "autoMoving", default)]
    pub auto_moving: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Snapshot complet du module éclairage : {strips: {"0": ..}, relays: {"0": ..}}
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightingSnapshot {
    #[serde(default)]
    pub strips: BTreeMap<String, StripStatus>,
    #[serde(default)]
    pub relays: BTreeMap<String, RelayStatus>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Snapshot complet du chauffage au sol : {circles: {"0": ..}}
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClimateSnapshot {
    #[serde(default)]
    pub circles: BTreeMap<String, CircleStatus>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Champs de statut, un schéma par forme de payload connue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatusFields {
    Strip(StripStatus),
    Relay(RelayStatus),
    Circle(CircleStatus),
    Damper(DamperStatus),
    Table(TableStatus),
    LightingSnapshot(LightingSnapshot),
    ClimateSnapshot(ClimateSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    IndoorTemperature,
    IndoorHumidity,
    OutdoorTemperature,
    GrayWaterLevel,
    GrayWaterTemperature,
    Leveling,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Scalar(f64),
    Tilt { pitch: f64, roll: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        signal_bucket: u8,
    },
    SensorReading {
        metric: Metric,
        value: SensorValue,
    },
    #[serde(rename_all = "camelCase")]
    ComponentStatus {
        domain: Domain,
        component_index: Option<u8>,
        fields: StatusFields,
    },
    #[serde(rename_all = "camelCase")]
    ComponentError {
        domain: Domain,
        component_index: u8,
        detail: Value,
    },
}

/// Événement normalisé produit par le dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub device_id: Option<DeviceId>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(device_id: Option<&str>, kind: EventKind) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            timestamp: OffsetDateTime::now_utc(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_keeps_valid_fields_when_one_is_mistyped() {
        let body = json!({
            "moduleId": "module-1",
            "uptime": "12",
            "wifiRSSI": -55,
            "freeHeap": 40960
        });
        let Value::Object(body) = body else { unreachable!() };
        let (hb, ignored) = HeartbeatIn::from_object(body);
        assert_eq!(hb.device_id.as_deref(), Some("module-1"));
        assert_eq!(hb.uptime, None);
        assert_eq!(hb.wifi_rssi, Some(-55));
        assert_eq!(hb.extra["freeHeap"], 40960);
        assert!(!hb.extra.contains_key("uptime"));
        assert_eq!(ignored, vec!["uptime"]);

        let Value::Object(body) = json!({"deviceId": null, "moduleId": "module-3", "resetReason": 7}) else {
            unreachable!()
        };
        let (hb, ignored) = HeartbeatIn::from_object(body);
        assert_eq!(hb.device_id.as_deref(), Some("module-3"));
        assert_eq!(hb.reset_reason, None);
        assert_eq!(ignored, vec!["resetReason"]);
    }

    #[test]
    fn test_heartbeat_accepts_firmware_field_names() {
        let hb: HeartbeatIn = serde_json::from_value(json!({
            "moduleId": "module-4",
            "timestamp": 120,
            "uptime": 120,
            "wifiRSSI": -61,
            "resetReason": "POWERON"
        }))
        .unwrap();
        assert_eq!(hb.device_id.as_deref(), Some("module-4"));
        assert_eq!(hb.wifi_rssi, Some(-61));
        assert_eq!(hb.reset_reason.as_deref(), Some("POWERON"));
        assert_eq!(hb.extra.get("timestamp"), Some(&json!(120)));

        let hb: HeartbeatIn = serde_json::from_value(json!({"deviceId": "module-1"})).unwrap();
        assert_eq!(hb.device_id.as_deref(), Some("module-1"));
        assert_eq!(hb.uptime, None);
    }

    #[test]
    fn test_circle_status_round_trip_preserves_device_fields() {
        let original = json!({
            "mode": "TEMP_CONTROL",
            "relay": "ON",
            "temperature": 22.0,
            "error": false,
            "hysteresis": 0.5,
            "sensor": {"id": "28-01"}
        });
        let decoded: CircleStatus = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(decoded.mode, Some(CircleMode::TempControl));
        assert_eq!(decoded.extra.len(), 2);

        let fields = StatusFields::Circle(decoded);
        let encoded = serde_json::to_value(&fields).unwrap();
        for (key, value) in original.as_object().unwrap() {
            assert_eq!(encoded.get(key), Some(value), "field {key} lost");
        }
        let back: StatusFields = serde_json::from_value(encoded).unwrap();
        assert_eq!(back, fields);
    }

    #[test]
    fn test_lighting_snapshot_round_trip() {
        let original = json!({
            "strips": {
                "0": {"state": "ON", "brightness": 200, "mode": "AUTO"},
                "3": {"state": "OFF", "brightness": 0, "mode": null, "motion": true}
            },
            "relays": {"0": {"state": "OFF"}},
            "firmware": "2.1.0"
        });
        let snapshot: LightingSnapshot = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(snapshot.strips["0"].mode, Some(StripMode::Auto));
        assert_eq!(snapshot.strips["3"].extra.get("motion"), Some(&json!(true)));

        let encoded = serde_json::to_value(StatusFields::LightingSnapshot(snapshot)).unwrap();
        assert_eq!(encoded["type"], "lighting-snapshot");
        assert_eq!(encoded["firmware"], "2.1.0");
        assert_eq!(encoded["strips"], original["strips"]);
        assert_eq!(encoded["relays"], original["relays"]);
    }

    #[test]
    fn test_event_serializes_flat_with_kind_tag() {
        let event = Event::new(
            Some("module-4"),
            EventKind::ComponentError {
                domain: Domain::AirflowDamper,
                component_index: 2,
                detail: json!({"code": "STALL"}),
            },
        );
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["kind"], "componentError");
        assert_eq!(v["deviceId"], "module-4");
        assert_eq!(v["domain"], "airflow-damper");
        assert_eq!(v["componentIndex"], 2);
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn test_domain_component_segments() {
        for domain in [
            Domain::LightingStrip,
            Domain::LightingRelay,
            Domain::ClimateCircle,
            Domain::AirflowDamper,
            Domain::LiftTable,
        ] {
            assert_eq!(Domain::from_component_segment(domain.component_segment()), Some(domain));
        }
        assert_eq!(Domain::from_component_segment("leveling"), None);
    }
}
