/**
 * PASSERELLE SESSIONS - Fan-out des événements vers les dashboards connectés
 *
 * RÔLE :
 * Table des sessions ouvertes, une file bornée par session. Une session lente ou morte
 * est retirée au lieu de freiner les autres ou le pipeline MQTT.
 *
 * FONCTIONNEMENT :
 * - connect : snapshot de présence envoyé à la nouvelle session seulement
 * - broadcast : try_send sur chaque file, Full ou Closed => session retirée
 * - disconnect : retrait de la table, aucun effet sur le registre
 * - Catalogue d'événements : noms historiques attendus par le dashboard
 */

use crate::error::IntentError;
use crate::models::{Domain, Event, EventKind, Metric, SensorValue, StatusFields};
use crate::registry::PresenceSnapshot;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Trame envoyée à une session : {event, data}
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionFrame {
    pub event: String,
    pub data: Value,
}

impl SessionFrame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    pub fn presence(snapshot: &PresenceSnapshot) -> Self {
        Self::new(
            "moduleStatusUpdate",
            json!({ "modules": snapshot, "timestamp": now_rfc3339() }),
        )
    }

    pub fn rejected(intent: &str, reason: &IntentError) -> Self {
        Self::new(
            "commandRejected",
            json!({ "intent": intent, "reason": reason.to_string() }),
        )
    }

    /// None pour les heartbeats : la présence passe par les notifications du registre
    pub fn from_event(event: &Event) -> Option<Self> {
        let timestamp = event.timestamp.format(&Rfc3339).unwrap_or_default();
        let (name, mut data) = match &event.kind {
            EventKind::Heartbeat { .. } => return None,
            EventKind::SensorReading {
                metric: Metric::Leveling,
                value: SensorValue::Tilt { pitch, roll },
            } => ("levelingData", json!({ "pitch": pitch, "roll": roll })),
            EventKind::SensorReading { metric, value } => {
                let key = serde_json::to_value(metric).ok()?;
                let mut body = serde_json::Map::new();
                body.insert(key.as_str()?.to_string(), json!(value));
                ("sensorUpdate", Value::Object(body))
            }
            EventKind::ComponentStatus {
                domain,
                component_index,
                fields,
            } => {
                let body = serde_json::to_value(fields).ok()?;
                let data = match fields {
                    StatusFields::LightingSnapshot(_) | StatusFields::ClimateSnapshot(_) => {
                        let mut body = body;
                        if let Some(map) = body.as_object_mut() {
                            map.remove("type");
                        }
                        json!({ "type": "full", "data": body })
                    }
                    _ => {
                        let mut body = body;
                        if let (Some(map), Some(i)) = (body.as_object_mut(), component_index) {
                            map.insert("index".into(), json!(i));
                        }
                        body
                    }
                };
                (domain_event(*domain), data)
            }
            EventKind::ComponentError {
                domain,
                component_index,
                detail,
            } => (
                domain_event(*domain),
                json!({
                    "type": "error",
                    "component": domain.component_segment(),
                    "index": component_index,
                    "error": detail,
                }),
            ),
        };

        if let Some(map) = data.as_object_mut() {
            if let Some(device) = &event.device_id {
                map.insert("deviceId".into(), json!(device));
            }
            map.insert("timestamp".into(), json!(timestamp));
        }
        Some(Self::new(name, data))
    }
}

/// Un nom d'événement par domaine, statuts et erreurs confondus
pub fn domain_event(domain: Domain) -> &'static str {
    match domain {
        Domain::LightingStrip | Domain::LightingRelay => "ledStatusUpdate",
        Domain::ClimateCircle => "floorHeatingStatusUpdate",
        Domain::AirflowDamper => "damperStatusUpdate",
        Domain::LiftTable => "tableStatusUpdate",
        Domain::Leveling => "levelingData",
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[derive(Clone)]
pub struct SessionGateway {
    sessions: Arc<Mutex<HashMap<SessionId, mpsc::Sender<SessionFrame>>>>,
    buffer: usize,
}

impl SessionGateway {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Ouvre une session ; la première trame reçue est le snapshot de présence
    pub fn connect(&self, snapshot: &PresenceSnapshot) -> (SessionId, mpsc::Receiver<SessionFrame>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        // file neuve, au moins une place
        let _ = tx.try_send(SessionFrame::presence(snapshot));
        let count = {
            let mut sessions = self.sessions.lock();
            sessions.insert(id, tx);
            sessions.len()
        };
        info!(session = %id, sessions = count, "session connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id).is_some();
        if removed {
            info!(session = %id, "session disconnected");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn broadcast_event(&self, event: &Event) -> usize {
        match SessionFrame::from_event(event) {
            Some(frame) => self.broadcast(&frame),
            None => 0,
        }
    }

    /// Retourne le nombre de sessions servies
    pub fn broadcast(&self, frame: &SessionFrame) -> usize {
        let mut sessions = self.sessions.lock();
        let mut stale = Vec::new();
        for (id, tx) in sessions.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(session = %id, event = %frame.event, "session too slow, dropping it");
                    stale.push(*id);
                }
                Err(TrySendError::Closed(_)) => stale.push(*id),
            }
        }
        for id in &stale {
            sessions.remove(id);
        }
        debug!(event = %frame.event, delivered = sessions.len(), dropped = stale.len(), "broadcast");
        sessions.len()
    }

    /// Envoi à une seule session (réponse à une intention)
    pub fn send_to(&self, id: SessionId, frame: SessionFrame) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(tx) = sessions.get(&id) else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                if matches!(e, TrySendError::Full(_)) {
                    warn!(session = %id, "session too slow, dropping it");
                }
                sessions.remove(&id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DamperStatus, Extra, LightingSnapshot};

    #[tokio::test]
    async fn test_connect_pushes_snapshot_first() {
        let gateway = SessionGateway::new(8);
        let (_, mut rx) = gateway.connect(&PresenceSnapshot::new());
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "moduleStatusUpdate");
        assert!(frame.data["modules"].as_object().unwrap().is_empty());
        assert_eq!(gateway.session_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_session_is_dropped_without_blocking_others() {
        let gateway = SessionGateway::new(2);
        let (slow, _slow_rx) = gateway.connect(&PresenceSnapshot::new());
        let (_, mut fast_rx) = gateway.connect(&PresenceSnapshot::new());
        fast_rx.recv().await.unwrap();

        let frame = SessionFrame::new("sensorUpdate", json!({"indoorTemperature": 20.0}));
        assert_eq!(gateway.broadcast(&frame), 2);
        fast_rx.recv().await.unwrap();
        // la session lente a encore le snapshot + 1 trame en file : pleine
        assert_eq!(gateway.broadcast(&frame), 1);
        assert!(!gateway.send_to(slow, frame.clone()));
        assert_eq!(gateway.session_count(), 1);
        assert_eq!(fast_rx.recv().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_closed_session_is_pruned() {
        let gateway = SessionGateway::new(4);
        let (_, rx) = gateway.connect(&PresenceSnapshot::new());
        drop(rx);
        assert_eq!(gateway.broadcast(&SessionFrame::new("x", json!({}))), 0);
        assert_eq!(gateway.session_count(), 0);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let gateway = SessionGateway::new(4);
        let (id, _rx) = gateway.connect(&PresenceSnapshot::new());
        assert!(gateway.disconnect(id));
        assert!(!gateway.disconnect(id));
    }

    #[test]
    fn test_event_catalog_names() {
        let reading = Event::new(
            None,
            EventKind::SensorReading {
                metric: Metric::GrayWaterLevel,
                value: SensorValue::Scalar(40.0),
            },
        );
        let frame = SessionFrame::from_event(&reading).unwrap();
        assert_eq!(frame.event, "sensorUpdate");
        assert_eq!(frame.data["grayWaterLevel"], 40.0);

        let damper = Event::new(
            Some("module-4"),
            EventKind::ComponentStatus {
                domain: Domain::AirflowDamper,
                component_index: Some(1),
                fields: StatusFields::Damper(DamperStatus { angle: 90, extra: Extra::new() }),
            },
        );
        let frame = SessionFrame::from_event(&damper).unwrap();
        assert_eq!(frame.event, "damperStatusUpdate");
        assert_eq!(frame.data["type"], "damper");
        assert_eq!(frame.data["index"], 1);
        assert_eq!(frame.data["angle"], 90);
        assert_eq!(frame.data["deviceId"], "module-4");

        let lighting = Event::new(
            Some("module-2"),
            EventKind::ComponentStatus {
                domain: Domain::LightingStrip,
                component_index: None,
                fields: StatusFields::LightingSnapshot(LightingSnapshot::default()),
            },
        );
        let frame = SessionFrame::from_event(&lighting).unwrap();
        assert_eq!(frame.event, "ledStatusUpdate");
        assert_eq!(frame.data["type"], "full");
        assert!(frame.data["data"]["strips"].is_object());

        let error = Event::new(
            Some("module-3"),
            EventKind::ComponentError {
                domain: Domain::ClimateCircle,
                component_index: 2,
                detail: json!({"code": "OPEN_CIRCUIT"}),
            },
        );
        let frame = SessionFrame::from_event(&error).unwrap();
        assert_eq!(frame.event, "floorHeatingStatusUpdate");
        assert_eq!(frame.data["type"], "error");
        assert_eq!(frame.data["index"], 2);

        let heartbeat = Event::new(Some("module-1"), EventKind::Heartbeat { signal_bucket: 3 });
        assert!(SessionFrame::from_event(&heartbeat).is_none());
    }
}
