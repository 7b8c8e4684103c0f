/**
 * DISPATCHER - Classification des messages MQTT entrants en événements normalisés
 *
 * RÔLE :
 * Un (topic, payload) produit au plus un Event. Les matchers sont essayés dans un ordre
 * total (heartbeat d'abord), le premier qui reconnaît la forme du topic le consomme.
 *
 * FONCTIONNEMENT :
 * - Le topic est découpé en namespace / catégorie / device / sous-chemin
 * - Les anciens noms de modules sont ramenés à l'id canonique avant le matching
 * - Un matcher qui reconnaît le topic mais rejette le payload => message "handled", pas d'Event
 * - Topic inconnu => "unhandled", tracé uniquement avec debug_mqtt
 */

mod matchers;

pub use matchers::{
    ClimateMatcher, DamperMatcher, ErrorMatcher, HeartbeatMatcher, LevelingMatcher, LightingMatcher,
    ScalarMetricMatcher, TableMatcher,
};

use crate::config::KernelConfig;
use crate::error::DispatchError;
use crate::models::Event;
use crate::registry::LivenessRegistry;
use tracing::{debug, warn};

/// Topic découpé, device déjà normalisé
#[derive(Debug, Clone)]
pub struct TopicPath<'a> {
    pub topic: &'a str,
    pub category: &'a str,
    /// Segments après la catégorie, tels que reçus
    pub segments: Vec<&'a str>,
    /// Premier segment après la catégorie, alias résolu
    pub device: Option<String>,
}

impl<'a> TopicPath<'a> {
    pub fn parse(topic: &'a str, namespace: &str, canonical: impl Fn(&str) -> String) -> Option<Self> {
        let mut parts = topic.split('/');
        if parts.next()? != namespace {
            return None;
        }
        let category = parts.next()?;
        let segments: Vec<&str> = parts.collect();
        let device = segments.first().map(|d| canonical(d));
        Some(Self {
            topic,
            category,
            segments,
            device,
        })
    }

    /// Segments après le device
    pub fn tail(&self) -> &[&'a str] {
        self.segments.get(1..).unwrap_or(&[])
    }

    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or_default()
    }
}

/// Une forme de topic connue (nom historique compris) pour un domaine
pub trait TopicMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reconnaissance sur la seule forme du topic, jamais sur le payload
    fn matches(&self, path: &TopicPath<'_>) -> bool;

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError>;
}

#[derive(Debug)]
pub enum Dispatch {
    Event(Event),
    /// Consommé mais rejeté (payload illisible, schéma, plage)
    Rejected(DispatchError),
    Unhandled,
}

pub struct Dispatcher {
    namespace: String,
    aliases: std::collections::HashMap<String, String>,
    matchers: Vec<Box<dyn TopicMatcher>>,
    debug_mqtt: bool,
}

impl Dispatcher {
    /// Ordre figé : heartbeat, erreurs, métriques scalaires, puis statuts par domaine
    pub fn new(cfg: &KernelConfig, registry: LivenessRegistry) -> Self {
        let devices = &cfg.devices;
        let matchers: Vec<Box<dyn TopicMatcher>> = vec![
            Box::new(HeartbeatMatcher::new(registry, devices.clone())),
            Box::new(ErrorMatcher),
            Box::new(ScalarMetricMatcher),
            Box::new(LightingMatcher::new(&devices.lighting)),
            Box::new(ClimateMatcher::new(&devices.climate)),
            Box::new(LevelingMatcher),
            Box::new(DamperMatcher::new(&devices.airflow)),
            Box::new(TableMatcher::new(&devices.lift)),
        ];
        Self {
            namespace: cfg.topics.namespace.clone(),
            aliases: devices.aliases.clone(),
            matchers,
            debug_mqtt: cfg.debug_mqtt,
        }
    }

    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Dispatch {
        if self.debug_mqtt {
            debug!(topic, payload = %String::from_utf8_lossy(payload), "mqtt in");
        }

        let Some(path) = self.parse(topic) else {
            return self.unhandled(topic);
        };
        let Some(matcher) = self.matchers.iter().find(|m| m.matches(&path)) else {
            return self.unhandled(topic);
        };

        match matcher.decode(&path, payload) {
            Ok(event) => Dispatch::Event(event),
            Err(e) => {
                warn!(
                    matcher = matcher.name(),
                    payload = %String::from_utf8_lossy(payload),
                    "{e}"
                );
                Dispatch::Rejected(e)
            }
        }
    }

    /// Noms des matchers qui reconnaissent ce topic (au plus un attendu)
    pub fn claimants(&self, topic: &str) -> Vec<&'static str> {
        self.parse(topic)
            .map(|path| {
                self.matchers
                    .iter()
                    .filter(|m| m.matches(&path))
                    .map(|m| m.name())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse<'a>(&self, topic: &'a str) -> Option<TopicPath<'a>> {
        TopicPath::parse(topic, &self.namespace, |device| {
            self.aliases
                .get(device)
                .cloned()
                .unwrap_or_else(|| device.to_string())
        })
    }

    fn unhandled(&self, topic: &str) -> Dispatch {
        if self.debug_mqtt {
            debug!(topic, "unhandled mqtt topic");
        }
        Dispatch::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Domain, EventKind, Metric, SensorValue, StatusFields};
    use std::time::Duration;

    fn dispatcher() -> (Dispatcher, LivenessRegistry) {
        let registry = LivenessRegistry::new(Duration::from_secs(20));
        (Dispatcher::new(&KernelConfig::default(), registry.clone()), registry)
    }

    const CORPUS: &[&str] = &[
        "smartcamper/heartbeat/module-1",
        "smartcamper/heartbeat/led-controller",
        "smartcamper/sensors/temperature",
        "smartcamper/sensors/indoor-temperature",
        "smartcamper/sensors/humidity",
        "smartcamper/sensors/indoor-humidity",
        "smartcamper/sensors/outdoor-temperature",
        "smartcamper/sensors/gray-water-temperature",
        "smartcamper/sensors/gray-water/level",
        "smartcamper/sensors/temperature/living/data",
        "smartcamper/sensors/humidity/living/data",
        "smartcamper/sensors/tilt/living/data",
        "smartcamper/sensors/module-1/indoor-temperature",
        "smartcamper/sensors/module-2/status",
        "smartcamper/sensors/led-controller/status",
        "smartcamper/sensors/led-controller/strip/3/state",
        "smartcamper/sensors/module-2/strip/0/brightness",
        "smartcamper/sensors/module-2/relay/state",
        "smartcamper/sensors/module-3/status",
        "smartcamper/sensors/module-3/leveling",
        "smartcamper/sensors/module-4/damper/2/angle",
        "smartcamper/sensors/module-4/table/direction",
        "smartcamper/sensors/module-4/status",
        "smartcamper/errors/module-3/circle/0",
        "smartcamper/errors/module-4/damper/1",
        "smartcamper/errors/module-4/valve/1",
        "smartcamper/commands/module-4/table/stop",
        "smartcamper/heartbeat/module-1/extra",
        "other/heartbeat/module-1",
        "smartcamper",
    ];

    #[test]
    fn test_matchers_are_mutually_exclusive() {
        let (dispatcher, _) = dispatcher();
        for topic in CORPUS {
            let claimants = dispatcher.claimants(topic);
            assert!(claimants.len() <= 1, "{topic} claimed by {claimants:?}");
        }
        assert!(dispatcher.claimants("smartcamper/commands/module-4/table/stop").is_empty());
        assert!(dispatcher.claimants("other/heartbeat/module-1").is_empty());
    }

    #[test]
    fn test_heartbeat_updates_registry() {
        let (dispatcher, registry) = dispatcher();
        let out = dispatcher.dispatch(
            "smartcamper/heartbeat/module-3",
            br#"{"deviceId":"module-3","uptime":12,"wifiRSSI":-55}"#,
        );
        match out {
            Dispatch::Event(event) => {
                assert_eq!(event.device_id.as_deref(), Some("module-3"));
                assert_eq!(event.kind, EventKind::Heartbeat { signal_bucket: 3 });
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.is_online("module-3"));
    }

    #[test]
    fn test_mistyped_heartbeat_field_does_not_drop_the_heartbeat() {
        let (dispatcher, registry) = dispatcher();
        let out = dispatcher.dispatch(
            "smartcamper/heartbeat/module-1",
            br#"{"moduleId":"module-1","uptime":"12","wifiRSSI":-55}"#,
        );
        match out {
            Dispatch::Event(event) => assert_eq!(event.kind, EventKind::Heartbeat { signal_bucket: 3 }),
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.is_online("module-1"));
        let record = registry.query("module-1").unwrap();
        assert_eq!(record.uptime_seconds, None);
        assert_eq!(record.signal_bucket, 3);

        let out = dispatcher.dispatch("smartcamper/heartbeat/module-2", b"[1, 2]");
        assert!(matches!(out, Dispatch::Rejected(DispatchError::SchemaMismatch { .. })));
        assert!(registry.query("module-2").is_none());
    }

    #[test]
    fn test_malformed_heartbeat_is_handled_and_dropped() {
        let (dispatcher, registry) = dispatcher();
        let out = dispatcher.dispatch("smartcamper/heartbeat/module-1", b"{not json");
        assert!(matches!(out, Dispatch::Rejected(DispatchError::MalformedPayload { .. })));
        assert!(registry.query("module-1").is_none());
    }

    #[test]
    fn test_gray_water_out_of_range_rejected() {
        let (dispatcher, _) = dispatcher();
        let out = dispatcher.dispatch("smartcamper/sensors/gray-water/level", b"150");
        assert!(matches!(out, Dispatch::Rejected(DispatchError::OutOfRange { .. })));

        let out = dispatcher.dispatch("smartcamper/sensors/gray-water/level", b"42.5");
        match out {
            Dispatch::Event(event) => assert_eq!(
                event.kind,
                EventKind::SensorReading {
                    metric: Metric::GrayWaterLevel,
                    value: SensorValue::Scalar(42.5)
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_legacy_spellings_normalize_to_one_event_shape() {
        let (dispatcher, _) = dispatcher();
        let spellings: [(&str, &[u8]); 4] = [
            ("smartcamper/sensors/temperature", b"21.5"),
            ("smartcamper/sensors/indoor-temperature", b"21.5"),
            ("smartcamper/sensors/temperature/living/data", br#"{"value":21.5,"unit":"C"}"#),
            ("smartcamper/sensors/module-1/indoor-temperature", b"21.5"),
        ];
        for (topic, payload) in spellings {
            match dispatcher.dispatch(topic, payload) {
                Dispatch::Event(event) => assert_eq!(
                    event.kind,
                    EventKind::SensorReading {
                        metric: Metric::IndoorTemperature,
                        value: SensorValue::Scalar(21.5)
                    },
                    "{topic}"
                ),
                other => panic!("{topic}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_alias_device_routes_to_lighting() {
        let (dispatcher, _) = dispatcher();
        for device in ["led-controller", "module-2"] {
            let topic = format!("smartcamper/sensors/{device}/status");
            match dispatcher.dispatch(&topic, br#"{"strips":{"0":{"state":"ON","brightness":128}},"relays":{}}"#) {
                Dispatch::Event(event) => {
                    assert_eq!(event.device_id.as_deref(), Some("module-2"));
                    assert!(matches!(
                        event.kind,
                        EventKind::ComponentStatus {
                            domain: Domain::LightingStrip,
                            fields: StatusFields::LightingSnapshot(_),
                            ..
                        }
                    ));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_shared_tilt_topic_is_handled_but_not_forwarded() {
        let (dispatcher, _) = dispatcher();
        assert_eq!(dispatcher.claimants("smartcamper/sensors/tilt/living/data"), vec!["leveling"]);
        let out = dispatcher.dispatch(
            "smartcamper/sensors/tilt/living/data",
            br#"{"value":3.0,"unit":"degrees","device_id":"tilt","timestamp":42}"#,
        );
        assert!(matches!(out, Dispatch::Rejected(DispatchError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_unknown_topics_fall_through() {
        let (dispatcher, _) = dispatcher();
        assert!(matches!(
            dispatcher.dispatch("smartcamper/sensors/module-9/frobnicator", b"1"),
            Dispatch::Unhandled
        ));
        assert!(matches!(dispatcher.dispatch("elsewhere/sensors/temperature", b"1"), Dispatch::Unhandled));
        assert!(matches!(dispatcher.dispatch("", b""), Dispatch::Unhandled));
    }
}
