// Un matcher par domaine et par famille de topics ; ajouter un ancien nom = ajouter une branche ici

use super::{TopicMatcher, TopicPath};
use crate::config::DevicesConf;
use crate::error::DispatchError;
use crate::models::{
    CircleStatus, ClimateSnapshot, DamperStatus, Domain, Event, EventKind, HeartbeatIn, LightingSnapshot,
    Metric, RelayStatus, SensorValue, StatusFields, StripStatus, SwitchState, TableStatus,
};
use crate::registry::LivenessRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

fn utf8<'p>(path: &TopicPath<'_>, payload: &'p [u8]) -> Result<&'p str, DispatchError> {
    std::str::from_utf8(payload)
        .map(str::trim)
        .map_err(|e| DispatchError::malformed(path.topic, e))
}

fn json_value(path: &TopicPath<'_>, payload: &[u8]) -> Result<Value, DispatchError> {
    serde_json::from_slice(payload).map_err(|e| DispatchError::malformed(path.topic, e))
}

/// JSON illisible => MalformedPayload, JSON lisible mais mauvaise forme => SchemaMismatch
fn json<T: DeserializeOwned>(path: &TopicPath<'_>, payload: &[u8]) -> Result<T, DispatchError> {
    let value = json_value(path, payload)?;
    serde_json::from_value(value).map_err(|e| DispatchError::schema(path.topic, e))
}

fn number(path: &TopicPath<'_>, payload: &[u8]) -> Result<f64, DispatchError> {
    let text = utf8(path, payload)?.trim_matches('"');
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DispatchError::malformed(path.topic, format!("`{text}` is not a number"))),
    }
}

fn in_range(path: &TopicPath<'_>, value: f64, min: f64, max: f64) -> Result<f64, DispatchError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(DispatchError::OutOfRange {
            topic: path.topic.to_string(),
            value,
            min,
            max,
        })
    }
}

fn index(segment: &str) -> Option<u8> {
    segment.parse().ok()
}

fn status(path: &TopicPath<'_>, domain: Domain, component_index: Option<u8>, fields: StatusFields) -> Event {
    Event::new(
        Some(path.device()),
        EventKind::ComponentStatus {
            domain,
            component_index,
            fields,
        },
    )
}

// ---------- heartbeat ----------

/// {ns}/heartbeat/{device}
pub struct HeartbeatMatcher {
    registry: LivenessRegistry,
    devices: DevicesConf,
}

impl HeartbeatMatcher {
    pub fn new(registry: LivenessRegistry, devices: DevicesConf) -> Self {
        Self { registry, devices }
    }
}

impl TopicMatcher for HeartbeatMatcher {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "heartbeat" && path.segments.len() == 1 && !path.device().is_empty()
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let Value::Object(body) = json_value(path, payload)? else {
            return Err(DispatchError::schema(path.topic, "heartbeat is not a JSON object"));
        };
        let (mut heartbeat, ignored) = HeartbeatIn::from_object(body);
        if !ignored.is_empty() {
            warn!(topic = path.topic, fields = ?ignored, "heartbeat fields ignored");
        }
        if let Some(id) = heartbeat.device_id.take() {
            heartbeat.device_id = Some(self.devices.canonical(&id).to_string());
        }
        let outcome = self.registry.record_heartbeat(path.device(), &heartbeat);
        Ok(Event::new(
            Some(path.device()),
            EventKind::Heartbeat {
                signal_bucket: outcome.signal_bucket,
            },
        ))
    }
}

// ---------- erreurs composant ----------

/// {ns}/errors/{device}/{componentType}/{componentId}
pub struct ErrorMatcher;

impl TopicMatcher for ErrorMatcher {
    fn name(&self) -> &'static str {
        "errors"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "errors" && path.segments.len() == 3
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let detail = json_value(path, payload)?;
        let tail = path.tail();
        let domain = Domain::from_component_segment(tail[0])
            .ok_or_else(|| DispatchError::schema(path.topic, format!("unknown component type `{}`", tail[0])))?;
        let component_index = index(tail[1])
            .ok_or_else(|| DispatchError::schema(path.topic, format!("bad component id `{}`", tail[1])))?;
        Ok(Event::new(
            Some(path.device()),
            EventKind::ComponentError {
                domain,
                component_index,
                detail,
            },
        ))
    }
}

// ---------- métriques scalaires ----------

#[derive(Clone, Copy)]
enum Encoding {
    Text,
    /// {value, unit?}
    ValueObject,
}

struct Spelling {
    path: &'static str,
    metric: Metric,
    encoding: Encoding,
}

const SPELLINGS: &[Spelling] = &[
    Spelling { path: "temperature", metric: Metric::IndoorTemperature, encoding: Encoding::Text },
    Spelling { path: "indoor-temperature", metric: Metric::IndoorTemperature, encoding: Encoding::Text },
    Spelling { path: "humidity", metric: Metric::IndoorHumidity, encoding: Encoding::Text },
    Spelling { path: "indoor-humidity", metric: Metric::IndoorHumidity, encoding: Encoding::Text },
    Spelling { path: "outdoor-temperature", metric: Metric::OutdoorTemperature, encoding: Encoding::Text },
    Spelling { path: "gray-water-temperature", metric: Metric::GrayWaterTemperature, encoding: Encoding::Text },
    Spelling { path: "gray-water/level", metric: Metric::GrayWaterLevel, encoding: Encoding::Text },
    Spelling { path: "temperature/living/data", metric: Metric::IndoorTemperature, encoding: Encoding::ValueObject },
    Spelling { path: "humidity/living/data", metric: Metric::IndoorHumidity, encoding: Encoding::ValueObject },
];

/// Nom canonique, utilisable derrière un device : {ns}/sensors/{device}/{metric}
fn scoped_metric(segment: &str) -> Option<Metric> {
    match segment {
        "indoor-temperature" => Some(Metric::IndoorTemperature),
        "indoor-humidity" => Some(Metric::IndoorHumidity),
        "outdoor-temperature" => Some(Metric::OutdoorTemperature),
        "gray-water-temperature" => Some(Metric::GrayWaterTemperature),
        "gray-water-level" => Some(Metric::GrayWaterLevel),
        _ => None,
    }
}

fn metric_range(metric: Metric) -> Option<(f64, f64)> {
    match metric {
        Metric::IndoorHumidity | Metric::GrayWaterLevel => Some((0.0, 100.0)),
        _ => None,
    }
}

#[derive(serde::Deserialize)]
struct ValueObject {
    value: f64,
}

pub struct ScalarMetricMatcher;

impl ScalarMetricMatcher {
    fn resolve(path: &TopicPath<'_>) -> Option<(Metric, Encoding, Option<String>)> {
        let joined = path.segments.join("/");
        if let Some(s) = SPELLINGS.iter().find(|s| s.path == joined) {
            return Some((s.metric, s.encoding, None));
        }
        match path.tail() {
            [segment] => scoped_metric(segment).map(|m| (m, Encoding::Text, path.device.clone())),
            _ => None,
        }
    }
}

impl TopicMatcher for ScalarMetricMatcher {
    fn name(&self) -> &'static str {
        "scalar-metric"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "sensors" && Self::resolve(path).is_some()
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let Some((metric, encoding, device)) = Self::resolve(path) else {
            return Err(DispatchError::schema(path.topic, "not a metric topic"));
        };
        let raw = match encoding {
            Encoding::Text => number(path, payload)?,
            Encoding::ValueObject => json::<ValueObject>(path, payload)?.value,
        };
        let value = match metric_range(metric) {
            Some((min, max)) => in_range(path, raw, min, max)?,
            None => raw,
        };
        Ok(Event::new(
            device.as_deref(),
            EventKind::SensorReading {
                metric,
                value: SensorValue::Scalar(value),
            },
        ))
    }
}

// ---------- nivellement ----------

#[derive(serde::Deserialize)]
struct Tilt {
    pitch: f64,
    roll: f64,
}

/// {ns}/sensors/{device}/leveling -> {pitch, roll}
///
/// L'ancien topic partagé tilt/living/data reçoit roll et pitch l'un après l'autre au format
/// {value, unit} sans nommer l'axe : il est reconnu, mais seul un {pitch, roll} complet passe.
pub struct LevelingMatcher;

const LEGACY_TILT: [&str; 3] = ["tilt", "living", "data"];

impl LevelingMatcher {
    fn is_legacy(path: &TopicPath<'_>) -> bool {
        path.segments == LEGACY_TILT
    }
}

impl TopicMatcher for LevelingMatcher {
    fn name(&self) -> &'static str {
        "leveling"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "sensors" && (path.tail() == ["leveling"] || Self::is_legacy(path))
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let legacy = Self::is_legacy(path);
        let value = json_value(path, payload)?;
        if legacy && value.get("value").is_some() {
            return Err(DispatchError::schema(path.topic, "tilt axis not identifiable"));
        }
        let tilt: Tilt = serde_json::from_value(value).map_err(|e| DispatchError::schema(path.topic, e))?;
        Ok(Event::new(
            (!legacy).then(|| path.device()),
            EventKind::SensorReading {
                metric: Metric::Leveling,
                value: SensorValue::Tilt {
                    pitch: tilt.pitch,
                    roll: tilt.roll,
                },
            },
        ))
    }
}

// ---------- éclairage ----------

/// Snapshot {dev}/status + anciens topics strip/relay en texte
pub struct LightingMatcher {
    device: String,
}

impl LightingMatcher {
    pub fn new(device: &str) -> Self {
        Self { device: device.to_string() }
    }
}

impl TopicMatcher for LightingMatcher {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        if path.category != "sensors" || path.device() != self.device {
            return false;
        }
        match path.tail() {
            ["status"] => true,
            ["strip", i, "state" | "brightness"] => index(i).is_some(),
            ["relay", "state"] => true,
            _ => false,
        }
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        match path.tail() {
            ["status"] => {
                let snapshot: LightingSnapshot = json(path, payload)?;
                Ok(status(path, Domain::LightingStrip, None, StatusFields::LightingSnapshot(snapshot)))
            }
            ["strip", i, field] => {
                let mut strip = StripStatus::default();
                if *field == "brightness" {
                    strip.brightness = Some(in_range(path, number(path, payload)?, 0.0, 255.0)? as u8);
                } else {
                    let text = utf8(path, payload)?;
                    strip.state = Some(
                        SwitchState::parse(text)
                            .ok_or_else(|| DispatchError::malformed(path.topic, format!("bad state `{text}`")))?,
                    );
                }
                Ok(status(path, Domain::LightingStrip, index(i), StatusFields::Strip(strip)))
            }
            _ => {
                let text = utf8(path, payload)?;
                let state = SwitchState::parse(text)
                    .ok_or_else(|| DispatchError::malformed(path.topic, format!("bad state `{text}`")))?;
                let relay = RelayStatus {
                    state: Some(state),
                    ..Default::default()
                };
                Ok(status(path, Domain::LightingRelay, None, StatusFields::Relay(relay)))
            }
        }
    }
}

// ---------- chauffage au sol ----------

/// {dev}/status : {type:"full", data:{circles}} ou {type:"circle", index, ...}
pub struct ClimateMatcher {
    device: String,
}

impl ClimateMatcher {
    pub fn new(device: &str) -> Self {
        Self { device: device.to_string() }
    }
}

impl TopicMatcher for ClimateMatcher {
    fn name(&self) -> &'static str {
        "climate"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "sensors" && path.device() == self.device && path.tail() == ["status"]
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let value = json_value(path, payload)?;
        let Value::Object(mut body) = value else {
            return Err(DispatchError::schema(path.topic, "expected a JSON object"));
        };
        let kind = body.remove("type");
        match kind.as_ref().and_then(Value::as_str) {
            Some("full") => {
                let data = body.remove("data").unwrap_or(Value::Null);
                let snapshot: ClimateSnapshot =
                    serde_json::from_value(data).map_err(|e| DispatchError::schema(path.topic, e))?;
                Ok(status(path, Domain::ClimateCircle, None, StatusFields::ClimateSnapshot(snapshot)))
            }
            Some("circle") => {
                let circle_index = body
                    .remove("index")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| DispatchError::schema(path.topic, "circle status without index"))?;
                let circle: CircleStatus = serde_json::from_value(Value::Object(body))
                    .map_err(|e| DispatchError::schema(path.topic, e))?;
                Ok(status(path, Domain::ClimateCircle, Some(circle_index), StatusFields::Circle(circle)))
            }
            other => Err(DispatchError::schema(
                path.topic,
                format!("unknown climate status type {other:?}"),
            )),
        }
    }
}

// ---------- volets ----------

/// {dev}/damper/{i}/angle -> {angle}
pub struct DamperMatcher {
    device: String,
}

impl DamperMatcher {
    pub fn new(device: &str) -> Self {
        Self { device: device.to_string() }
    }
}

impl TopicMatcher for DamperMatcher {
    fn name(&self) -> &'static str {
        "damper"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "sensors"
            && path.device() == self.device
            && matches!(path.tail(), ["damper", i, "angle"] if index(i).is_some())
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let value = json_value(path, payload)?;
        let angle = value
            .get("angle")
            .and_then(Value::as_f64)
            .ok_or_else(|| DispatchError::schema(path.topic, "missing angle"))?;
        in_range(path, angle, 0.0, 90.0)?;
        let damper: DamperStatus =
            serde_json::from_value(value).map_err(|e| DispatchError::schema(path.topic, e))?;
        let damper_index = path.tail().get(1).and_then(|i| index(i));
        Ok(status(path, Domain::AirflowDamper, damper_index, StatusFields::Damper(damper)))
    }
}

// ---------- table ----------

/// {dev}/table/direction -> {direction, autoMoving?}
pub struct TableMatcher {
    device: String,
}

impl TableMatcher {
    pub fn new(device: &str) -> Self {
        Self { device: device.to_string() }
    }
}

impl TopicMatcher for TableMatcher {
    fn name(&self) -> &'static str {
        "table"
    }

    fn matches(&self, path: &TopicPath<'_>) -> bool {
        path.category == "sensors" && path.device() == self.device && path.tail() == ["table", "direction"]
    }

    fn decode(&self, path: &TopicPath<'_>, payload: &[u8]) -> Result<Event, DispatchError> {
        let table: TableStatus = json(path, payload)?;
        if !matches!(table.direction.as_str(), "up" | "down" | "stopped") {
            return Err(DispatchError::schema(
                path.topic,
                format!("unknown direction `{}`", table.direction),
            ));
        }
        Ok(status(path, Domain::LiftTable, None, StatusFields::Table(table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CircleMode, StripMode};
    use serde_json::json;

    fn path(topic: &str) -> TopicPath<'_> {
        TopicPath::parse(topic, "smartcamper", |d| {
            if d == "led-controller" { "module-2".into() } else { d.to_string() }
        })
        .unwrap()
    }

    #[test]
    fn test_leveling_requires_pitch_and_roll() {
        let p = path("smartcamper/sensors/module-3/leveling");
        assert!(LevelingMatcher.matches(&p));
        let event = LevelingMatcher.decode(&p, br#"{"pitch":1.5,"roll":-0.25}"#).unwrap();
        assert_eq!(
            event.kind,
            EventKind::SensorReading {
                metric: Metric::Leveling,
                value: SensorValue::Tilt { pitch: 1.5, roll: -0.25 }
            }
        );
        let err = LevelingMatcher.decode(&p, br#"{"pitch":1.5}"#).unwrap_err();
        assert!(matches!(err, DispatchError::SchemaMismatch { .. }));
        let err = LevelingMatcher.decode(&p, b"tilted").unwrap_err();
        assert!(matches!(err, DispatchError::MalformedPayload { .. }));
    }

    #[test]
    fn test_shared_tilt_topic_rejects_single_axis_readings() {
        let p = path("smartcamper/sensors/tilt/living/data");
        assert!(LevelingMatcher.matches(&p));
        assert!(!ScalarMetricMatcher.matches(&p));

        for payload in [
            br#"{"value":2.5,"unit":"degrees","device_id":"tilt","timestamp":100}"#.as_slice(),
            br#"{"value":-1.0,"unit":"degrees","device_id":"tilt","timestamp":101}"#.as_slice(),
        ] {
            let err = LevelingMatcher.decode(&p, payload).unwrap_err();
            assert_eq!(
                err,
                DispatchError::schema("smartcamper/sensors/tilt/living/data", "tilt axis not identifiable")
            );
        }

        let event = LevelingMatcher.decode(&p, br#"{"pitch":0.5,"roll":1.0}"#).unwrap();
        assert_eq!(event.device_id, None);
        assert_eq!(
            event.kind,
            EventKind::SensorReading {
                metric: Metric::Leveling,
                value: SensorValue::Tilt { pitch: 0.5, roll: 1.0 }
            }
        );
    }

    #[test]
    fn test_legacy_strip_and_relay_topics() {
        let m = LightingMatcher::new("module-2");
        let p = path("smartcamper/sensors/led-controller/strip/3/brightness");
        assert!(m.matches(&p));
        let event = m.decode(&p, b"200").unwrap();
        match event.kind {
            EventKind::ComponentStatus { domain, component_index, fields: StatusFields::Strip(strip) } => {
                assert_eq!(domain, Domain::LightingStrip);
                assert_eq!(component_index, Some(3));
                assert_eq!(strip.brightness, Some(200));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(m.decode(&p, b"300").is_err());

        let p = path("smartcamper/sensors/module-2/relay/state");
        let event = m.decode(&p, b"ON").unwrap();
        assert!(matches!(
            event.kind,
            EventKind::ComponentStatus { domain: Domain::LightingRelay, fields: StatusFields::Relay(RelayStatus { state: Some(SwitchState::On), .. }), .. }
        ));

        assert!(!m.matches(&path("smartcamper/sensors/module-2/strip/x/state")));
        assert!(!m.matches(&path("smartcamper/sensors/module-2/strip/1/mode")));
    }

    #[test]
    fn test_lighting_snapshot_keeps_modes() {
        let m = LightingMatcher::new("module-2");
        let p = path("smartcamper/sensors/module-2/status");
        let event = m
            .decode(&p, br#"{"strips":{"1":{"state":"ON","brightness":90,"mode":"AUTO"}},"relays":{"0":{"state":"OFF"}}}"#)
            .unwrap();
        let EventKind::ComponentStatus { fields: StatusFields::LightingSnapshot(s), .. } = event.kind else {
            panic!("not a lighting snapshot");
        };
        assert_eq!(s.strips["1"].mode, Some(StripMode::Auto));
        assert_eq!(s.relays["0"].state, Some(SwitchState::Off));
    }

    #[test]
    fn test_climate_full_and_single_circle() {
        let m = ClimateMatcher::new("module-3");
        let p = path("smartcamper/sensors/module-3/status");
        let full = json!({"type": "full", "data": {"circles": {"0": {"mode": "OFF", "relay": "OFF"}}}});
        let event = m.decode(&p, full.to_string().as_bytes()).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::ComponentStatus { component_index: None, fields: StatusFields::ClimateSnapshot(_), .. }
        ));

        let single = json!({"type": "circle", "index": 2, "mode": "TEMP_CONTROL", "relay": "ON", "temperature": 22.5, "error": false});
        let event = m.decode(&p, single.to_string().as_bytes()).unwrap();
        match event.kind {
            EventKind::ComponentStatus { component_index, fields: StatusFields::Circle(circle), .. } => {
                assert_eq!(component_index, Some(2));
                assert_eq!(circle.mode, Some(CircleMode::TempControl));
                assert_eq!(circle.temperature, Some(22.5));
                assert!(circle.extra.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = m.decode(&p, br#"{"type":"mystery"}"#).unwrap_err();
        assert!(matches!(err, DispatchError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_damper_angle_range() {
        let m = DamperMatcher::new("module-4");
        let p = path("smartcamper/sensors/module-4/damper/1/angle");
        assert!(m.matches(&p));
        let event = m.decode(&p, br#"{"angle":45}"#).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::ComponentStatus { component_index: Some(1), fields: StatusFields::Damper(DamperStatus { angle: 45, .. }), .. }
        ));
        assert!(matches!(m.decode(&p, br#"{"angle":120}"#), Err(DispatchError::OutOfRange { .. })));
        assert!(matches!(m.decode(&p, br#"{}"#), Err(DispatchError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_table_direction() {
        let m = TableMatcher::new("module-4");
        let p = path("smartcamper/sensors/module-4/table/direction");
        let event = m.decode(&p, br#"{"direction":"up","autoMoving":true}"#).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::ComponentStatus { fields: StatusFields::Table(TableStatus { auto_moving: true, .. }), .. }
        ));
        let event = m.decode(&p, br#"{"direction":"stopped"}"#).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::ComponentStatus { fields: StatusFields::Table(TableStatus { auto_moving: false, .. }), .. }
        ));
        assert!(m.decode(&p, br#"{"direction":"sideways"}"#).is_err());
    }

    #[test]
    fn test_error_topics_scope_to_component_domain() {
        let p = path("smartcamper/errors/module-3/circle/0");
        assert!(ErrorMatcher.matches(&p));
        let event = ErrorMatcher.decode(&p, br#"{"code":"SENSOR_LOST"}"#).unwrap();
        assert_eq!(event.device_id.as_deref(), Some("module-3"));
        assert_eq!(
            event.kind,
            EventKind::ComponentError {
                domain: Domain::ClimateCircle,
                component_index: 0,
                detail: json!({"code": "SENSOR_LOST"})
            }
        );

        let p = path("smartcamper/errors/module-4/valve/1");
        assert!(matches!(ErrorMatcher.decode(&p, b"{}"), Err(DispatchError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_scalar_rejects_garbage_and_humidity_range() {
        let p = path("smartcamper/sensors/humidity");
        assert!(matches!(ScalarMetricMatcher.decode(&p, b"wet"), Err(DispatchError::MalformedPayload { .. })));
        assert!(matches!(ScalarMetricMatcher.decode(&p, b"NaN"), Err(DispatchError::MalformedPayload { .. })));
        assert!(matches!(ScalarMetricMatcher.decode(&p, b"101"), Err(DispatchError::OutOfRange { .. })));
        assert!(ScalarMetricMatcher.decode(&p, b"\"55\"").is_ok());

        let p = path("smartcamper/sensors/humidity/living/data");
        assert!(matches!(ScalarMetricMatcher.decode(&p, br#"{"unit":"%"}"#), Err(DispatchError::SchemaMismatch { .. })));
    }
}
