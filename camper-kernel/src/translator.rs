/**
 * TRADUCTEUR DE COMMANDES - Intentions dashboard -> séquences (topic, payload) MQTT
 *
 * RÔLE :
 * Valide une intention par domaine et produit une liste ordonnée d'OutboundCommand.
 * Aucune commande n'est produite si la validation échoue : le rejet remonte à l'appelant.
 *
 * FONCTIONNEMENT :
 * - Topics : {ns}/commands/{device}/{composant}/{index}/{action}, orthographe firmware conservée
 * - Presets volets : un set_angle par volet, triés par angle décroissant (un passage reste ouvert)
 * - État connu fourni par l'appelant => jamais de commande qui répète l'état courant
 * - Debounce : seule une commande identique (mêmes topics et payloads) est retenue dans la fenêtre, stop exempté
 */

use crate::config::{CommandsConf, DevicesConf, KernelConfig};
use crate::error::IntentError;
use crate::models::{
    CircleMode, CircleStatus, DamperStatus, DeviceId, Domain, StripMode, StripStatus, SwitchState, TableStatus,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Angles acceptés par les volets : fermé, mi-ouvert, ouvert
pub const DAMPER_ANGLES: [u16; 3] = [0, 45, 90];

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub domain: Domain,
    pub target_index: Option<u8>,
    /// Normalisée en kebab-case (set_angle -> set-angle)
    pub action: String,
    pub parameters: Map<String, Value>,
    /// État courant connu du dashboard, optionnel
    pub known_state: Option<Value>,
}

impl Intent {
    pub fn new(domain: Domain, target_index: Option<u8>, action: &str) -> Self {
        Self {
            domain,
            target_index,
            action: normalize_action(action),
            parameters: Map::new(),
            known_state: None,
        }
    }

    pub fn with_param(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_known_state(mut self, state: Value) -> Self {
        self.known_state = Some(state);
        self
    }

    /// Décode un message de session {event, data} ; les noms d'événements historiques sont acceptés
    pub fn from_session(event: &str, data: &Value) -> Result<Self, IntentError> {
        let mut body = match data {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => return Err(IntentError::MissingField("data")),
        };
        let component = body.remove("type");
        let component = component.as_ref().and_then(Value::as_str);

        let domain = match event {
            "lighting-command" | "ledCommand" => match component {
                Some("strip") => Domain::LightingStrip,
                Some("relay") => Domain::LightingRelay,
                Some(other) => return Err(IntentError::UnknownIntent(format!("{event}/{other}"))),
                None => return Err(IntentError::MissingField("type")),
            },
            "climate-command" | "floorHeatingCommand" => Domain::ClimateCircle,
            "airflow-command" | "damperCommand" => Domain::AirflowDamper,
            "lift-command" | "tableCommand" => Domain::LiftTable,
            "leveling-command" | "levelingCommand" => Domain::Leveling,
            other => return Err(IntentError::UnknownIntent(other.to_string())),
        };

        let action = match body.remove("action") {
            Some(Value::String(a)) => a,
            // {type: "start"} côté nivellement
            None if domain == Domain::Leveling => component.unwrap_or_default().to_string(),
            _ => String::new(),
        };
        if action.is_empty() {
            return Err(IntentError::MissingField("action"));
        }

        let target_index = match body.remove("index") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|i| u8::try_from(i).ok())
                    .ok_or_else(|| IntentError::OutOfRange { name: "index", value: v.to_string() })?,
            ),
        };
        let known_state = body.remove("knownState");

        Ok(Self {
            domain,
            target_index,
            action: normalize_action(&action),
            parameters: body,
            known_state,
        })
    }
}

pub fn normalize_action(action: &str) -> String {
    action.trim().to_ascii_lowercase().replace('_', "-")
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub topic: String,
    pub payload: Value,
    /// Attente après la commande précédente du même plan
    pub dispatch_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandPlan {
    pub device_id: DeviceId,
    pub commands: Vec<OutboundCommand>,
}

/// (domaine, cible, action, commandes résolues)
type DebounceKey = (Domain, Option<u8>, String, String);

pub struct CommandTranslator {
    namespace: String,
    devices: DevicesConf,
    commands: CommandsConf,
    last_action: Mutex<HashMap<DebounceKey, Instant>>,
}

impl CommandTranslator {
    pub fn new(cfg: &KernelConfig) -> Self {
        Self {
            namespace: cfg.topics.namespace.clone(),
            devices: cfg.devices.clone(),
            commands: cfg.commands.clone(),
            last_action: Mutex::new(HashMap::new()),
        }
    }

    /// Module physique qui sert ce domaine
    pub fn target_device(&self, domain: Domain) -> &str {
        match domain {
            Domain::LightingStrip | Domain::LightingRelay => &self.devices.lighting,
            Domain::ClimateCircle | Domain::Leveling => &self.devices.climate,
            Domain::AirflowDamper => &self.devices.airflow,
            Domain::LiftTable => &self.devices.lift,
        }
    }

    /// Demande au module de republier tout son état
    pub fn refresh(&self, device_id: &str) -> OutboundCommand {
        OutboundCommand {
            topic: format!("{}/commands/{}/force_update", self.namespace, device_id),
            payload: json!({}),
            dispatch_delay: Duration::ZERO,
        }
    }

    pub fn translate(&self, intent: &Intent) -> Result<CommandPlan, IntentError> {
        self.translate_at(intent, Instant::now())
    }

    pub fn translate_at(&self, intent: &Intent, now: Instant) -> Result<CommandPlan, IntentError> {
        let device_id = self.target_device(intent.domain).to_string();
        let commands = match intent.domain {
            Domain::LightingStrip => self.strip(&device_id, intent)?,
            Domain::LightingRelay => self.relay(&device_id, intent)?,
            Domain::ClimateCircle => self.circle(&device_id, intent)?,
            Domain::AirflowDamper => self.damper(&device_id, intent)?,
            Domain::LiftTable => self.table(&device_id, intent)?,
            Domain::Leveling => self.leveling(&device_id, intent)?,
        };

        self.debounce(intent, &commands, now)?;
        debug!(
            domain = %intent.domain,
            action = %intent.action,
            device = %device_id,
            commands = commands.len(),
            "intent translated"
        );
        Ok(CommandPlan { device_id, commands })
    }

    fn debounce(&self, intent: &Intent, commands: &[OutboundCommand], now: Instant) -> Result<(), IntentError> {
        // un arrêt de table passe toujours
        if intent.domain == Domain::LiftTable && intent.action == "stop" {
            return Ok(());
        }
        let window = Duration::from_millis(self.commands.debounce_ms);
        let resolved = commands
            .iter()
            .map(|c| format!("{} {}", c.topic, c.payload))
            .collect::<Vec<_>>()
            .join("\n");
        let key = (intent.domain, intent.target_index, intent.action.clone(), resolved);
        let mut last = self.last_action.lock();
        if let Some(at) = last.get(&key) {
            if now.saturating_duration_since(*at) < window {
                return Err(IntentError::Debounced {
                    domain: intent.domain,
                    action: intent.action.clone(),
                });
            }
        }
        last.insert(key, now);
        Ok(())
    }

    fn topic(&self, device_id: &str, path: &str) -> String {
        format!("{}/commands/{}/{}", self.namespace, device_id, path)
    }

    fn command(&self, device_id: &str, path: &str, payload: Value) -> OutboundCommand {
        OutboundCommand {
            topic: self.topic(device_id, path),
            payload,
            dispatch_delay: Duration::ZERO,
        }
    }

    // ---------- éclairage ----------

    fn strip(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        let index = required_index(intent, self.commands.strip_count)?;
        let known: Option<StripStatus> = known_state(intent)?;
        let base = format!("strip/{index}");

        let (action, payload) = match intent.action.as_str() {
            "on" | "off" => {
                let wanted = if intent.action == "on" { SwitchState::On } else { SwitchState::Off };
                if known.as_ref().and_then(|k| k.state) == Some(wanted) {
                    return Err(IntentError::AlreadyInState { domain: intent.domain });
                }
                (intent.action.as_str(), json!({}))
            }
            "brightness" => {
                let value = param(intent, &["value", "brightness"]).ok_or(IntentError::MissingField("value"))?;
                let level = value
                    .as_u64()
                    .filter(|v| *v <= 255)
                    .ok_or_else(|| IntentError::OutOfRange { name: "brightness", value: value.to_string() })?;
                if known.as_ref().and_then(|k| k.brightness).map(u64::from) == Some(level) {
                    return Err(IntentError::AlreadyInState { domain: intent.domain });
                }
                ("brightness", json!({ "value": level }))
            }
            "mode" => {
                let value = param(intent, &["value", "mode"]).ok_or(IntentError::MissingField("mode"))?;
                let mode = value
                    .as_str()
                    .and_then(StripMode::parse)
                    .ok_or_else(|| IntentError::OutOfRange { name: "mode", value: value.to_string() })?;
                if known.as_ref().and_then(|k| k.mode) == Some(mode) {
                    return Err(IntentError::AlreadyInState { domain: intent.domain });
                }
                ("mode", json!({ "mode": mode }))
            }
            _ => return Err(unsupported(intent)),
        };
        Ok(vec![self.command(device_id, &format!("{base}/{action}"), payload)])
    }

    fn relay(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        if intent.action != "toggle" {
            return Err(unsupported(intent));
        }
        Ok(vec![self.command(device_id, "relay/toggle", json!({}))])
    }

    // ---------- chauffage au sol ----------

    fn circle(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        let index = required_index(intent, self.commands.circle_count)?;
        let known_mode = known_state::<CircleStatus>(intent)?.and_then(|c| c.mode);

        let action = match intent.action.as_str() {
            "toggle" => match known_mode {
                Some(CircleMode::Off) => "on",
                Some(CircleMode::TempControl) => "off",
                None => return Err(IntentError::MissingField("knownState")),
            },
            "on" if known_mode == Some(CircleMode::TempControl) => {
                return Err(IntentError::AlreadyInState { domain: intent.domain })
            }
            "off" if known_mode == Some(CircleMode::Off) => {
                return Err(IntentError::AlreadyInState { domain: intent.domain })
            }
            "on" => "on",
            "off" => "off",
            _ => return Err(unsupported(intent)),
        };
        Ok(vec![self.command(device_id, &format!("circle/{index}/{action}"), json!({}))])
    }

    // ---------- volets ----------

    fn damper(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        match intent.action.as_str() {
            "set-angle" => {
                let index = required_index(intent, self.commands.damper_count)?;
                let value = param(intent, &["angle"]).ok_or(IntentError::MissingField("angle"))?;
                let angle = damper_angle(value)?;
                let known = known_state::<DamperStatus>(intent)?;
                if known.map(|d| d.angle) == Some(angle) {
                    return Err(IntentError::AlreadyInState { domain: intent.domain });
                }
                Ok(vec![self.set_angle(device_id, index, angle)])
            }
            "cycle" => {
                let index = required_index(intent, self.commands.damper_count)?;
                let current = known_state::<DamperStatus>(intent)?.map(|d| d.angle).unwrap_or(90);
                let next = match current {
                    0 => 45,
                    45 => 90,
                    _ => 0,
                };
                Ok(vec![self.set_angle(device_id, index, next)])
            }
            "apply-preset" => self.preset(device_id, intent),
            _ => Err(unsupported(intent)),
        }
    }

    fn preset(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        let targets: Vec<u16> = if let Some(angles) = param(intent, &["angles"]) {
            let list = angles
                .as_array()
                .ok_or_else(|| IntentError::OutOfRange { name: "angles", value: angles.to_string() })?;
            list.iter().map(damper_angle).collect::<Result<_, _>>()?
        } else if let Some(name) = param(intent, &["preset"]) {
            let name = name.as_str().unwrap_or_default();
            let angles = self
                .commands
                .airflow_presets
                .get(name)
                .ok_or_else(|| IntentError::UnknownPreset(name.to_string()))?;
            angles
                .iter()
                .map(|a| damper_angle(&json!(a)))
                .collect::<Result<_, _>>()?
        } else {
            return Err(IntentError::MissingField("angles"));
        };

        if targets.is_empty() || targets.len() > usize::from(self.commands.damper_count) {
            return Err(IntentError::OutOfRange {
                name: "angles",
                value: format!("{} dampers", targets.len()),
            });
        }

        // état connu : {"angles": [..]} ou directement [..]
        let known: Vec<Option<u16>> = match &intent.known_state {
            Some(state) => {
                let list = state.get("angles").unwrap_or(state);
                list.as_array()
                    .map(|a| a.iter().map(|v| v.as_u64().and_then(|n| u16::try_from(n).ok())).collect())
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };

        let mut steps: Vec<(u8, u16)> = targets
            .iter()
            .enumerate()
            .filter(|(i, angle)| known.get(*i).copied().flatten() != Some(**angle))
            .map(|(i, angle)| (i as u8, *angle))
            .collect();
        if steps.is_empty() {
            return Err(IntentError::AlreadyInState { domain: intent.domain });
        }
        // ouvrir avant de fermer ; tri stable => ordre des index conservé à angle égal
        steps.sort_by(|a, b| b.1.cmp(&a.1));

        let step_delay = Duration::from_millis(self.commands.preset_step_delay_ms);
        Ok(steps
            .into_iter()
            .enumerate()
            .map(|(n, (index, angle))| {
                let mut cmd = self.set_angle(device_id, index, angle);
                if n > 0 {
                    cmd.dispatch_delay = step_delay;
                }
                cmd
            })
            .collect())
    }

    fn set_angle(&self, device_id: &str, index: u8, angle: u16) -> OutboundCommand {
        self.command(
            device_id,
            &format!("damper/{index}/set_angle"),
            json!({"type": "damper", "index": index, "action": "set_angle", "angle": angle}),
        )
    }

    // ---------- table ----------

    fn table(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        let (wire, timed) = match intent.action.as_str() {
            "move-up" => ("move_up", false),
            "move-down" => ("move_down", false),
            "stop" => ("stop", false),
            "move-up-timed" | "move-up-auto" => ("move_up_auto", true),
            "move-down-timed" | "move-down-auto" => ("move_down_auto", true),
            _ => return Err(unsupported(intent)),
        };

        if let Some(known) = known_state::<TableStatus>(intent)? {
            let repeats = match wire {
                "move_up" => known.direction == "up" && !known.auto_moving,
                "move_down" => known.direction == "down" && !known.auto_moving,
                "stop" => known.direction == "stopped",
                _ => false,
            };
            if repeats {
                return Err(IntentError::AlreadyInState { domain: intent.domain });
            }
        }

        let mut payload = json!({"type": "table", "action": wire});
        if timed {
            let duration = match param(intent, &["duration"]) {
                Some(v) => v
                    .as_u64()
                    .filter(|d| (1..=self.commands.lift_max_duration_ms).contains(d))
                    .ok_or_else(|| IntentError::OutOfRange { name: "duration", value: v.to_string() })?,
                None => self.commands.lift_default_duration_ms,
            };
            payload["duration"] = json!(duration);
        }
        Ok(vec![self.command(device_id, &format!("table/{wire}"), payload)])
    }

    // ---------- nivellement ----------

    fn leveling(&self, device_id: &str, intent: &Intent) -> Result<Vec<OutboundCommand>, IntentError> {
        if intent.action != "start" {
            return Err(unsupported(intent));
        }
        Ok(vec![self.command(device_id, "leveling/start", json!({}))])
    }
}

fn unsupported(intent: &Intent) -> IntentError {
    IntentError::UnsupportedAction {
        domain: intent.domain,
        action: intent.action.clone(),
    }
}

fn required_index(intent: &Intent, count: u8) -> Result<u8, IntentError> {
    let index = intent.target_index.ok_or(IntentError::MissingField("index"))?;
    if index >= count {
        return Err(IntentError::OutOfRange {
            name: "index",
            value: index.to_string(),
        });
    }
    Ok(index)
}

fn param<'a>(intent: &'a Intent, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|n| intent.parameters.get(*n))
        .filter(|v| !v.is_null())
}

fn known_state<T: DeserializeOwned>(intent: &Intent) -> Result<Option<T>, IntentError> {
    match &intent.known_state {
        None | Some(Value::Null) => Ok(None),
        Some(state) => serde_json::from_value(state.clone())
            .map(Some)
            .map_err(|_| IntentError::OutOfRange {
                name: "knownState",
                value: state.to_string(),
            }),
    }
}

fn damper_angle(value: &Value) -> Result<u16, IntentError> {
    value
        .as_u64()
        .and_then(|a| u16::try_from(a).ok())
        .filter(|a| DAMPER_ANGLES.contains(a))
        .ok_or_else(|| IntentError::OutOfRange {
            name: "angle",
            value: value.to_string(),
        })
}
