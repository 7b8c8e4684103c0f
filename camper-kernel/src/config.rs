use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub topics: TopicsConf,
    pub registry: RegistryConf,
    pub commands: CommandsConf,
    pub devices: DevicesConf,
    pub sessions: SessionsConf,
    /// Trace chaque message MQTT entrant et chaque topic non reconnu
    pub debug_mqtt: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "camper-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TopicsConf {
    pub namespace: String, // ex: "smartcamper" -> smartcamper/heartbeat/module-3
}

impl Default for TopicsConf {
    fn default() -> Self {
        Self { namespace: "smartcamper".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConf {
    /// Période de heartbeat attendue côté module
    pub heartbeat_period_ms: u64,
    /// Période du sweep offline, indépendante de l'arrivée des messages
    pub check_interval_ms: u64,
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: 10_000,
            check_interval_ms: 2_000,
        }
    }
}

impl RegistryConf {
    /// Tolère exactement un heartbeat manqué, offline au second
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms.saturating_mul(2))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CommandsConf {
    pub preset_step_delay_ms: u64,
    pub debounce_ms: u64,
    pub refresh_delay_ms: u64,
    pub lift_default_duration_ms: u64,
    pub lift_max_duration_ms: u64,
    pub strip_count: u8,
    pub circle_count: u8,
    pub damper_count: u8,
    /// Presets nommés : une liste d'angles, position = index du volet
    pub airflow_presets: HashMap<String, Vec<u16>>,
}

impl Default for CommandsConf {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert("all-open".to_string(), vec![90, 90, 90, 90, 90]);
        presets.insert("all-half".to_string(), vec![45, 45, 45, 45, 45]);
        presets.insert("front-only".to_string(), vec![90, 0, 0, 0, 0]);
        Self {
            preset_step_delay_ms: 300,
            debounce_ms: 300,
            refresh_delay_ms: 500,
            lift_default_duration_ms: 5_000,
            lift_max_duration_ms: 60_000,
            strip_count: 5,
            circle_count: 4,
            damper_count: 5,
            airflow_presets: presets,
        }
    }
}

/// Quel module physique sert quel rôle, plus les anciens noms de modules
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DevicesConf {
    pub lighting: String,
    pub climate: String,
    pub airflow: String,
    pub lift: String,
    pub aliases: HashMap<String, String>, // ex: "led-controller" -> "module-2"
}

impl Default for DevicesConf {
    fn default() -> Self {
        let mut aliases = HashMap::new();
        aliases.insert("led-controller".to_string(), "module-2".to_string());
        Self {
            lighting: "module-2".into(),
            climate: "module-3".into(),
            airflow: "module-4".into(),
            lift: "module-4".into(),
            aliases,
        }
    }
}

impl DevicesConf {
    /// Ramène un identifiant historique vers l'identifiant canonique
    pub fn canonical<'a>(&'a self, device_id: &'a str) -> &'a str {
        self.aliases
            .get(device_id)
            .map(String::as_str)
            .unwrap_or(device_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionsConf {
    /// Frames en attente par session avant de la considérer trop lente
    pub outbound_buffer: usize,
}

impl Default for SessionsConf {
    fn default() -> Self {
        Self { outbound_buffer: 64 }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("CAMPER_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        warn!(path = %path, "no config file, using defaults");
        KernelConfig::default()
    };

    if let Ok(v) = std::env::var("DEBUG_MQTT") {
        cfg.debug_mqtt = !v.is_empty() && v != "0" && v != "false";
    }

    let timeout = cfg.registry.heartbeat_timeout();
    if cfg.registry.check_interval() * 5 > timeout {
        warn!(
            check_interval_ms = cfg.registry.check_interval_ms,
            timeout_ms = timeout.as_millis() as u64,
            "check interval should be at least 5x shorter than the heartbeat timeout"
        );
    }
    cfg
}

fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("invalid config: {e}");
        KernelConfig::default()
    })
}
