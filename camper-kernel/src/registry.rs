/**
 * REGISTRE DE PRÉSENCE - Online/offline des modules à partir de leurs heartbeats
 *
 * RÔLE :
 * Un enregistrement par module, créé au premier heartbeat, jamais supprimé.
 * Le statut online/offline est dérivé à chaque lecture (now - dernier heartbeat < timeout),
 * il n'est jamais lu depuis une valeur stockée périmée.
 *
 * FONCTIONNEMENT :
 * - Heartbeat : upsert + recalcul du palier de signal (0-4)
 * - Notification uniquement si offline -> online ou si le palier change
 * - Sweep périodique (timer indépendant des messages) : une notification agrégée par passage
 * - Accès sérialisé par un Mutex, sections critiques courtes, jamais d'I/O sous le verrou
 */

use crate::models::{DeviceId, Extra, HeartbeatIn, RSSI_NO_LINK};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Paliers identiques à ceux de l'indicateur de signal du dashboard
pub fn signal_bucket(rssi: Option<i32>) -> u8 {
    match rssi {
        None | Some(RSSI_NO_LINK) => 0,
        Some(r) if r >= -50 => 4,
        Some(r) if r >= -60 => 3,
        Some(r) if r >= -70 => 2,
        Some(r) if r >= -80 => 1,
        Some(_) => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Vue d'un module, statut calculé au moment de la lecture
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub device_id: DeviceId,
    pub status: PresenceStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub seconds_since_heartbeat: u64,
    pub signal_strength: Option<i32>,
    pub signal_bucket: u8,
    pub uptime_seconds: Option<u64>,
    pub reset_reason: Option<String>,
    pub metadata: Extra,
}

pub type PresenceSnapshot = BTreeMap<DeviceId, PresenceRecord>;

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub device_id: DeviceId,
    pub from: PresenceStatus,
    pub to: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    CameOnline { device_id: DeviceId },
    SignalChanged { device_id: DeviceId, from: u8, to: u8 },
    Swept { transitions: Vec<Transition> },
}

/// Notification de changement, accompagnée du snapshot complet
#[derive(Debug, Clone)]
pub struct PresenceNotice {
    pub change: PresenceChange,
    pub snapshot: PresenceSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Payload sans id, ou id différent de celui du topic
    pub id_mismatch: bool,
    pub notified: bool,
    pub signal_bucket: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

struct DeviceEntry {
    last_heartbeat_at: Instant,
    last_seen: OffsetDateTime,
    /// Dernier statut annoncé, sert au sweep pour détecter les transitions
    reported: PresenceStatus,
    signal_strength: Option<i32>,
    signal_bucket: u8,
    uptime_seconds: Option<u64>,
    reset_reason: Option<String>,
    metadata: Extra,
}

#[derive(Clone)]
pub struct LivenessRegistry {
    devices: Arc<Mutex<HashMap<DeviceId, DeviceEntry>>>,
    timeout: Duration,
    notices: broadcast::Sender<PresenceNotice>,
}

impl LivenessRegistry {
    pub fn new(timeout: Duration) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            devices: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            notices,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Abonnement aux notifications de changement de présence
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceNotice> {
        self.notices.subscribe()
    }

    pub fn record_heartbeat(&self, device_id: &str, heartbeat: &HeartbeatIn) -> HeartbeatOutcome {
        self.record_heartbeat_at(device_id, heartbeat, Instant::now())
    }

    /// Upsert du module adressé par le topic, même si le payload annonce un autre id
    pub fn record_heartbeat_at(
        &self,
        device_id: &str,
        heartbeat: &HeartbeatIn,
        now: Instant,
    ) -> HeartbeatOutcome {
        let id_mismatch = match heartbeat.device_id.as_deref() {
            Some(id) if id == device_id => false,
            Some(id) => {
                warn!(device = device_id, payload_id = id, "heartbeat device id mismatch, kept under topic id");
                true
            }
            None => {
                warn!(device = device_id, "heartbeat without device id");
                true
            }
        };

        let signal_strength = heartbeat.wifi_rssi.filter(|rssi| *rssi != RSSI_NO_LINK);
        let bucket = signal_bucket(signal_strength);

        if let Some(reason) = &heartbeat.reset_reason {
            info!(
                device = device_id,
                reset_reason = %reason,
                uptime = heartbeat.uptime.unwrap_or(0),
                rssi = ?signal_strength,
                "device restart detected"
            );
        }

        let notice = {
            let mut devices = self.devices.lock();
            let previous = devices
                .get(device_id)
                .map(|entry| (self.is_live(entry, now), entry.signal_bucket));

            let change = match previous {
                None | Some((false, _)) => Some(PresenceChange::CameOnline {
                    device_id: device_id.to_string(),
                }),
                Some((true, old)) if old != bucket => Some(PresenceChange::SignalChanged {
                    device_id: device_id.to_string(),
                    from: old,
                    to: bucket,
                }),
                Some((true, _)) => None,
            };

            devices.insert(
                device_id.to_string(),
                DeviceEntry {
                    last_heartbeat_at: now,
                    last_seen: OffsetDateTime::now_utc(),
                    reported: PresenceStatus::Online,
                    signal_strength,
                    signal_bucket: bucket,
                    uptime_seconds: heartbeat.uptime,
                    reset_reason: heartbeat.reset_reason.clone(),
                    metadata: heartbeat.extra.clone(),
                },
            );

            change.map(|change| PresenceNotice {
                change,
                snapshot: self.snapshot_locked(&devices, now),
            })
        };

        let notified = notice.is_some();
        if let Some(notice) = notice {
            debug!(device = device_id, change = ?notice.change, "presence changed");
            self.publish(notice);
        }

        HeartbeatOutcome {
            id_mismatch,
            notified,
            signal_bucket: bucket,
        }
    }

    pub fn query(&self, device_id: &str) -> Option<PresenceRecord> {
        self.query_at(device_id, Instant::now())
    }

    pub fn query_at(&self, device_id: &str, now: Instant) -> Option<PresenceRecord> {
        let devices = self.devices.lock();
        devices
            .get(device_id)
            .map(|entry| self.to_record(device_id, entry, now))
    }

    pub fn is_online(&self, device_id: &str) -> bool {
        self.is_online_at(device_id, Instant::now())
    }

    pub fn is_online_at(&self, device_id: &str, now: Instant) -> bool {
        self.devices
            .lock()
            .get(device_id)
            .map(|entry| self.is_live(entry, now))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> PresenceSnapshot {
        let devices = self.devices.lock();
        self.snapshot_locked(&devices, now)
    }

    pub fn online_devices(&self) -> Vec<DeviceId> {
        self.online_devices_at(Instant::now())
    }

    pub fn online_devices_at(&self, now: Instant) -> Vec<DeviceId> {
        let devices = self.devices.lock();
        let mut online: Vec<DeviceId> = devices
            .iter()
            .filter(|(_, entry)| self.is_live(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        online.sort();
        online
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> RegistryStats {
        let devices = self.devices.lock();
        let online = devices.values().filter(|e| self.is_live(e, now)).count();
        RegistryStats {
            total: devices.len(),
            online,
            offline: devices.len() - online,
        }
    }

    pub fn sweep(&self) -> Vec<Transition> {
        self.sweep_at(Instant::now())
    }

    /// Recalcule tous les statuts, une seule notification pour toutes les transitions
    pub fn sweep_at(&self, now: Instant) -> Vec<Transition> {
        let notice = {
            let mut devices = self.devices.lock();
            let mut transitions = Vec::new();
            for (device_id, entry) in devices.iter_mut() {
                let derived = if self.is_live(entry, now) {
                    PresenceStatus::Online
                } else {
                    PresenceStatus::Offline
                };
                if derived != entry.reported {
                    transitions.push(Transition {
                        device_id: device_id.clone(),
                        from: entry.reported,
                        to: derived,
                    });
                    entry.reported = derived;
                }
            }
            if transitions.is_empty() {
                return transitions;
            }
            transitions.sort_by(|a, b| a.device_id.cmp(&b.device_id));
            PresenceNotice {
                change: PresenceChange::Swept { transitions },
                snapshot: self.snapshot_locked(&devices, now),
            }
        };

        let transitions = match &notice.change {
            PresenceChange::Swept { transitions } => transitions.clone(),
            _ => Vec::new(),
        };
        for t in &transitions {
            info!(device = %t.device_id, from = ?t.from, to = ?t.to, "presence transition");
        }
        self.publish(notice);
        transitions
    }

    /// Sweep périodique, arrêté proprement par le signal de shutdown
    pub fn spawn_sweeper(&self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = self.clone();
        info!(
            interval_ms = every.as_millis() as u64,
            timeout_ms = registry.timeout.as_millis() as u64,
            "starting presence sweeper"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.sweep();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("presence sweeper stopped");
        })
    }

    fn is_live(&self, entry: &DeviceEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_heartbeat_at) < self.timeout
    }

    fn to_record(&self, device_id: &str, entry: &DeviceEntry, now: Instant) -> PresenceRecord {
        PresenceRecord {
            device_id: device_id.to_string(),
            status: if self.is_live(entry, now) {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            },
            last_seen: entry.last_seen,
            seconds_since_heartbeat: now.saturating_duration_since(entry.last_heartbeat_at).as_secs(),
            signal_strength: entry.signal_strength,
            signal_bucket: entry.signal_bucket,
            uptime_seconds: entry.uptime_seconds,
            reset_reason: entry.reset_reason.clone(),
            metadata: entry.metadata.clone(),
        }
    }

    fn snapshot_locked(&self, devices: &HashMap<DeviceId, DeviceEntry>, now: Instant) -> PresenceSnapshot {
        devices
            .iter()
            .map(|(id, entry)| (id.clone(), self.to_record(id, entry, now)))
            .collect()
    }

    fn publish(&self, notice: PresenceNotice) {
        // Err = aucun abonné, pas une erreur
        let _ = self.notices.send(notice);
    }
}
