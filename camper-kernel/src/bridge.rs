/**
 * BRIDGE - Racine de composition MQTT <-> sessions dashboard
 *
 * RÔLE :
 * Relie registre, dispatcher, traducteur et passerelle. Aucun état propre hormis
 * l'outbox : la file des commandes à publier, vidée par la tâche MQTT.
 *
 * FONCTIONNEMENT :
 * - Entrant : dispatch -> Event -> trame de session -> broadcast
 * - Intention : décodage -> device online ? -> traduction -> outbox (délais de preset respectés)
 * - Rejet : trame commandRejected à la session émettrice uniquement
 * - Nouvelle session : snapshot immédiat, puis force_update vers chaque module online après un court délai
 * - Notifications du registre relayées en moduleStatusUpdate
 */

use crate::config::KernelConfig;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::IntentError;
use crate::gateway::{SessionFrame, SessionGateway, SessionId};
use crate::registry::LivenessRegistry;
use crate::translator::{CommandPlan, CommandTranslator, Intent, OutboundCommand};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type Outbox = mpsc::UnboundedSender<OutboundCommand>;

/// Message brut d'une session : {event, data}
#[derive(Debug, Deserialize)]
pub struct SessionMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub struct Bridge {
    registry: LivenessRegistry,
    dispatcher: Dispatcher,
    translator: CommandTranslator,
    gateway: SessionGateway,
    outbox: Outbox,
    refresh_delay: Duration,
}

impl Bridge {
    pub fn new(cfg: &KernelConfig, registry: LivenessRegistry, gateway: SessionGateway, outbox: Outbox) -> Self {
        Self {
            dispatcher: Dispatcher::new(cfg, registry.clone()),
            translator: CommandTranslator::new(cfg),
            registry,
            gateway,
            outbox,
            refresh_delay: Duration::from_millis(cfg.commands.refresh_delay_ms),
        }
    }

    pub fn registry(&self) -> &LivenessRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &SessionGateway {
        &self.gateway
    }

    pub fn handle_inbound(&self, topic: &str, payload: &[u8]) -> Dispatch {
        let outcome = self.dispatcher.dispatch(topic, payload);
        if let Dispatch::Event(event) = &outcome {
            self.gateway.broadcast_event(event);
        }
        outcome
    }

    /// Texte reçu sur le websocket d'une session
    pub fn handle_session_text(&self, session: SessionId, text: &str) -> Result<usize, IntentError> {
        match serde_json::from_str::<SessionMessage>(text) {
            Ok(msg) => self.handle_intent(session, &msg.event, &msg.data),
            Err(e) => {
                warn!(session = %session, "unreadable session message: {e}");
                let err = IntentError::MissingField("event");
                self.gateway.send_to(session, SessionFrame::rejected("", &err));
                Err(err)
            }
        }
    }

    /// Retourne le nombre de commandes planifiées
    pub fn handle_intent(&self, session: SessionId, event: &str, data: &Value) -> Result<usize, IntentError> {
        match self.plan(event, data) {
            Ok(plan) => {
                let count = plan.commands.len();
                info!(session = %session, intent = event, device = %plan.device_id, commands = count, "intent accepted");
                self.submit(plan);
                Ok(count)
            }
            Err(e) => {
                warn!(session = %session, intent = event, "intent rejected: {e}");
                self.gateway.send_to(session, SessionFrame::rejected(event, &e));
                Err(e)
            }
        }
    }

    fn plan(&self, event: &str, data: &Value) -> Result<CommandPlan, IntentError> {
        let intent = Intent::from_session(event, data)?;
        let device = self.translator.target_device(intent.domain);
        if !self.registry.is_online(device) {
            return Err(IntentError::UnreachableTarget(device.to_string()));
        }
        self.translator.translate(&intent)
    }

    /// Publication fire-and-forget ; un plan avec délais part dans sa propre tâche
    pub fn submit(&self, plan: CommandPlan) {
        if plan.commands.iter().all(|c| c.dispatch_delay.is_zero()) {
            for cmd in plan.commands {
                self.enqueue(cmd);
            }
            return;
        }

        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            for cmd in plan.commands {
                if !cmd.dispatch_delay.is_zero() {
                    tokio::time::sleep(cmd.dispatch_delay).await;
                }
                if outbox.send(cmd).is_err() {
                    warn!(device = %plan.device_id, "outbox closed, dropping remaining commands");
                    return;
                }
            }
        });
    }

    fn enqueue(&self, cmd: OutboundCommand) {
        if self.outbox.send(cmd).is_err() {
            warn!("outbox closed, command dropped");
        }
    }

    /// Snapshot à la nouvelle session, puis demande de données fraîches aux modules online
    pub fn on_session_connect(self: &Arc<Self>) -> (SessionId, mpsc::Receiver<SessionFrame>) {
        let (id, rx) = self.gateway.connect(&self.registry.snapshot());

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(bridge.refresh_delay).await;
            let online = bridge.registry.online_devices();
            debug!(session = %id, devices = online.len(), "requesting fresh data");
            for device in &online {
                bridge.enqueue(bridge.translator.refresh(device));
            }
        });

        (id, rx)
    }

    pub fn on_session_disconnect(&self, session: SessionId) {
        self.gateway.disconnect(session);
    }

    /// Relaie chaque notification de présence vers toutes les sessions
    pub fn spawn_presence_forwarder(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut notices = self.registry.subscribe();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notice = notices.recv() => match notice {
                        Ok(notice) => {
                            gateway.broadcast(&SessionFrame::presence(&notice.snapshot));
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "presence forwarder lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("presence forwarder stopped");
        })
    }
}
