use crate::bridge::Bridge;
use crate::config::KernelConfig;
use crate::health::HealthTracker;
use crate::translator::OutboundCommand;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub fn create_mqtt_client(cfg: &KernelConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs.max(5)));
    AsyncClient::new(opts, 64)
}

/// Filtres souscrits à chaque ConnAck
pub fn subscriptions(namespace: &str) -> [String; 3] {
    [
        format!("{namespace}/heartbeat/+"),
        format!("{namespace}/sensors/#"),
        format!("{namespace}/errors/#"),
    ]
}

pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    bridge: Arc<Bridge>,
    health: HealthTracker,
    namespace: String,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = eventloop.poll() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    // resouscription à chaque (re)connexion
                    for filter in subscriptions(&namespace) {
                        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                            error!(filter = %filter, "subscribe failed: {e}");
                        }
                    }
                    info!(namespace = %namespace, "mqtt connected");
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    bridge.handle_inbound(&p.topic, &p.payload);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    health.mark_mqtt_disconnected();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        let _ = client.try_disconnect();
        debug!("mqtt listener stopped");
    })
}

/// Vide l'outbox vers le broker, QoS 0, sans retain ni nouvelle tentative
pub fn spawn_publisher(
    client: AsyncClient,
    mut outbox: mpsc::UnboundedReceiver<OutboundCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let cmd = tokio::select! {
                cmd = outbox.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let payload = match serde_json::to_vec(&cmd.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(topic = %cmd.topic, "cannot encode command: {e}");
                    continue;
                }
            };
            match client.publish(cmd.topic.as_str(), QoS::AtMostOnce, false, payload).await {
                Ok(()) => debug!(topic = %cmd.topic, payload = %cmd.payload, "command published"),
                Err(e) => warn!(topic = %cmd.topic, "publish failed: {e}"),
            }
        }
        debug!("mqtt publisher stopped");
    })
}
