/**
 * CAMPER KERNEL - Point d'entrée du pont MQTT <-> dashboards
 *
 * RÔLE : Orchestration : config, registre de présence, bridge, MQTT, HTTP/WebSocket.
 * Les modules ESP32 parlent au broker, les dashboards parlent en websocket, le kernel traduit.
 *
 * ARCHITECTURE : une tâche par boucle longue (MQTT, publication, sweep, relais présence, sessions).
 * ARRÊT : Ctrl-C => arrêt gracieux axum, signal watch, attente du sweeper.
 */

use anyhow::Context;
use camper_kernel::bridge::Bridge;
use camper_kernel::config::load_config;
use camper_kernel::gateway::SessionGateway;
use camper_kernel::health::HealthTracker;
use camper_kernel::http::{build_router, AppState};
use camper_kernel::mqtt;
use camper_kernel::registry::LivenessRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // registre + passerelle + bridge
    let registry = LivenessRegistry::new(cfg.registry.heartbeat_timeout());
    let gateway = SessionGateway::new(cfg.sessions.outbound_buffer);
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(Bridge::new(&cfg, registry.clone(), gateway, outbox_tx));
    let health_tracker = HealthTracker::new();

    // MQTT : écoute + publication
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg);
    let listener_task = mqtt::spawn_mqtt_listener(
        client.clone(),
        eventloop,
        Arc::clone(&bridge),
        health_tracker.clone(),
        cfg.topics.namespace.clone(),
        shutdown_rx.clone(),
    );
    let publisher_task = mqtt::spawn_publisher(client, outbox_rx, shutdown_rx.clone());

    // sweep offline + relais des changements de présence
    let sweeper = registry.spawn_sweeper(cfg.registry.check_interval(), shutdown_rx.clone());
    let forwarder = bridge.spawn_presence_forwarder(shutdown_rx);

    // HTTP + websocket
    let app = build_router(AppState {
        bridge,
        health_tracker,
    });
    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("cannot bind {}", cfg.http.bind))?;
    info!(
        addr = %cfg.http.bind,
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        namespace = %cfg.topics.namespace,
        "camper kernel listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {e}");
            }
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;

    let _ = shutdown_tx.send(true);
    for (name, task) in [
        ("sweeper", sweeper),
        ("presence forwarder", forwarder),
        ("mqtt listener", listener_task),
        ("mqtt publisher", publisher_task),
    ] {
        if let Err(e) = task.await {
            warn!(task = name, "task ended abnormally: {e}");
        }
    }
    info!("camper kernel stopped");
    Ok(())
}
