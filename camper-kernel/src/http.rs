/**
 * API HTTP + WEBSOCKET - Surface minimale du kernel camping-car
 *
 * RÔLE :
 * Santé du process, vue du registre de présence et transport des sessions dashboard.
 *
 * FONCTIONNEMENT :
 * - GET /health : "ok"
 * - GET /system/health : uptime, modules suivis/online, sessions, état MQTT, mémoire
 * - GET /devices, /devices/{id} : snapshot de présence (statut calculé à la lecture)
 * - GET /ws : session websocket, trames {event, data} dans les deux sens
 */

use crate::bridge::Bridge;
use crate::health::{HealthTracker, KernelHealth};
use crate::registry::{PresenceRecord, PresenceSnapshot};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::{routing::get, Json, Router};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub health_tracker: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/devices", get(get_devices))
        .route("/devices/{id}", get(get_device))
        .route("/ws", get(ws_upgrade))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(app.bridge.registry(), app.bridge.gateway()))
}

// GET /devices (snapshot)
async fn get_devices(State(app): State<AppState>) -> Json<PresenceSnapshot> {
    Json(app.bridge.registry().snapshot())
}

// GET /devices/{id} (détail)
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PresenceRecord>, StatusCode> {
    let Some(record) = app.bridge.registry().query(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(record))
}

// GET /ws
async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_session(app.bridge, socket))
}

async fn run_session(bridge: Arc<Bridge>, socket: WebSocket) {
    let (session, mut frames) = bridge.on_session_connect();
    let (mut sink, mut stream) = socket.split();

    // file de la session -> socket ; se termine quand la passerelle lâche la session
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("cannot encode frame: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let recv_bridge = Arc::clone(&bridge);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    // le rejet éventuel est déjà renvoyé à la session
                    let _ = recv_bridge.handle_session_text(session, text.as_str());
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(session = %session, "websocket error: {e}");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    bridge.on_session_disconnect(session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::gateway::SessionGateway;
    use crate::models::HeartbeatIn;
    use crate::registry::LivenessRegistry;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn serve() -> (String, Arc<Bridge>) {
        let cfg = KernelConfig::default();
        let registry = LivenessRegistry::new(cfg.registry.heartbeat_timeout());
        let gateway = SessionGateway::new(cfg.sessions.outbound_buffer);
        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Bridge::new(&cfg, registry, gateway, tx));
        let app = build_router(AppState {
            bridge: Arc::clone(&bridge),
            health_tracker: HealthTracker::new(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), bridge)
    }

    async fn get(url: &str) -> (u16, String) {
        // requête HTTP/1.1 minimale, sans client externe
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let without_scheme = url.trim_start_matches("http://");
        let (host, path) = without_scheme.split_once('/').unwrap();
        let mut stream = tokio::net::TcpStream::connect(host).await.unwrap();
        let request = format!("GET /{path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
        let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_device_routes() {
        let (base, bridge) = serve().await;
        bridge.registry().record_heartbeat("module-3", &HeartbeatIn::default());

        let (status, body) = get(&format!("{base}/health")).await;
        assert_eq!(status, 200);
        assert!(body.contains("ok"));

        let (status, body) = get(&format!("{base}/devices")).await;
        assert_eq!(status, 200);
        assert!(body.contains("module-3"));

        let (status, _) = get(&format!("{base}/devices/module-3")).await;
        assert_eq!(status, 200);
        let (status, _) = get(&format!("{base}/devices/module-9")).await;
        assert_eq!(status, 404);

        let (status, body) = get(&format!("{base}/system/health")).await;
        assert_eq!(status, 200);
        assert!(body.contains("devices_online"));
    }
}
