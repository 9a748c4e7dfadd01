//! Widget gateway HTTP + WebSocket server (single port).
//!
//! Each WebSocket connection is one widget session with its own conversations;
//! nothing is shared between connections except the agent registry and transport.

use crate::agents::{AgentKey, AgentRegistry, UnknownAgent};
use crate::config::{self, Config};
use crate::dialogue::DialogueController;
use crate::gateway::protocol::{
    ActivateParams, ConnectParams, FeedbackParams, HelloOk, SnapshotParams, SubmitParams,
    WsEvent, WsRequest, WsResponse,
};
use crate::transport::{AgentTransport, HttpTransport};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const PROTOCOL_VERSION: u32 = 1;

const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown","payload":{}}"#;

/// Shared state for the gateway (config, agents, transport).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: AgentRegistry,
    pub transport: Arc<dyn AgentTransport>,
    /// Broadcasts server-wide events (shutdown) to connected clients.
    pub event_tx: broadcast::Sender<String>,
}

impl GatewayState {
    pub fn new(config: Config, transport: Arc<dyn AgentTransport>) -> Self {
        let registry = AgentRegistry::from_config(&config.agents);
        let (event_tx, _) = broadcast::channel(16);
        Self {
            config: Arc::new(config),
            registry,
            transport,
            event_tx,
        }
    }
}

/// Build the HTTP transport from config and run the gateway until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    let endpoint = config::resolve_endpoint(&config);
    let timeout = Duration::from_secs(config.transport.timeout_secs.max(1));
    let transport = HttpTransport::new(endpoint.clone(), timeout)
        .context("building agent transport")?;
    log::info!("agent endpoint: {}", endpoint);
    serve(GatewayState::new(config, Arc::new(transport))).await
}

/// Bind and serve the given state.
pub async fn serve(state: GatewayState) -> Result<()> {
    let bind_addr = format!("{}:{}", state.config.server.bind.trim(), state.config.server.port);
    let event_tx = state.event_tx.clone();
    let app = Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_tx))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event so WebSocket sessions close.
async fn shutdown_signal(event_tx: broadcast::Sender<String>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, closing widget sessions");
    let _ = event_tx.send(SHUTDOWN_EVENT_JSON.to_string());
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let agents: Vec<AgentKey> = state.registry.profiles().map(|p| p.key).collect();
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.server.port,
        "agents": agents,
    }))
}

/// GET /ws upgrades to WebSocket. First frame must be connect; we reply with hello-ok.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame<T: Serialize>(socket: &mut WebSocket, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            log::warn!("ws: failed to serialize frame: {}", e);
            true
        }
    }
}

/// Highest protocol both sides speak, or an error when the client's range excludes ours.
fn negotiate_protocol(params: &ConnectParams) -> Result<u32, String> {
    let min = params.min_protocol.unwrap_or(PROTOCOL_VERSION);
    let max = params.max_protocol.unwrap_or(PROTOCOL_VERSION);
    if min > PROTOCOL_VERSION || max < min {
        return Err(format!(
            "unsupported protocol: client speaks {}..={}, server speaks {}",
            min, max, PROTOCOL_VERSION
        ));
    }
    Ok(max.min(PROTOCOL_VERSION))
}

/// Agent named in params, or the active one when absent.
async fn resolve_agent(
    controller: &DialogueController,
    name: Option<&str>,
) -> Result<AgentKey, UnknownAgent> {
    match name {
        Some(n) => Ok(controller.registry().resolve(n)?.key),
        None => Ok(controller.active().await),
    }
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let controller = DialogueController::new(state.registry.clone(), state.transport.clone());
    let mut widget_rx = controller.subscribe().await;
    let mut shutdown_rx = state.event_tx.subscribe();
    let mut connected = false;

    loop {
        tokio::select! {
            biased;

            event = shutdown_rx.recv() => {
                match event {
                    Ok(text) => {
                        let _ = socket.send(Message::Text(text)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            event = widget_rx.recv() => {
                match event {
                    Ok(event) => {
                        if connected && !send_frame(&mut socket, &WsEvent::from(event)).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} widget events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(req): Result<WsRequest, _> = serde_json::from_str(&text) else { continue };
                if req.typ != "req" {
                    continue;
                }
                if !connected && req.method != "connect" {
                    send_frame(&mut socket, &WsResponse::err(&req.id, "connect required")).await;
                    continue;
                }
                let res = match req.method.as_str() {
                    "connect" => {
                        let params: ConnectParams =
                            serde_json::from_value(req.params.clone()).unwrap_or_default();
                        log::debug!(
                            "ws: connect from {}",
                            params.client.id.as_deref().unwrap_or("unknown client")
                        );
                        match negotiate_protocol(&params) {
                            Err(e) => WsResponse::err(&req.id, e),
                            Ok(protocol) => {
                                controller.activate(controller.active().await).await;
                                connected = true;
                                let hello = HelloOk {
                                    typ: "hello-ok".to_string(),
                                    protocol,
                                    agents: state.registry.profiles().cloned().collect(),
                                    active: controller.active().await,
                                };
                                WsResponse::ok(&req.id, serde_json::to_value(&hello).unwrap_or(json!({})))
                            }
                        }
                    }
                    "health" => WsResponse::ok(
                        &req.id,
                        json!({ "runtime": "running", "protocol": PROTOCOL_VERSION }),
                    ),
                    "agents" => {
                        let agents: Vec<_> = state.registry.profiles().cloned().collect();
                        WsResponse::ok(&req.id, json!({ "agents": agents }))
                    }
                    "activate" => match serde_json::from_value::<ActivateParams>(req.params.clone()) {
                        Err(_) => WsResponse::err(&req.id, "invalid activate params"),
                        Ok(params) => match controller.registry().resolve(&params.agent) {
                            Err(e) => WsResponse::err(&req.id, e.to_string()),
                            Ok(profile) => {
                                let key = profile.key;
                                controller.activate(key).await;
                                WsResponse::ok(&req.id, json!({ "active": key }))
                            }
                        },
                    },
                    "submit" => match serde_json::from_value::<SubmitParams>(req.params.clone()) {
                        Err(_) => WsResponse::err(&req.id, "invalid submit params"),
                        Ok(params) => match resolve_agent(&controller, params.agent.as_deref()).await {
                            Err(e) => WsResponse::err(&req.id, e.to_string()),
                            Ok(key) => match controller.begin(key, &params.message).await {
                                Some(pending) => {
                                    let ctl = controller.clone();
                                    tokio::spawn(async move {
                                        ctl.complete(pending).await;
                                    });
                                    WsResponse::ok(&req.id, json!({ "accepted": true, "agent": key }))
                                }
                                None => WsResponse::ok(&req.id, json!({ "accepted": false, "agent": key })),
                            },
                        },
                    },
                    "feedback" => match serde_json::from_value::<FeedbackParams>(req.params.clone()) {
                        Err(_) => WsResponse::err(&req.id, "invalid feedback params"),
                        Ok(params) => match controller.registry().resolve(&params.agent) {
                            Err(e) => WsResponse::err(&req.id, e.to_string()),
                            Ok(profile) => {
                                let updated = controller
                                    .set_feedback(profile.key, params.message_id, params.value)
                                    .await;
                                WsResponse::ok(&req.id, json!({ "updated": updated }))
                            }
                        },
                    },
                    "snapshot" => {
                        let params: SnapshotParams =
                            serde_json::from_value(req.params.clone()).unwrap_or_default();
                        match resolve_agent(&controller, params.agent.as_deref()).await {
                            Err(e) => WsResponse::err(&req.id, e.to_string()),
                            Ok(key) => {
                                let snapshot = controller.snapshot(key).await;
                                WsResponse::ok(
                                    &req.id,
                                    serde_json::to_value(&snapshot).unwrap_or(json!({})),
                                )
                            }
                        }
                    }
                    "close" => {
                        controller.close().await;
                        WsResponse::ok(&req.id, json!({ "closed": true }))
                    }
                    _ => WsResponse::err(&req.id, format!("unknown method: {}", req.method)),
                };
                if !send_frame(&mut socket, &res).await {
                    break;
                }
            }
        }
    }

    if !connected {
        log::debug!("ws client disconnected before sending connect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min: Option<u32>, max: Option<u32>) -> ConnectParams {
        ConnectParams {
            min_protocol: min,
            max_protocol: max,
            ..Default::default()
        }
    }

    #[test]
    fn negotiates_highest_shared_protocol() {
        assert_eq!(negotiate_protocol(&params(None, None)), Ok(PROTOCOL_VERSION));
        assert_eq!(negotiate_protocol(&params(Some(1), Some(3))), Ok(PROTOCOL_VERSION));
    }

    #[test]
    fn rejects_client_that_requires_a_newer_protocol() {
        let err = negotiate_protocol(&params(Some(PROTOCOL_VERSION + 1), None)).unwrap_err();
        assert!(err.starts_with("unsupported protocol"), "{}", err);
        assert!(negotiate_protocol(&params(Some(1), Some(0))).is_err());
    }
}
