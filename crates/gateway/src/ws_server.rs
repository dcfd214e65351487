//! WebSocket server handler using Axum.
//!
//! One task per client reads frames off the WebSocket; a companion send
//! task owns the write half and drains a channel fed by both this module
//! and the upstream readers, so writes never interleave.

use crate::client::{ClientRegistry, ClientSession};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::fleet::FleetRegistry;
use crate::router::{self, AffinityLookup};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use protocol::{Frame, MSG_CONN_CLOSE, MSG_LOGIN_REQ};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub clients: Arc<ClientRegistry>,
    pub fleet: Arc<FleetRegistry>,
    pub affinity: Arc<dyn AffinityLookup>,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let clients = state.clients.len();
    let servers = state.fleet.len().await;
    format!(
        r#"{{"status":"ok","clients":{},"game_servers":{}}}"#,
        clients, servers
    )
}

/// WebSocket upgrade handler. Origin checks are intentionally permissive;
/// operators who want stricter policy put a reverse proxy in front.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if state.clients.len() >= state.config.gateway.max_connections {
        warn!(limit = state.config.gateway.max_connections, "connection limit reached, rejecting upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let client_ip = client_ip_from(&headers, peer);
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_ip))
        .into_response()
}

/// Real client address: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the peer address.
fn client_ip_from(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// Handle a WebSocket connection for its whole session lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_ip: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // All writes to this socket funnel through one channel drained here.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let session_id = protocol::generate_session_id();
    let client = Arc::new(ClientSession::new(session_id.clone(), client_ip, tx));
    state.clients.add(client.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.clients.len() as f64);
    info!(
        session = %session_id,
        ip = %client.remote_ip,
        total = state.clients.len(),
        "client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Binary(data))) => {
                if let Err(e) = handle_binary_message(&state, &client, data).await {
                    warn!(session = %session_id, error = %e, "relay failed, dropping client");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Text(_))) => {
                debug!(session = %session_id, "ignoring text message on binary protocol");
            }
            Some(Ok(_)) => {} // ping/pong handled by the library
            Some(Err(e)) => {
                warn!(session = %session_id, error = %e, "websocket error");
                break;
            }
        }
    }

    // Teardown: unregister first so upstream readers stop routing here,
    // then tell the bound server the player's transport is gone.
    state.clients.remove(&session_id);
    if let Some(server_id) = client.bound_server().await {
        if let Some(server) = state.fleet.get(&server_id).await {
            let notice = Frame::empty(MSG_CONN_CLOSE, session_id.clone());
            match server.send_frame(&notice).await {
                Ok(()) => debug!(session = %session_id, server = %server_id, "sent disconnect notice"),
                Err(e) => warn!(
                    session = %session_id,
                    server = %server_id,
                    error = %e,
                    "failed to send disconnect notice"
                ),
            }
        }
    }
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.clients.len() as f64);
    info!(session = %session_id, "client disconnected");
}

/// Decode and dispatch every complete frame in one binary message.
///
/// A malformed frame is logged and skipped without dropping the client;
/// only a failed relay write to the bound game server ends the session.
async fn handle_binary_message(
    state: &Arc<AppState>,
    client: &Arc<ClientSession>,
    data: Bytes,
) -> Result<()> {
    let mut buf = BytesMut::from(&data[..]);
    loop {
        match Frame::decode(&mut buf) {
            Ok(Some(frame)) => dispatch_frame(state, client, frame).await?,
            Ok(None) => {
                if !buf.is_empty() {
                    warn!(
                        session = %client.session_id,
                        remaining = buf.len(),
                        "incomplete frame in websocket message, discarding"
                    );
                    counter!("gateway_client_malformed_total").increment(1);
                }
                return Ok(());
            }
            Err(e) => {
                warn!(session = %client.session_id, error = %e, "malformed frame from client");
                counter!("gateway_client_malformed_total").increment(1);
                return Ok(());
            }
        }
    }
}

async fn dispatch_frame(
    state: &Arc<AppState>,
    client: &Arc<ClientSession>,
    frame: Frame,
) -> Result<()> {
    if frame.msg_id == MSG_LOGIN_REQ {
        router::handle_login(state, client, &frame).await;
        return Ok(());
    }

    // Everything else needs an established binding. The session ID inside
    // the received frame is never trusted for routing; the registry key is.
    let Some(server_id) = client.bound_server().await else {
        warn!(
            session = %client.session_id,
            msg_id = format_args!("{:#x}", frame.msg_id),
            "message before login, dropping"
        );
        counter!("gateway_unbound_frames_total").increment(1);
        return Ok(());
    };

    let Some(server) = state.fleet.get(&server_id).await else {
        return Err(GatewayError::ServerNotFound(server_id));
    };

    let out = Frame::new(frame.msg_id, client.session_id.clone(), frame.payload);
    server.send_frame(&out).await?;
    counter!("gateway_frames_relayed_up_total").increment(1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    fn peer() -> SocketAddr {
        "192.0.2.9:55000".parse().unwrap()
    }

    #[test]
    fn prefers_first_forwarded_for_hop() {
        let h = headers(&[("x-forwarded-for", "203.0.113.4, 10.0.0.1")]);
        assert_eq!(client_ip_from(&h, peer()), "203.0.113.4");
    }

    #[test]
    fn falls_back_to_real_ip() {
        let h = headers(&[("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_ip_from(&h, peer()), "198.51.100.7");
    }

    #[test]
    fn falls_back_to_peer_address() {
        assert_eq!(client_ip_from(&HeaderMap::new(), peer()), "192.0.2.9");
    }

    #[test]
    fn empty_forwarded_for_is_skipped() {
        let h = headers(&[("x-forwarded-for", " "), ("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_ip_from(&h, peer()), "198.51.100.7");
    }
}
