//! Client session state and registry.
//!
//! Uses lock-free DashMap for concurrent access from the WebSocket
//! accept path and every upstream reader task.

use crate::error::{GatewayError, Result};
use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::DashMap;
use protocol::Frame;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// State for a single connected client, keyed by its session ID.
pub struct ClientSession {
    /// Gateway-generated session ID (32-char URL-safe Base64).
    pub session_id: String,
    /// Client address derived at upgrade time; stamped into login requests.
    pub remote_ip: String,
    /// Channel to the task that owns the WebSocket write half. Pushing
    /// here is the only way to write to this client, which serializes
    /// writers from the client handler and the upstream readers.
    tx: mpsc::UnboundedSender<Message>,
    /// ID of the game server this session is bound to. Held as an ID, not
    /// a handle; the fleet registry resolves it on each use so fleet
    /// swaps never leave a dangling connection reference.
    bound_server: RwLock<Option<String>>,
    /// Timestamp when the client connected (millis).
    pub connected_at: i64,
}

impl ClientSession {
    pub fn new(session_id: String, remote_ip: String, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            session_id,
            remote_ip,
            tx,
            bound_server: RwLock::new(None),
            connected_at: Utc::now().timestamp_millis(),
        }
    }

    /// Queue an encoded frame for delivery to this client's WebSocket.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.tx
            .send(Message::Binary(frame.encode_to_bytes()))
            .map_err(|_| GatewayError::ChannelSend)
    }

    /// Queue a close so the writer task shuts the WebSocket down.
    pub fn kick(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    pub async fn bind_server(&self, server_id: &str) {
        *self.bound_server.write().await = Some(server_id.to_string());
    }

    pub async fn bound_server(&self) -> Option<String> {
        self.bound_server.read().await.clone()
    }
}

/// Registry of connected clients: session ID → session.
pub struct ClientRegistry {
    clients: DashMap<String, Arc<ClientSession>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn add(&self, client: Arc<ClientSession>) {
        info!(session = %client.session_id, "client registered");
        self.clients.insert(client.session_id.clone(), client);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<ClientSession>> {
        let removed = self.clients.remove(session_id).map(|(_, c)| c);
        if removed.is_some() {
            debug!(session = %session_id, "client unregistered");
        }
        removed
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ClientSession>> {
        self.clients.get(session_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
