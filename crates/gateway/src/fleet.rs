//! Game-server fleet state: per-server connection handles and the
//! registry the discovery loop swaps wholesale.

use crate::error::{GatewayError, Result};
use chrono::Utc;
use metrics::gauge;
use socket2::{SockRef, TcpKeepalive};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

/// Hard dial deadline for game-server connections.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Keep-alive idle time on established game-server connections; this is
/// what detects dead peers, there is no per-message read deadline.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = SockRef::from(stream);
    sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    Ok(())
}

/// Write half of one dialed connection. The watch sender is never sent
/// on; dropping it (with the connection) is what tells the paired reader
/// task to exit, and every dial gets a fresh channel so a stale signal
/// can never leak into a redialed connection.
struct Conn {
    writer: OwnedWriteHalf,
    _closed_tx: watch::Sender<()>,
}

/// One game server as seen through discovery, with its (lazily dialed)
/// persistent TCP connection.
///
/// The write half lives behind a mutex because many client-handler tasks
/// fan into it; frames must not interleave. The read half is handed to a
/// single upstream-reader task at connect time.
pub struct GameServer {
    pub id: String,
    pub ip: String,
    pub port: u16,
    game_types: RwLock<Vec<String>>,
    load: AtomicI32,
    updated_at: AtomicI64,
    conn: Mutex<Option<Conn>>,
    connected: AtomicBool,
}

impl GameServer {
    pub fn new(id: String, ip: String, port: u16, game_types: Vec<String>, load: i32) -> Self {
        Self {
            id,
            ip,
            port,
            game_types: RwLock::new(game_types),
            load: AtomicI32::new(load),
            updated_at: AtomicI64::new(Utc::now().timestamp_millis()),
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub async fn supports(&self, game_type: &str) -> bool {
        self.game_types
            .read()
            .await
            .iter()
            .any(|gt| gt == game_type)
    }

    pub async fn game_types(&self) -> Vec<String> {
        self.game_types.read().await.clone()
    }

    pub fn load(&self) -> i32 {
        self.load.load(Ordering::Relaxed)
    }

    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at.load(Ordering::Relaxed)
    }

    /// Refresh discovery metadata on a carried-over server. The live
    /// connection, if any, is untouched.
    pub async fn set_meta(&self, game_types: Vec<String>, load: i32) {
        *self.game_types.write().await = game_types;
        self.load.store(load, Ordering::Relaxed);
        self.updated_at
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Dial the server (3 s deadline, keep-alive enabled), keep the write
    /// half, and return the read half plus the close signal for the
    /// upstream reader the caller spawns.
    pub async fn connect(&self) -> Result<(OwnedReadHalf, watch::Receiver<()>)> {
        let addr = format!("{}:{}", self.ip, self.port);
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                GatewayError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial {addr} timed out"),
                ))
            })??;
        configure_stream(&stream)?;

        let (read_half, write_half) = stream.into_split();
        let (closed_tx, closed_rx) = watch::channel(());
        *self.conn.lock().await = Some(Conn {
            writer: write_half,
            _closed_tx: closed_tx,
        });
        self.connected.store(true, Ordering::Release);
        info!(server = %self.id, addr, "connected to game server");
        Ok((read_half, closed_rx))
    }

    /// Write one whole frame under the connection's writer lock.
    ///
    /// A failed write tears the connection state down; discovery will
    /// redial on its next reconciliation that still lists this server.
    pub async fn send_frame(&self, frame: &protocol::Frame) -> Result<()> {
        let bytes = frame.encode_to_bytes();
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| GatewayError::NotConnected(self.id.clone()))?;

        if let Err(e) = conn.writer.write_all(&bytes).await {
            warn!(server = %self.id, error = %e, "write to game server failed, dropping connection");
            guard.take();
            self.connected.store(false, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the connection, which also stops its upstream reader.
    /// Returns whether a live connection was actually closed; the state
    /// can only ever be taken out once.
    pub async fn close_conn(&self) -> bool {
        let had_conn = self.conn.lock().await.take().is_some();
        self.connected.store(false, Ordering::Release);
        if had_conn {
            info!(server = %self.id, "closed game server connection");
        }
        had_conn
    }
}

/// Registry of the live fleet: server ID → server. Readers see a
/// consistent snapshot; the discovery loop swaps the whole map at once.
pub struct FleetRegistry {
    servers: RwLock<HashMap<String, Arc<GameServer>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<GameServer>> {
        self.servers.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Copy of the current mapping, used by the discovery loop to carry
    /// live servers across a refresh.
    pub async fn snapshot(&self) -> HashMap<String, Arc<GameServer>> {
        self.servers.read().await.clone()
    }

    /// All servers advertising support for `game_type`.
    pub async fn servers_by_game_type(&self, game_type: &str) -> Vec<Arc<GameServer>> {
        let servers = self.servers.read().await;
        let mut matching = Vec::new();
        for server in servers.values() {
            if server.supports(game_type).await {
                matching.push(server.clone());
            }
        }
        matching
    }

    /// Least-loaded server supporting `game_type`. Ties go to the
    /// smallest server ID so selection is deterministic.
    pub async fn pick_least_loaded(&self, game_type: &str) -> Option<Arc<GameServer>> {
        let mut best: Option<(i32, Arc<GameServer>)> = None;
        for server in self.servers_by_game_type(game_type).await {
            let load = server.load();
            let better = match &best {
                None => true,
                Some((best_load, best_server)) => {
                    load < *best_load || (load == *best_load && server.id < best_server.id)
                }
            };
            if better {
                best = Some((load, server));
            }
        }
        best.map(|(_, s)| s)
    }

    /// Install a freshly reconciled fleet. Servers whose ID disappeared
    /// get their connection closed (exactly once) after the swap, which
    /// also stops their reader tasks.
    pub async fn replace_all(&self, next: HashMap<String, Arc<GameServer>>) {
        let dropped: Vec<Arc<GameServer>> = {
            let mut guard = self.servers.write().await;
            let dropped = guard
                .values()
                .filter(|s| !next.contains_key(&s.id))
                .cloned()
                .collect();
            *guard = next;
            dropped
        };

        for server in dropped {
            server.close_conn().await;
        }

        gauge!("gateway_fleet_size").set(self.len().await as f64);
    }
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, game_type: &str, load: i32) -> Arc<GameServer> {
        Arc::new(GameServer::new(
            id.to_string(),
            "127.0.0.1".to_string(),
            0,
            vec![game_type.to_string()],
            load,
        ))
    }

    async fn fleet_of(servers: Vec<Arc<GameServer>>) -> FleetRegistry {
        let registry = FleetRegistry::new();
        let map = servers.into_iter().map(|s| (s.id.clone(), s)).collect();
        registry.replace_all(map).await;
        registry
    }

    #[tokio::test]
    async fn picks_least_loaded_per_game_type() {
        let registry = fleet_of(vec![
            server("A", "gt", 7),
            server("B", "gt", 3),
            server("C", "gt2", 1),
        ])
        .await;

        assert_eq!(registry.pick_least_loaded("gt").await.unwrap().id, "B");
        assert_eq!(registry.pick_least_loaded("gt2").await.unwrap().id, "C");
        assert!(registry.pick_least_loaded("zz").await.is_none());

        assert_eq!(registry.servers_by_game_type("gt").await.len(), 2);
        assert!(registry.servers_by_game_type("zz").await.is_empty());
    }

    #[tokio::test]
    async fn ties_break_to_smallest_id() {
        let registry = fleet_of(vec![
            server("gs-b", "gt", 5),
            server("gs-a", "gt", 5),
            server("gs-c", "gt", 5),
        ])
        .await;

        assert_eq!(registry.pick_least_loaded("gt").await.unwrap().id, "gs-a");
    }

    #[tokio::test]
    async fn replace_drops_absent_ids() {
        let a = server("A", "gt", 1);
        let b = server("B", "gt", 2);
        let registry = fleet_of(vec![a.clone(), b.clone()]).await;
        assert_eq!(registry.len().await, 2);

        let next = HashMap::from([("B".to_string(), b.clone())]);
        registry.replace_all(next).await;

        assert!(registry.get("A").await.is_none());
        assert_eq!(registry.get("B").await.unwrap().id, "B");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn meta_refresh_updates_selection() {
        let a = server("A", "gt", 1);
        let registry = fleet_of(vec![a.clone()]).await;

        a.set_meta(vec!["other".to_string()], 9).await;
        assert!(registry.pick_least_loaded("gt").await.is_none());
        assert_eq!(registry.pick_least_loaded("other").await.unwrap().id, "A");
        assert_eq!(a.load(), 9);
    }

    #[tokio::test]
    async fn send_without_connection_errors() {
        let a = server("A", "gt", 1);
        let frame = protocol::Frame::empty(protocol::MSG_HEARTBEAT, "s");
        assert!(matches!(
            a.send_frame(&frame).await,
            Err(GatewayError::NotConnected(_))
        ));
    }
}
