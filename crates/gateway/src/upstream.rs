//! Per-game-server upstream reader: decodes the inbound TCP stream and
//! demuxes frames back to their sessions' WebSockets.

use crate::client::ClientRegistry;
use crate::error::Result;
use crate::fleet::GameServer;
use bytes::BytesMut;
use metrics::counter;
use protocol::{Frame, LoginResp, MSG_KICK_PLAYER, MSG_LOGIN_RESP};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Dial `server` if it has no live connection and start its reader task.
pub async fn ensure_connected(
    server: &Arc<GameServer>,
    clients: &Arc<ClientRegistry>,
) -> Result<()> {
    if server.is_connected() {
        return Ok(());
    }
    let (read_half, closed_rx) = server.connect().await?;
    spawn_reader(server.clone(), read_half, closed_rx, clients.clone());
    Ok(())
}

/// Spawn the reader task owning `read_half`.
pub fn spawn_reader(
    server: Arc<GameServer>,
    read_half: OwnedReadHalf,
    closed_rx: watch::Receiver<()>,
    clients: Arc<ClientRegistry>,
) {
    tokio::spawn(run_reader(server, read_half, closed_rx, clients));
}

/// Read loop for one game-server connection.
///
/// Frames may split or coalesce across TCP reads, so bytes accumulate in
/// a per-connection buffer and complete frames are drained after each
/// read. Exits on read error, EOF, malformed framing, or when the fleet
/// registry closes the connection out from under it.
pub async fn run_reader(
    server: Arc<GameServer>,
    mut read_half: OwnedReadHalf,
    mut closed_rx: watch::Receiver<()>,
    clients: Arc<ClientRegistry>,
) {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut scratch = [0u8; 4096];

    info!(server = %server.id, "upstream reader started");

    loop {
        tokio::select! {
            // The sender half lives inside the server's connection state;
            // it erroring out means the connection was torn down.
            _ = closed_rx.changed() => {
                debug!(server = %server.id, "upstream reader stopping, connection closed");
                break;
            }

            read = read_half.read(&mut scratch) => match read {
                Ok(0) => {
                    warn!(server = %server.id, "game server closed the connection");
                    server.close_conn().await;
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&scratch[..n]);
                    if let Err(e) = drain_frames(&server, &mut buffer, &clients).await {
                        // A bad length field means the stream is misaligned;
                        // rediscovery reopens a clean connection.
                        warn!(server = %server.id, error = %e, "malformed framing from game server, closing connection");
                        counter!("gateway_upstream_malformed_total").increment(1);
                        server.close_conn().await;
                        break;
                    }
                }
                Err(e) => {
                    warn!(server = %server.id, error = %e, "read from game server failed");
                    server.close_conn().await;
                    break;
                }
            }
        }
    }

    info!(server = %server.id, "upstream reader exited");
}

async fn drain_frames(
    server: &Arc<GameServer>,
    buffer: &mut BytesMut,
    clients: &Arc<ClientRegistry>,
) -> std::result::Result<(), protocol::FrameError> {
    while let Some(frame) = Frame::decode(buffer)? {
        dispatch(server, frame, clients).await;
    }
    Ok(())
}

async fn dispatch(server: &Arc<GameServer>, frame: Frame, clients: &Arc<ClientRegistry>) {
    match frame.msg_id {
        MSG_LOGIN_RESP => handle_login_resp(server, frame, clients).await,
        MSG_KICK_PLAYER => handle_kick(frame, clients).await,
        _ => {
            // Opaque relay back to the session's WebSocket.
            match clients.get(&frame.session_id) {
                Some(client) => {
                    if client.send_frame(&frame).is_err() {
                        debug!(session = %frame.session_id, "client writer gone, dropping frame");
                    } else {
                        counter!("gateway_frames_relayed_down_total").increment(1);
                    }
                }
                None => {
                    debug!(
                        session = %frame.session_id,
                        msg_id = format_args!("{:#x}", frame.msg_id),
                        "no client for session, dropping frame"
                    );
                }
            }
        }
    }
}

async fn handle_login_resp(server: &Arc<GameServer>, frame: Frame, clients: &Arc<ClientRegistry>) {
    let Some(client) = clients.get(&frame.session_id) else {
        warn!(session = %frame.session_id, "no client for login response, discarding");
        return;
    };

    let resp: LoginResp = match serde_json::from_slice(&frame.payload) {
        Ok(resp) => resp,
        Err(e) => {
            warn!(server = %server.id, error = %e, "unparseable login response, discarding");
            return;
        }
    };

    if client.send_frame(&frame).is_err() {
        warn!(session = %frame.session_id, "failed to deliver login response");
    }

    if resp.code == 0 {
        client.bind_server(&server.id).await;
        counter!("gateway_logins_succeeded_total").increment(1);
        info!(
            loginname = %resp.loginname,
            session = %frame.session_id,
            server = %server.id,
            "login confirmed, session bound"
        );
    } else {
        counter!("gateway_logins_rejected_total").increment(1);
        warn!(
            loginname = %resp.loginname,
            code = resp.code,
            message = %resp.message,
            "login rejected by game server, dropping client"
        );
        client.kick();
        clients.remove(&frame.session_id);
    }
}

async fn handle_kick(frame: Frame, clients: &Arc<ClientRegistry>) {
    let Some(client) = clients.get(&frame.session_id) else {
        warn!(session = %frame.session_id, "no client for kick notice");
        return;
    };

    if let Ok(notice) = serde_json::from_slice::<protocol::KickNotify>(&frame.payload) {
        info!(session = %frame.session_id, reason = %notice.reason, "player kicked by game server");
    } else {
        info!(session = %frame.session_id, "player kicked by game server");
    }

    // Let the client see the notice before the socket drops.
    let _ = client.send_frame(&frame);
    client.kick();
    clients.remove(&frame.session_id);
    counter!("gateway_kicks_total").increment(1);
}
