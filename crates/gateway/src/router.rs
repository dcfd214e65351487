//! Session router: the login flow that picks a game server for a fresh
//! session and wires the two hops together.
//!
//! Selection order: the shared affinity map first (a player already
//! online elsewhere must land on the same server), then least-loaded
//! among servers advertising the requested game type.

use crate::client::ClientSession;
use crate::upstream;
use crate::ws_server::AppState;
use async_trait::async_trait;
use external_services::KvClient;
use metrics::counter;
use protocol::{Frame, LoginReq, LoginResp, MSG_LOGIN_REQ, MSG_LOGIN_RESP};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Gateway-local login response codes. Code 0 and anything else non-zero
/// comes from the game server itself.
pub const CODE_KV_ERROR: i32 = 1;
pub const CODE_EMPTY_GAME_TYPE: i32 = 2;
pub const CODE_NO_SERVER: i32 = 3;
pub const CODE_CONNECT_FAILED: i32 = 4;
pub const CODE_MARSHAL_FAILED: i32 = 5;
pub const CODE_WRITE_FAILED: i32 = 6;

/// Affinity lookup seam. The production implementation is the pooled
/// Redis client; tests swap in an in-memory map.
#[async_trait]
pub trait AffinityLookup: Send + Sync {
    /// Which game server currently owns this player, if any.
    async fn player_server(&self, loginname: &str) -> external_services::Result<Option<String>>;
}

#[async_trait]
impl AffinityLookup for KvClient {
    async fn player_server(&self, loginname: &str) -> external_services::Result<Option<String>> {
        self.player_online_server(loginname).await
    }
}

/// Run the login flow for one `LoginReq` frame.
///
/// Every failure path answers the client with a `LoginResp` carrying a
/// local code; only transport-level problems with the client itself are
/// left to the caller's connection teardown.
pub async fn handle_login(state: &AppState, client: &Arc<ClientSession>, frame: &Frame) {
    let mut login_req: LoginReq = match serde_json::from_slice(&frame.payload) {
        Ok(req) => req,
        Err(e) => {
            warn!(
                session = %client.session_id,
                error = %e,
                "unparseable login request, dropping"
            );
            return;
        }
    };

    info!(
        session = %client.session_id,
        loginname = %login_req.loginname,
        game_type = %login_req.game_type,
        version = login_req.version,
        "processing login request"
    );
    counter!("gateway_logins_total").increment(1);

    // Affinity probe: a player already owned by a live server goes back
    // to that server regardless of game type or load.
    let mut target = None;
    match state.affinity.player_server(&login_req.loginname).await {
        Err(e) => {
            error!(loginname = %login_req.loginname, error = %e, "affinity lookup failed");
            send_login_response(
                client,
                &login_req.loginname,
                CODE_KV_ERROR,
                "Internal server error",
            );
            return;
        }
        Ok(Some(server_id)) => {
            warn!(
                loginname = %login_req.loginname,
                server = %server_id,
                "player already online, routing to owning server"
            );
            match state.fleet.get(&server_id).await {
                Some(server) => target = Some(server),
                None => warn!(
                    server = %server_id,
                    "affinity server no longer in fleet, selecting by load"
                ),
            }
        }
        Ok(None) => {}
    }

    let target = match target {
        Some(server) => server,
        None => {
            if login_req.game_type.is_empty() {
                warn!(loginname = %login_req.loginname, "login request without game type");
                send_login_response(
                    client,
                    &login_req.loginname,
                    CODE_EMPTY_GAME_TYPE,
                    "GameType is empty",
                );
                return;
            }
            match state.fleet.pick_least_loaded(&login_req.game_type).await {
                Some(server) => server,
                None => {
                    warn!(game_type = %login_req.game_type, "no game server for game type");
                    send_login_response(
                        client,
                        &login_req.loginname,
                        CODE_NO_SERVER,
                        "No game server available",
                    );
                    return;
                }
            }
        }
    };

    if let Err(e) = upstream::ensure_connected(&target, &state.clients).await {
        error!(server = %target.id, error = %e, "failed to connect to game server");
        send_login_response(
            client,
            &login_req.loginname,
            CODE_CONNECT_FAILED,
            "Failed to connect to game server",
        );
        return;
    }

    // The gateway-derived address wins over anything the client sent.
    login_req.client_ip = client.remote_ip.clone();

    let payload = match serde_json::to_vec(&login_req) {
        Ok(payload) => payload,
        Err(e) => {
            error!(loginname = %login_req.loginname, error = %e, "failed to marshal login request");
            send_login_response(
                client,
                &login_req.loginname,
                CODE_MARSHAL_FAILED,
                "Internal server error",
            );
            return;
        }
    };

    let out = Frame::new(MSG_LOGIN_REQ, client.session_id.clone(), payload);
    if let Err(e) = target.send_frame(&out).await {
        error!(server = %target.id, error = %e, "failed to send login request");
        send_login_response(
            client,
            &login_req.loginname,
            CODE_WRITE_FAILED,
            "Failed to communicate with game server",
        );
        return;
    }

    // Tentative binding so relayed frames have a destination; confirmed
    // (or torn down) when the game server's LoginResp comes back.
    client.bind_server(&target.id).await;
    info!(
        session = %client.session_id,
        server = %target.id,
        "login forwarded, awaiting game server response"
    );
}

/// Answer the client with a gateway-generated `LoginResp`.
pub fn send_login_response(client: &ClientSession, loginname: &str, code: i32, message: &str) {
    let resp = LoginResp {
        loginname: loginname.to_string(),
        code,
        message: message.to_string(),
        info: None,
    };

    let payload = match serde_json::to_vec(&resp) {
        Ok(payload) => payload,
        Err(e) => {
            error!(loginname, error = %e, "failed to marshal login response");
            return;
        }
    };

    let frame = Frame::new(MSG_LOGIN_RESP, client.session_id.clone(), payload);
    if client.send_frame(&frame).is_err() {
        warn!(session = %client.session_id, "failed to queue login response");
    }
    counter!("gateway_local_login_failures_total").increment(1);
}

/// In-memory affinity map for tests and local runs without Redis.
#[derive(Default)]
pub struct StaticAffinity {
    entries: std::collections::HashMap<String, String>,
}

impl StaticAffinity {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AffinityLookup for StaticAffinity {
    async fn player_server(&self, loginname: &str) -> external_services::Result<Option<String>> {
        Ok(self.entries.get(loginname).cloned())
    }
}

/// Affinity stub whose lookups always fail; exercises the KV error path.
pub struct FailingAffinity;

#[async_trait]
impl AffinityLookup for FailingAffinity {
    async fn player_server(&self, _loginname: &str) -> external_services::Result<Option<String>> {
        Err(external_services::Error::Timeout)
    }
}
