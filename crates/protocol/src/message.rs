//! Message IDs and the login payload types.
//!
//! Everything except the login pair is relayed opaquely by the gateway;
//! only `LoginReq`/`LoginResp` are ever parsed.

use serde::{Deserialize, Serialize};

/// Heartbeat, relayed opaquely in both directions.
pub const MSG_HEARTBEAT: u32 = 0x11000;

/// Login request, client → gateway → game server.
pub const MSG_LOGIN_REQ: u32 = 0x11001;

/// Login response, game server → gateway → client.
pub const MSG_LOGIN_RESP: u32 = 0x11002;

/// Client-disconnect notice, gateway → game server. Empty payload.
pub const MSG_CONN_CLOSE: u32 = 0x10001;

/// Kick-player notice, game server → gateway.
///
/// Historically this shared `0x10001` with the disconnect notice going the
/// other way; deployments of this gateway use a dedicated ID.
pub const MSG_KICK_PLAYER: u32 = 0x10002;

/// Login request payload. `client_ip` is overwritten by the gateway with
/// the address it derived for the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginReq {
    pub loginname: String,
    pub token: String,
    #[serde(default)]
    pub game_type: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub client_ip: String,
}

/// Login response payload. `code == 0` means the game server accepted the
/// login; codes 1..=6 are produced locally by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResp {
    pub loginname: String,
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<PlayerInfo>,
}

/// Player profile attached to a successful login response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub username: String,
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub vip: i32,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub currency: String,
}

/// Kick notice payload sent by a game server when it evicts a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickNotify {
    pub session_id: String,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_req_tolerates_missing_optional_fields() {
        let req: LoginReq =
            serde_json::from_str(r#"{"loginname":"u1","token":"t"}"#).unwrap();
        assert_eq!(req.loginname, "u1");
        assert_eq!(req.game_type, "");
        assert_eq!(req.version, 0);
        assert_eq!(req.client_ip, "");
    }

    #[test]
    fn login_resp_roundtrip_with_info() {
        let resp = LoginResp {
            loginname: "u1".into(),
            code: 0,
            message: "ok".into(),
            info: Some(PlayerInfo {
                username: "u1".into(),
                nickname: "Player One".into(),
                avatar: String::new(),
                vip: 2,
                balance: 150.5,
                currency: "USD".into(),
            }),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: LoginResp = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, 0);
        assert_eq!(back.info.unwrap().balance, 150.5);
    }

    #[test]
    fn failure_resp_omits_info() {
        let resp = LoginResp {
            loginname: "u1".into(),
            code: 3,
            message: "No game server available".into(),
            info: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("info"));
    }
}
