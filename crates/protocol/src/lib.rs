//! Wire protocol shared by the gateway's two hops.
//!
//! The same length-prefixed binary frame travels over each client
//! WebSocket (one frame per binary message) and over the persistent TCP
//! connections to the game servers (streamed, so frames may split or
//! coalesce across reads).

pub mod frame;
pub mod message;
pub mod session;

pub use frame::{Frame, FrameError, HEADER_LEN, MAX_FRAME_LEN, SESSION_ID_SLOT};
pub use message::{
    KickNotify, LoginReq, LoginResp, PlayerInfo, MSG_CONN_CLOSE, MSG_HEARTBEAT, MSG_KICK_PLAYER,
    MSG_LOGIN_REQ, MSG_LOGIN_RESP,
};
pub use session::{generate_session_id, SESSION_ID_LEN};
