//! Binary frame codec shared by the WebSocket and TCP hops.
//!
//! Frame format:
//! ```text
//! +----------+----------+---------------+------------------+
//! | length   | msg_id   | session_id    | payload          |
//! | (4 B, BE)| (4 B, BE)| (32 B, NUL-   | (length - 40 B)  |
//! |          |          |  padded UTF-8)|                  |
//! +----------+----------+---------------+------------------+
//! ```
//!
//! The `length` field counts itself, so `length = 40 + payload.len()`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Header size: 4 bytes length + 4 bytes msg_id + 32 bytes session_id.
pub const HEADER_LEN: usize = 40;

/// Width of the fixed session-ID slot in the header.
pub const SESSION_ID_SLOT: usize = 32;

/// Maximum total frame length (1 MiB). Caps per-connection buffering.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Decode failure. Need-more-data is not an error; `decode` signals it
/// with `Ok(None)`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} is shorter than the {HEADER_LEN}-byte header")]
    LengthTooShort(u32),

    #[error("frame length {0} exceeds the {MAX_FRAME_LEN}-byte cap")]
    Oversized(u32),
}

/// A single decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u32,
    /// Logical session ID with the header slot's trailing NULs stripped.
    pub session_id: String,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(msg_id: u32, session_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_id,
            session_id: session_id.into(),
            payload: payload.into(),
        }
    }

    /// Frame with an empty payload (control notices).
    pub fn empty(msg_id: u32, session_id: impl Into<String>) -> Self {
        Self::new(msg_id, session_id, Bytes::new())
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode into `buf`. Session IDs longer than 32 bytes are truncated,
    /// shorter ones NUL-padded to fill the slot.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32(self.encoded_len() as u32);
        buf.put_u32(self.msg_id);

        let sid = self.session_id.as_bytes();
        let copy = sid.len().min(SESSION_ID_SLOT);
        buf.put_slice(&sid[..copy]);
        buf.put_bytes(0, SESSION_ID_SLOT - copy);

        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh `Bytes`.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` and advances the buffer when a whole
    /// frame is present, `Ok(None)` when more bytes are needed, and an
    /// error for a malformed length field. On error the buffer is left
    /// untouched so the caller can decide whether to drop the connection.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (length as usize) < HEADER_LEN {
            return Err(FrameError::LengthTooShort(length));
        }
        if length as usize > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(length));
        }
        if buf.len() < length as usize {
            return Ok(None);
        }

        let mut frame = buf.split_to(length as usize);
        frame.advance(4);
        let msg_id = frame.get_u32();

        let sid_raw = frame.split_to(SESSION_ID_SLOT);
        let sid_end = sid_raw
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        let session_id = String::from_utf8_lossy(&sid_raw[..sid_end]).into_owned();

        Ok(Some(Frame {
            msg_id,
            session_id,
            payload: frame.freeze(),
        }))
    }
}
