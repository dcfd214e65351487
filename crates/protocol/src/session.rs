//! Session-ID generation.
//!
//! 24 raw bytes — an 8-byte big-endian wall-clock nanosecond timestamp
//! followed by 16 bytes of OS randomness — encoded as unpadded URL-safe
//! Base64. 24 bytes encode to exactly 32 characters, filling the fixed
//! session-ID slot of the frame header byte-for-byte.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of a generated session ID in characters.
pub const SESSION_ID_LEN: usize = 32;

/// Generate a fresh session ID. IDs are opaque after generation.
pub fn generate_session_id() -> String {
    let mut buf = [0u8; 24];

    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    buf[..8].copy_from_slice(&nanos.to_be_bytes());

    OsRng.fill_bytes(&mut buf[8..]);

    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SESSION_ID_SLOT;
    use std::collections::HashSet;

    #[test]
    fn id_is_exactly_32_urlsafe_chars() {
        for _ in 0..100 {
            let id = generate_session_id();
            assert_eq!(id.len(), SESSION_ID_LEN);
            assert_eq!(id.len(), SESSION_ID_SLOT);
            assert!(id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        }
    }

    #[test]
    fn rapid_generation_is_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_session_id()));
        }
    }

    #[test]
    fn decodes_back_to_24_bytes() {
        let id = generate_session_id();
        let raw = URL_SAFE_NO_PAD.decode(id.as_bytes()).unwrap();
        assert_eq!(raw.len(), 24);
    }
}
