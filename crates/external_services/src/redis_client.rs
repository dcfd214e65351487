//! Shared Redis client for the player-affinity map.
//!
//! Game servers write `player:<loginname>:onlineInfo = <serverID>` (with
//! a short TTL) after each successful login; the gateway only reads it.
//! A single multiplexed connection manager is built at startup and cloned
//! per operation — never a client per request.

use crate::error::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

/// Key layout: `player:<loginname>:onlineInfo`.
pub const PLAYER_KEY_PREFIX: &str = "player:";
pub const PLAYER_KEY_SUFFIX: &str = ":onlineInfo";

/// Deadline applied to every KV operation.
const OP_TIMEOUT: Duration = Duration::from_secs(3);

/// Build the affinity key for a login name.
pub fn player_key(loginname: &str) -> String {
    format!("{PLAYER_KEY_PREFIX}{loginname}{PLAYER_KEY_SUFFIX}")
}

/// Pooled Redis client wrapper. Cheap to clone; all clones share the
/// underlying multiplexed connection.
#[derive(Clone)]
pub struct KvClient {
    conn: ConnectionManager,
}

impl KvClient {
    /// Connect to `address` (`host:port`), selecting `db`.
    pub async fn connect(address: &str, password: &str, db: i64) -> Result<Self> {
        let url = if password.is_empty() {
            format!("redis://{address}/{db}")
        } else {
            format!("redis://:{password}@{address}/{db}")
        };
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Which game server currently owns this player, if any.
    pub async fn player_online_server(&self, loginname: &str) -> Result<Option<String>> {
        let key = player_key(loginname);
        let mut conn = self.conn.clone();

        let value: Option<String> =
            tokio::time::timeout(OP_TIMEOUT, conn.get::<_, Option<String>>(&key))
                .await
                .map_err(|_| Error::Timeout)??;

        debug!(key, hit = value.is_some(), "affinity lookup");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(player_key("u1"), "player:u1:onlineInfo");
    }
}
