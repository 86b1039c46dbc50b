//! Redis-backed dedup store using `SET key value NX PX ttl_ms` — the
//! standard atomic set-if-absent-with-TTL idiom, grounded in the same
//! `ConnectionManager`-over-`Mutex` direct-command style as
//! `gateway_directory::redis_directory`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::DedupError;
use crate::traits::DedupStore;

pub struct RedisDedupStore {
    conn: Mutex<redis::aio::ConnectionManager>,
    key_prefix: String,
}

impl RedisDedupStore {
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self, DedupError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| DedupError::Unavailable(err.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| DedupError::Unavailable(err.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, msg_id: &str) -> String {
        format!("{}:{msg_id}", self.key_prefix)
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn seen_then_mark(&self, msg_id: &str, ttl: Duration) -> Result<bool, DedupError> {
        let key = self.key(msg_id);
        let mut conn = self.conn.lock().await;

        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await
            .map_err(|err| DedupError::Unavailable(err.to_string()))?;

        // `SET ... NX` returns `OK` when the key was absent (we just marked
        // it) and a nil reply when it already existed (the duplicate case).
        Ok(set.is_none())
    }
}
