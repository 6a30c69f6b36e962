//! Redis-backed lease lock shared by every worker process.
//!
//! `SET <key> <owner> NX PX <ttl>` is the single atomic conditional write;
//! Redis key expiry is the release.

use std::time::Duration;

use async_trait::async_trait;
use drip_core::config::RedisConfig;
use drip_core::{DripError, DripResult};
use redis::aio::ConnectionManager;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{record_outcome, LeaseLock};

pub struct RedisLeaseLock {
    conn: ConnectionManager,
    key_prefix: String,
    node_id: String,
}

impl RedisLeaseLock {
    /// Connect to Redis and verify connectivity.
    pub async fn new(config: &RedisConfig, node_id: impl Into<String>) -> DripResult<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis lock backend");

        let client = redis::Client::open(url.as_str()).map_err(lock_err)?;
        let connect = ConnectionManager::new(client);
        let mut conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            connect,
        )
        .await
        .map_err(|_| DripError::Lock(format!("timed out connecting to {url}")))?
        .map_err(lock_err)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;
        info!(response = %pong, "Redis lock backend connected");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            node_id: node_id.into(),
        })
    }

    fn lease_key(&self, domain: &str, key: &str) -> String {
        format!("{}:lock:{}:{}", self.key_prefix, domain, key)
    }
}

#[async_trait]
impl LeaseLock for RedisLeaseLock {
    async fn acquire(&self, domain: &str, key: &str, ttl: Duration) -> DripResult<bool> {
        let lease_key = self.lease_key(domain, key);
        let owner = format!("{}:{}", self.node_id, Uuid::new_v4());
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&lease_key)
            .arg(&owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(lock_err)?;

        let granted = reply.is_some();
        debug!(key = %lease_key, granted, "redis lease acquire");
        record_outcome(domain, granted);
        Ok(granted)
    }
}

fn lock_err(e: redis::RedisError) -> DripError {
    DripError::Lock(e.to_string())
}
