//! In-process lease lock backed by DashMap.
//!
//! The entry API holds the shard write lock for the whole check-and-set,
//! which makes `acquire` a single conditional write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use drip_core::types::LockRecord;
use drip_core::{Clock, DripError, DripResult, SystemClock};
use tracing::debug;
use uuid::Uuid;

use crate::{record_outcome, LeaseLock};

pub struct LocalLeaseLock {
    leases: DashMap<(String, String), LockRecord>,
    clock: Arc<dyn Clock>,
    node_id: String,
}

impl LocalLeaseLock {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_clock(node_id, Arc::new(SystemClock))
    }

    pub fn with_clock(node_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: DashMap::new(),
            clock,
            node_id: node_id.into(),
        }
    }

    /// Current unexpired holder of a lease, if any.
    pub fn holder(&self, domain: &str, key: &str) -> Option<LockRecord> {
        let now = self.clock.now();
        self.leases
            .get(&(domain.to_string(), key.to_string()))
            .filter(|r| r.expires_at > now)
            .map(|r| r.clone())
    }

    /// Drop expired leases. Purely housekeeping; expired entries are
    /// overwritten by `acquire` anyway.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.leases.len();
        self.leases.retain(|_, record| record.expires_at > now);
        before.saturating_sub(self.leases.len())
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[async_trait]
impl LeaseLock for LocalLeaseLock {
    async fn acquire(&self, domain: &str, key: &str, ttl: Duration) -> DripResult<bool> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DripError::Lock(format!("invalid ttl: {e}")))?;
        let record = LockRecord {
            domain: domain.to_string(),
            key: key.to_string(),
            owner: format!("{}:{}", self.node_id, Uuid::new_v4()),
            expires_at: now + ttl,
        };

        let granted = match self.leases.entry((domain.to_string(), key.to_string())) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at <= now {
                    slot.insert(record);
                    true
                } else {
                    false
                }
            }
        };

        debug!(domain, key, granted, "local lease acquire");
        record_outcome(domain, granted);
        Ok(granted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drip_core::ManualClock;

    fn lock_with_clock() -> (LocalLeaseLock, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (LocalLeaseLock::with_clock("node-a", clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_second_acquire_denied_until_expiry() {
        let (lock, clock) = lock_with_clock();
        let ttl = Duration::from_secs(30);

        assert!(lock.acquire("cron", "drip-dispatch", ttl).await.unwrap());
        assert!(!lock.acquire("cron", "drip-dispatch", ttl).await.unwrap());

        clock.advance(chrono::Duration::seconds(29));
        assert!(!lock.acquire("cron", "drip-dispatch", ttl).await.unwrap());

        clock.advance(chrono::Duration::seconds(1));
        assert!(lock.acquire("cron", "drip-dispatch", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_domains_and_keys_are_independent() {
        let (lock, _clock) = lock_with_clock();
        let ttl = Duration::from_secs(30);

        assert!(lock.acquire("cron", "a", ttl).await.unwrap());
        assert!(lock.acquire("cron", "b", ttl).await.unwrap());
        assert!(lock.acquire("folder-watch", "a", ttl).await.unwrap());
        assert_eq!(lock.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_grants_exactly_one() {
        let lock = Arc::new(LocalLeaseLock::new("node-a"));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move {
                lock.acquire("drip-send", "t:l:c:0", Duration::from_secs(600))
                    .await
                    .unwrap()
            }));
        }
        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn test_evict_expired_and_holder() {
        let (lock, clock) = lock_with_clock();
        lock.acquire("cron", "a", Duration::from_secs(10)).await.unwrap();
        assert!(lock.holder("cron", "a").unwrap().owner.starts_with("node-a:"));

        clock.advance(chrono::Duration::seconds(11));
        assert!(lock.holder("cron", "a").is_none());
        assert_eq!(lock.evict_expired(), 1);
        assert!(lock.is_empty());
    }
}
