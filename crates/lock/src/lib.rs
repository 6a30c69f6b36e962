//! Leased mutual exclusion over arbitrary (domain, key) pairs.
//!
//! A lock is granted by a single atomic conditional write and released only
//! by expiry, so a crashed holder can never strand it. Two backends:
//! `LocalLeaseLock` (DashMap, one process) and `RedisLeaseLock`
//! (`SET NX PX`, shared across workers).

#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;

use std::time::Duration;

use async_trait::async_trait;
use drip_core::DripResult;

pub use client::RedisLeaseLock;
pub use local::LocalLeaseLock;

/// Lock domain serializing a whole cron job per job name.
pub const DOMAIN_CRON: &str = "cron";
/// Lock domain serializing the scan of one folder watch.
pub const DOMAIN_FOLDER_WATCH: &str = "folder-watch";
/// Lock domain deduplicating the send of one enrollment step.
pub const DOMAIN_SEND: &str = "drip-send";

#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Try to take the lease. `Ok(false)` means someone else holds an
    /// unexpired lease; errors mean the backend could not be reached.
    async fn acquire(&self, domain: &str, key: &str, ttl: Duration) -> DripResult<bool>;
}

fn record_outcome(domain: &str, granted: bool) {
    let outcome = if granted { "granted" } else { "denied" };
    metrics::counter!(
        "drip.lock.acquire",
        "domain" => domain.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
