//! Folder-watch subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use drip_core::types::FolderWatch;
use drip_core::{DripError, DripResult};

#[async_trait]
pub trait FolderWatchStore: Send + Sync {
    async fn insert(&self, watch: FolderWatch) -> DripResult<FolderWatch>;

    async fn get(&self, id: Uuid) -> DripResult<Option<FolderWatch>>;

    async fn list_active(&self) -> DripResult<Vec<FolderWatch>>;

    /// Turn a watch off for good and record why.
    async fn deactivate(&self, id: Uuid, reason: &str) -> DripResult<FolderWatch>;

    async fn record_scan(&self, id: Uuid, at: DateTime<Utc>) -> DripResult<()>;
}

#[derive(Default)]
pub struct InMemoryFolderWatchStore {
    watches: DashMap<Uuid, FolderWatch>,
}

impl InMemoryFolderWatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl FolderWatchStore for InMemoryFolderWatchStore {
    async fn insert(&self, watch: FolderWatch) -> DripResult<FolderWatch> {
        self.watches.insert(watch.id, watch.clone());
        Ok(watch)
    }

    async fn get(&self, id: Uuid) -> DripResult<Option<FolderWatch>> {
        Ok(self.watches.get(&id).map(|w| w.clone()))
    }

    async fn list_active(&self) -> DripResult<Vec<FolderWatch>> {
        let mut active: Vec<FolderWatch> = self
            .watches
            .iter()
            .filter(|w| w.active)
            .map(|w| w.value().clone())
            .collect();
        active.sort_by_key(|w| w.created_at);
        Ok(active)
    }

    async fn deactivate(&self, id: Uuid, reason: &str) -> DripResult<FolderWatch> {
        let mut watch = self
            .watches
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(format!("folder watch {id}")))?;
        watch.active = false;
        watch.deactivated_reason = Some(reason.to_string());
        Ok(watch.clone())
    }

    async fn record_scan(&self, id: Uuid, at: DateTime<Utc>) -> DripResult<()> {
        if let Some(mut watch) = self.watches.get_mut(&id) {
            watch.last_scan_at = Some(at);
        }
        Ok(())
    }
}
