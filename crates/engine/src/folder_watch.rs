//! Folder watcher: turns folder membership into enrollments.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use drip_core::config::{DispatcherConfig, FolderWatchConfig};
use drip_core::event_bus::{make_event, DripEventType};
use drip_core::types::{CampaignChannel, CampaignDefinition, EnrollmentSource, FolderWatch};
use drip_core::DripResult;
use drip_lock::{DOMAIN_CRON, DOMAIN_FOLDER_WATCH};

use crate::context::EngineContext;
use crate::enrollment::{BulkReport, EnrollmentService};

/// Job-lock key of the folder-watch cron.
pub const JOB_FOLDER_WATCH: &str = "folder-watch";

#[derive(Debug, Clone)]
pub struct FolderWatchSettings {
    /// Cap on enrollments created per watch per tick.
    pub batch_size: usize,
    pub watch_lock_ttl: StdDuration,
    pub job_lock_ttl: StdDuration,
    pub applicable_channels: Vec<CampaignChannel>,
}

impl FolderWatchSettings {
    pub fn from_config(config: &FolderWatchConfig, dispatcher: &DispatcherConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            watch_lock_ttl: StdDuration::from_secs(config.watch_lock_ttl_secs),
            job_lock_ttl: StdDuration::from_secs(dispatcher.job_lock_ttl_secs),
            applicable_channels: config.applicable_channels.clone(),
        }
    }
}

impl Default for FolderWatchSettings {
    fn default() -> Self {
        Self::from_config(&FolderWatchConfig::default(), &DispatcherConfig::default())
    }
}

/// Result of scanning one watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchReport {
    pub watch_id: Uuid,
    pub folder_id: String,
    pub campaign_id: String,
    /// Another worker held the per-watch lock.
    pub locked: bool,
    pub deactivated: Option<String>,
    /// Folder members without a live enrollment, before the batch cap.
    pub candidates: usize,
    #[serde(flatten)]
    pub enrolled: BulkReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderTickReport {
    pub skipped: bool,
    pub scanned: usize,
    pub created: usize,
    pub deduped: usize,
    pub failed: usize,
    pub deactivated: usize,
    pub errors: usize,
    pub watches: Vec<WatchReport>,
}

impl FolderTickReport {
    fn absorb(&mut self, watch: WatchReport) {
        if !watch.locked {
            self.scanned += 1;
        }
        if watch.deactivated.is_some() {
            self.deactivated += 1;
        }
        self.created += watch.enrolled.created;
        self.deduped += watch.enrolled.deduped;
        self.failed += watch.enrolled.failed;
        self.watches.push(watch);
    }
}

pub struct FolderWatcher {
    ctx: EngineContext,
    enrollments: EnrollmentService,
    settings: FolderWatchSettings,
}

impl FolderWatcher {
    pub fn new(ctx: EngineContext, settings: FolderWatchSettings) -> Self {
        Self {
            enrollments: EnrollmentService::new(ctx.clone()),
            ctx,
            settings,
        }
    }

    /// Cron entry point: scan every active watch once.
    pub async fn tick(&self) -> DripResult<FolderTickReport> {
        let acquired = self
            .ctx
            .lock
            .acquire(DOMAIN_CRON, JOB_FOLDER_WATCH, self.settings.job_lock_ttl)
            .await?;
        if !acquired {
            info!("Folder watch already running elsewhere, skipping tick");
            metrics::counter!("drip.folder_watch.ticks", "result" => "skipped").increment(1);
            return Ok(FolderTickReport {
                skipped: true,
                ..FolderTickReport::default()
            });
        }

        let watches = self.ctx.watches.list_active().await.map_err(|e| {
            error!(error = %e, "Failed to list folder watches");
            metrics::counter!("drip.folder_watch.ticks", "result" => "error").increment(1);
            e
        })?;

        let mut report = FolderTickReport::default();
        for watch in &watches {
            match self.scan_watch(watch).await {
                Ok(watch_report) => report.absorb(watch_report),
                Err(e) => {
                    error!(watch_id = %watch.id, error = %e, "Folder watch scan failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            watches = watches.len(),
            scanned = report.scanned,
            created = report.created,
            deduped = report.deduped,
            deactivated = report.deactivated,
            errors = report.errors,
            "Folder watch tick finished"
        );
        metrics::counter!("drip.folder_watch.ticks", "result" => "ok").increment(1);
        Ok(report)
    }

    /// Scan one watch under its own lock. `last_scan_at` is recorded
    /// whenever the scan ran, whatever the per-lead outcomes.
    pub async fn scan_watch(&self, watch: &FolderWatch) -> DripResult<WatchReport> {
        let mut report = WatchReport {
            watch_id: watch.id,
            folder_id: watch.folder_id.clone(),
            campaign_id: watch.campaign_id.clone(),
            ..WatchReport::default()
        };

        let acquired = self
            .ctx
            .lock
            .acquire(
                DOMAIN_FOLDER_WATCH,
                &watch.id.to_string(),
                self.settings.watch_lock_ttl,
            )
            .await?;
        if !acquired {
            report.locked = true;
            return Ok(report);
        }

        let outcome = self.scan_locked(watch, &mut report).await;
        self.ctx
            .watches
            .record_scan(watch.id, self.ctx.clock.now())
            .await?;
        outcome.map(|_| report)
    }

    async fn scan_locked(&self, watch: &FolderWatch, report: &mut WatchReport) -> DripResult<()> {
        let campaign = match self.validate(watch).await? {
            Ok(campaign) => campaign,
            Err(reason) => {
                self.deactivate(watch, &reason).await?;
                report.deactivated = Some(reason);
                return Ok(());
            }
        };

        // The live set is a snapshot; leads enrolled after it are caught by
        // the store's uniqueness check and counted as deduped.
        let live = self
            .ctx
            .enrollments
            .live_leads(&watch.tenant_id, &watch.campaign_id)
            .await?;
        let members = self
            .ctx
            .leads
            .find_leads_in_folder(&watch.tenant_id, &watch.folder_id)
            .await?;

        let mut seen = HashSet::new();
        let candidates: Vec<String> = members
            .into_iter()
            .filter(|lead| !live.contains(lead) && seen.insert(lead.clone()))
            .collect();
        report.candidates = candidates.len();

        let batch = &candidates[..candidates.len().min(self.settings.batch_size)];
        report.enrolled = self
            .enrollments
            .enroll_all(&campaign, batch, EnrollmentSource::FolderBulk, watch.start_mode)
            .await;

        if report.candidates > batch.len() {
            info!(
                watch_id = %watch.id,
                remaining = report.candidates - batch.len(),
                "Folder watch batch cap reached, remainder left for next tick"
            );
        }
        metrics::counter!("drip.folder_watch.enrolled").increment(report.enrolled.created as u64);
        Ok(())
    }

    /// The watch's campaign, or the reason the watch can no longer run.
    async fn validate(
        &self,
        watch: &FolderWatch,
    ) -> DripResult<Result<CampaignDefinition, String>> {
        let Some(campaign) = self.ctx.campaigns.get_campaign(&watch.campaign_id).await? else {
            return Ok(Err("campaign not found".to_string()));
        };
        if campaign.tenant_id != watch.tenant_id {
            return Ok(Err("campaign belongs to another tenant".to_string()));
        }
        if !campaign.is_active {
            return Ok(Err("campaign is inactive".to_string()));
        }
        if !self.settings.applicable_channels.contains(&campaign.channel) {
            return Ok(Err(format!(
                "campaign channel {:?} is not applicable",
                campaign.channel
            )));
        }
        if campaign.step_count() == 0 {
            return Ok(Err("campaign has no active steps".to_string()));
        }
        Ok(Ok(campaign))
    }

    async fn deactivate(&self, watch: &FolderWatch, reason: &str) -> DripResult<()> {
        self.ctx.watches.deactivate(watch.id, reason).await?;
        warn!(
            watch_id = %watch.id,
            campaign_id = %watch.campaign_id,
            reason = %reason,
            "Folder watch deactivated"
        );
        metrics::counter!("drip.folder_watch.deactivated").increment(1);

        let mut event = make_event(
            DripEventType::FolderWatchDeactivated,
            watch.tenant_id.clone(),
            None,
            Some(watch.campaign_id.clone()),
            Some(watch.id),
        );
        event.detail = Some(reason.to_string());
        event.timestamp = self.ctx.clock.now();
        self.ctx.events.emit(event);
        Ok(())
    }
}
