//! Enrollment lifecycle operations exposed to operators, imports and the
//! folder watcher.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use drip_core::event_bus::{make_event, DripEventType};
use drip_core::types::{
    CampaignDefinition, Enrollment, EnrollmentSource, FolderWatch, NewEnrollment, StartMode,
};
use drip_core::{DripError, DripResult};

use crate::context::EngineContext;

/// Outcome counts of a multi-lead enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub created: usize,
    /// Leads that already had a live enrollment (or appeared twice).
    pub deduped: usize,
    pub failed: usize,
}

impl BulkReport {
    pub fn absorb(&mut self, other: &BulkReport) {
        self.created += other.created;
        self.deduped += other.deduped;
        self.failed += other.failed;
    }
}

#[derive(Clone, Debug)]
pub struct EnrollmentService {
    ctx: EngineContext,
}

impl EnrollmentService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Resolve a campaign the tenant may enroll into. Unknown or foreign
    /// campaigns are `NotFound`; inactive or empty ones are unavailable.
    pub async fn usable_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
    ) -> DripResult<CampaignDefinition> {
        let campaign = self
            .ctx
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| DripError::NotFound(format!("campaign {campaign_id}")))?;

        if !campaign.is_active {
            return Err(DripError::CampaignUnavailable(format!(
                "campaign {campaign_id} is inactive"
            )));
        }
        if campaign.step_count() == 0 {
            return Err(DripError::CampaignUnavailable(format!(
                "campaign {campaign_id} has no active steps"
            )));
        }
        Ok(campaign)
    }

    /// Enroll one lead. Fails with `DuplicateEnrollment` when the lead is
    /// already live in the campaign.
    pub async fn create(&self, request: NewEnrollment) -> DripResult<Enrollment> {
        let campaign = self
            .usable_campaign(&request.tenant_id, &request.campaign_id)
            .await?;
        self.insert(&request, &campaign).await
    }

    async fn insert(
        &self,
        request: &NewEnrollment,
        campaign: &CampaignDefinition,
    ) -> DripResult<Enrollment> {
        let now = self.ctx.clock.now();
        let anchor = self.ctx.schedule.anchor(request.start_mode, now);
        let first = self
            .ctx
            .schedule
            .next_send_at(anchor, campaign, 0)
            .ok_or_else(|| {
                DripError::CampaignUnavailable(format!("campaign {} has no active steps", campaign.id))
            })?;

        let enrollment = self
            .ctx
            .enrollments
            .create(request, anchor, first, now)
            .await?;

        info!(
            enrollment_id = %enrollment.id,
            tenant_id = %enrollment.tenant_id,
            lead_id = %enrollment.lead_id,
            campaign_id = %enrollment.campaign_id,
            source = ?enrollment.source,
            next_send_at = %first,
            "Lead enrolled"
        );
        metrics::counter!(
            "drip.enrollments.created",
            "source" => source_label(enrollment.source)
        )
        .increment(1);
        self.emit(DripEventType::EnrollmentCreated, &enrollment, None);
        Ok(enrollment)
    }

    /// Enroll many leads into an already-validated campaign. Duplicates are
    /// a successful no-op; other per-lead failures are counted and logged.
    pub async fn enroll_all(
        &self,
        campaign: &CampaignDefinition,
        lead_ids: &[String],
        source: EnrollmentSource,
        start_mode: StartMode,
    ) -> BulkReport {
        let mut report = BulkReport::default();
        let mut seen = HashSet::new();

        for lead_id in lead_ids {
            if !seen.insert(lead_id.as_str()) {
                report.deduped += 1;
                continue;
            }
            let request = NewEnrollment {
                tenant_id: campaign.tenant_id.clone(),
                lead_id: lead_id.clone(),
                campaign_id: campaign.id.clone(),
                source,
                start_mode,
            };
            match self.insert(&request, campaign).await {
                Ok(_) => report.created += 1,
                Err(e) if e.is_duplicate() => report.deduped += 1,
                Err(e) => {
                    warn!(
                        lead_id = %lead_id,
                        campaign_id = %campaign.id,
                        error = %e,
                        "Bulk enrollment failed for lead"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.deduped > 0 {
            metrics::counter!("drip.enrollments.deduped").increment(report.deduped as u64);
        }
        report
    }

    /// Sheet-style import of a lead list into one campaign.
    pub async fn bulk_enroll(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        lead_ids: &[String],
        start_mode: StartMode,
    ) -> DripResult<BulkReport> {
        let campaign = self.usable_campaign(tenant_id, campaign_id).await?;
        let report = self
            .enroll_all(&campaign, lead_ids, EnrollmentSource::SheetBulk, start_mode)
            .await;
        info!(
            tenant_id = %tenant_id,
            campaign_id = %campaign_id,
            created = report.created,
            deduped = report.deduped,
            failed = report.failed,
            "Bulk enrollment finished"
        );
        Ok(report)
    }

    pub async fn get(&self, id: Uuid) -> DripResult<Enrollment> {
        self.ctx
            .enrollments
            .get(id)
            .await?
            .ok_or_else(|| DripError::NotFound(format!("enrollment {id}")))
    }

    pub async fn list_for_tenant(&self, tenant_id: &str) -> DripResult<Vec<Enrollment>> {
        self.ctx.enrollments.list_for_tenant(tenant_id).await
    }

    pub async fn pause(&self, id: Uuid) -> DripResult<Enrollment> {
        let enrollment = self.ctx.enrollments.pause(id, self.ctx.clock.now()).await?;
        info!(enrollment_id = %id, "Enrollment paused");
        self.emit(DripEventType::EnrollmentPaused, &enrollment, None);
        Ok(enrollment)
    }

    /// Resume a paused enrollment, or revive an errored one.
    pub async fn resume(&self, id: Uuid) -> DripResult<Enrollment> {
        let enrollment = self.ctx.enrollments.resume(id, self.ctx.clock.now()).await?;
        info!(
            enrollment_id = %id,
            next_send_at = ?enrollment.next_send_at,
            "Enrollment resumed"
        );
        self.emit(DripEventType::EnrollmentResumed, &enrollment, None);
        Ok(enrollment)
    }

    pub async fn cancel(&self, id: Uuid) -> DripResult<Enrollment> {
        let enrollment = self.ctx.enrollments.cancel(id, self.ctx.clock.now()).await?;
        info!(enrollment_id = %id, "Enrollment canceled");
        self.emit(DripEventType::EnrollmentCanceled, &enrollment, None);
        Ok(enrollment)
    }

    /// Register a folder watch. The campaign must currently be usable.
    pub async fn create_watch(
        &self,
        tenant_id: &str,
        folder_id: &str,
        campaign_id: &str,
        start_mode: StartMode,
    ) -> DripResult<FolderWatch> {
        self.usable_campaign(tenant_id, campaign_id).await?;
        let watch = FolderWatch::new(
            tenant_id,
            folder_id,
            campaign_id,
            start_mode,
            self.ctx.clock.now(),
        );
        let watch = self.ctx.watches.insert(watch).await?;
        info!(
            watch_id = %watch.id,
            tenant_id = %tenant_id,
            folder_id = %folder_id,
            campaign_id = %campaign_id,
            "Folder watch created"
        );
        Ok(watch)
    }

    pub async fn get_watch(&self, id: Uuid) -> DripResult<FolderWatch> {
        self.ctx
            .watches
            .get(id)
            .await?
            .ok_or_else(|| DripError::NotFound(format!("folder watch {id}")))
    }

    fn emit(&self, event_type: DripEventType, enrollment: &Enrollment, detail: Option<String>) {
        let mut event = make_event(
            event_type,
            enrollment.tenant_id.clone(),
            Some(enrollment.lead_id.clone()),
            Some(enrollment.campaign_id.clone()),
            Some(enrollment.id),
        );
        event.detail = detail;
        event.timestamp = self.ctx.clock.now();
        self.ctx.events.emit(event);
    }
}

pub(crate) fn source_label(source: EnrollmentSource) -> &'static str {
    match source {
        EnrollmentSource::Manual => "manual",
        EnrollmentSource::FolderBulk => "folder-bulk",
        EnrollmentSource::SheetBulk => "sheet-bulk",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::EnrollmentStore;
    use crate::testing::{campaign, harness};
    use drip_core::Clock;
    use drip_core::types::EnrollmentStatus;

    fn request(lead: &str) -> NewEnrollment {
        NewEnrollment {
            tenant_id: "t1".into(),
            lead_id: lead.into(),
            campaign_id: "c1".into(),
            source: EnrollmentSource::Manual,
            start_mode: StartMode::Immediate,
        }
    }

    #[tokio::test]
    async fn test_create_schedules_first_step_now() {
        let h = harness();
        h.campaigns.upsert(campaign("t1", "c1", &[0, 2, 5]));
        let service = EnrollmentService::new(h.ctx.clone());

        let e = service.create(request("l1")).await.unwrap();
        assert_eq!(e.status, EnrollmentStatus::Active);
        assert_eq!(e.cursor_step, 0);
        assert_eq!(e.next_send_at, Some(h.clock.now()));
        assert_eq!(e.started_at, h.clock.now());
        assert_eq!(h.events.count_type(DripEventType::EnrollmentCreated), 1);

        assert!(service.create(request("l1")).await.unwrap_err().is_duplicate());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_foreign_and_inactive_campaigns() {
        let h = harness();
        h.campaigns.upsert(campaign("t2", "c1", &[0]));
        let service = EnrollmentService::new(h.ctx.clone());
        assert!(matches!(
            service.create(request("l1")).await,
            Err(DripError::NotFound(_))
        ));

        h.campaigns.upsert(campaign("t1", "c1", &[0]));
        h.campaigns.set_active("c1", false);
        assert!(matches!(
            service.create(request("l1")).await,
            Err(DripError::CampaignUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_next_window_start_mode() {
        let h = harness();
        h.campaigns.upsert(campaign("t1", "c1", &[0]));
        let service = EnrollmentService::new(h.ctx.clone());

        // The harness clock starts at 20:00 UTC, after the 9-17 window.
        let mut req = request("l1");
        req.start_mode = StartMode::NextWindow;
        let e = service.create(req).await.unwrap();
        let expected = h.ctx.schedule.next_window(h.clock.now());
        assert!(expected > h.clock.now());
        assert_eq!(e.started_at, expected);
        assert_eq!(e.next_send_at, Some(expected));
    }

    #[tokio::test]
    async fn test_bulk_enroll_counts_duplicates() {
        let h = harness();
        h.campaigns.upsert(campaign("t1", "c1", &[0]));
        let service = EnrollmentService::new(h.ctx.clone());
        service.create(request("a")).await.unwrap();

        let leads: Vec<String> = ["a", "b", "c", "b"].iter().map(|s| s.to_string()).collect();
        let report = service
            .bulk_enroll("t1", "c1", &leads, StartMode::Immediate)
            .await
            .unwrap();
        assert_eq!(
            report,
            BulkReport {
                created: 2,
                deduped: 2,
                failed: 0
            }
        );
        let live = h.store.live_leads("t1", "c1").await.unwrap();
        assert_eq!(live.len(), 3);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let h = harness();
        h.campaigns.upsert(campaign("t1", "c1", &[0]));
        let service = EnrollmentService::new(h.ctx.clone());
        let e = service.create(request("l1")).await.unwrap();

        service.pause(e.id).await.unwrap();
        service.resume(e.id).await.unwrap();
        let canceled = service.cancel(e.id).await.unwrap();
        assert_eq!(canceled.status, EnrollmentStatus::Canceled);
        assert_eq!(h.events.count_type(DripEventType::EnrollmentPaused), 1);
        assert_eq!(h.events.count_type(DripEventType::EnrollmentResumed), 1);
        assert_eq!(h.events.count_type(DripEventType::EnrollmentCanceled), 1);

        assert!(matches!(
            service.resume(e.id).await,
            Err(DripError::InvalidTransition { .. })
        ));
        assert!(matches!(
            service.get(Uuid::new_v4()).await,
            Err(DripError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_watch_requires_usable_campaign() {
        let h = harness();
        let service = EnrollmentService::new(h.ctx.clone());
        assert!(service
            .create_watch("t1", "hot", "c1", StartMode::Immediate)
            .await
            .is_err());

        h.campaigns.upsert(campaign("t1", "c1", &[0]));
        let watch = service
            .create_watch("t1", "hot", "c1", StartMode::Immediate)
            .await
            .unwrap();
        assert!(watch.active);
        assert_eq!(service.get_watch(watch.id).await.unwrap().folder_id, "hot");
    }
}
