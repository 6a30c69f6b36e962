//! The drip dispatcher: one tick selects due enrollments, claims them, and
//! sends the current step of each.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use drip_core::config::DispatcherConfig;
use drip_core::event_bus::{make_event, DripEventType};
use drip_core::types::{CampaignDefinition, Enrollment, EnrollmentStatus, RenderContext};
use drip_core::{DripError, DripResult};
use drip_lock::{DOMAIN_CRON, DOMAIN_SEND};

use crate::context::EngineContext;
use crate::store::Claim;
use crate::suppression::{SuppressionDecision, SuppressionPolicy};

/// Job-lock key of the dispatch cron.
pub const JOB_DRIP_DISPATCH: &str = "drip-dispatch";

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub batch_size: usize,
    pub stale_after: Duration,
    pub send_dedup_ttl: StdDuration,
    pub job_lock_ttl: StdDuration,
    pub contention_recheck: Duration,
}

impl DispatcherSettings {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            stale_after: secs(config.stale_claim_secs),
            send_dedup_ttl: StdDuration::from_secs(config.send_dedup_ttl_secs),
            job_lock_ttl: StdDuration::from_secs(config.job_lock_ttl_secs),
            contention_recheck: secs(config.contention_recheck_secs),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

/// Summary of one dispatch tick, returned to the cron caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Another worker held the job lock; nothing was attempted.
    pub skipped: bool,
    pub selected: usize,
    pub sent: usize,
    pub completed: usize,
    pub suppressed: usize,
    pub failed: usize,
    pub lost_claims: usize,
    pub contended: usize,
    pub stale_claims: usize,
    pub errors: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent { completed } => {
                self.sent += 1;
                if completed {
                    self.completed += 1;
                }
            }
            Outcome::Completed => self.completed += 1,
            Outcome::Suppressed => self.suppressed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::LostClaim => self.lost_claims += 1,
            Outcome::Contended => self.contended += 1,
        }
    }
}

/// What happened to one selected enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent { completed: bool },
    /// Cursor was already past the last step; nothing sent.
    Completed,
    Suppressed,
    Failed,
    LostClaim,
    Contended,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Sent { .. } => "sent",
            Outcome::Completed => "completed",
            Outcome::Suppressed => "suppressed",
            Outcome::Failed => "failed",
            Outcome::LostClaim => "lost_claim",
            Outcome::Contended => "contended",
        }
    }
}

pub struct Dispatcher {
    ctx: EngineContext,
    settings: DispatcherSettings,
    suppression: SuppressionPolicy,
}

impl Dispatcher {
    pub fn new(
        ctx: EngineContext,
        settings: DispatcherSettings,
        suppression: SuppressionPolicy,
    ) -> Self {
        Self {
            ctx,
            settings,
            suppression,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Cron entry point. Serialized across workers by the job lock; a
    /// denied lock returns a skipped report.
    pub async fn tick(&self) -> DripResult<TickReport> {
        let acquired = self
            .ctx
            .lock
            .acquire(DOMAIN_CRON, JOB_DRIP_DISPATCH, self.settings.job_lock_ttl)
            .await?;
        if !acquired {
            info!("Drip dispatch already running elsewhere, skipping tick");
            metrics::counter!("drip.dispatch.ticks", "result" => "skipped").increment(1);
            return Ok(TickReport::skipped());
        }
        self.run_batch().await
    }

    /// One pass over the due set without the job lock. Safe to run from
    /// several workers at once; the claim and the send-dedup lock keep each
    /// step to a single send.
    pub async fn run_batch(&self) -> DripResult<TickReport> {
        let now = self.ctx.clock.now();
        let due = self
            .ctx
            .enrollments
            .due(now, self.settings.batch_size, self.settings.stale_after)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to select due enrollments");
                metrics::counter!("drip.dispatch.ticks", "result" => "error").increment(1);
                e
            })?;

        let mut report = TickReport {
            selected: due.len(),
            ..TickReport::default()
        };

        for enrollment in &due {
            match self.process(enrollment).await {
                Ok(outcome) => {
                    metrics::counter!("drip.dispatch.items", "outcome" => outcome.label())
                        .increment(1);
                    report.absorb(outcome);
                }
                Err(DripError::StaleClaim(id)) => {
                    warn!(enrollment_id = %id, "Claim superseded mid-flight, result discarded");
                    metrics::counter!("drip.dispatch.items", "outcome" => "stale_claim")
                        .increment(1);
                    report.stale_claims += 1;
                }
                Err(e) => {
                    // The claim stays held and is reclaimed once stale.
                    error!(enrollment_id = %enrollment.id, error = %e, "Dispatch item failed");
                    metrics::counter!("drip.dispatch.items", "outcome" => "error").increment(1);
                    report.errors += 1;
                }
            }
        }

        info!(
            selected = report.selected,
            sent = report.sent,
            completed = report.completed,
            suppressed = report.suppressed,
            failed = report.failed,
            lost_claims = report.lost_claims,
            contended = report.contended,
            errors = report.errors,
            "Drip dispatch tick finished"
        );
        metrics::counter!("drip.dispatch.ticks", "result" => "ok").increment(1);
        Ok(report)
    }

    /// Claim and send one enrollment. Claim and completion times are read
    /// from the clock per item, never from the tick start.
    async fn process(&self, candidate: &Enrollment) -> DripResult<Outcome> {
        let now = self.ctx.clock.now();
        let Some(claim) = self
            .ctx
            .enrollments
            .claim(candidate.id, now, self.settings.stale_after)
            .await?
        else {
            debug!(enrollment_id = %candidate.id, "Lost claim race");
            return Ok(Outcome::LostClaim);
        };
        let enrollment = &claim.enrollment;

        let campaign = match self.ctx.campaigns.get_campaign(&enrollment.campaign_id).await? {
            Some(c) if c.is_active => c,
            Some(_) => return self.fail(&claim, "campaign is inactive", now).await,
            None => return self.fail(&claim, "campaign not found", now).await,
        };

        let Some(step) = campaign.step_at(enrollment.cursor_step) else {
            // Steps were removed since the last send.
            let done = self.ctx.enrollments.advance(&claim, None, now).await?;
            self.emit(DripEventType::EnrollmentCompleted, &done, None);
            return Ok(Outcome::Completed);
        };

        let activity = self
            .ctx
            .leads
            .lead_activity(&enrollment.tenant_id, &enrollment.lead_id)
            .await?;
        if let SuppressionDecision::Skip { retry_after } = self.suppression.evaluate(&activity, now)
        {
            let released = self.ctx.enrollments.release(&claim, retry_after, now).await?;
            debug!(
                enrollment_id = %enrollment.id,
                retry_after = %retry_after,
                "Drip suppressed by recent human outreach"
            );
            self.emit(
                DripEventType::SendSuppressed,
                &released,
                Some(format!("retry after {retry_after}")),
            );
            return Ok(Outcome::Suppressed);
        }

        let Some(lead) = self
            .ctx
            .leads
            .lead_context(&enrollment.tenant_id, &enrollment.lead_id)
            .await?
        else {
            return self.fail(&claim, "lead not found", now).await;
        };
        let Some(phone) = lead.phone.clone() else {
            return self.fail(&claim, "lead has no phone number", now).await;
        };

        let dedup_key = format!("{}:{}", enrollment.key(), enrollment.cursor_step);
        let acquired = self
            .ctx
            .lock
            .acquire(DOMAIN_SEND, &dedup_key, self.settings.send_dedup_ttl)
            .await?;
        if !acquired {
            let contention = DripError::LockContention(dedup_key);
            debug!(enrollment_id = %enrollment.id, reason = %contention, "Send already in flight");
            self.ctx
                .enrollments
                .release(&claim, now + self.settings.contention_recheck, now)
                .await?;
            return Ok(Outcome::Contended);
        }

        let tenant = self.ctx.leads.tenant_context(&enrollment.tenant_id).await?;
        let mut vars = RenderContext::new(&lead, &tenant);
        vars.insert("campaign_name", campaign.name.clone());
        let body = self.ctx.renderer.render(&step.template, &vars);

        let sent = self.ctx.sender.send(&phone, &body, &tenant).await;
        let finished = self.ctx.clock.now();
        match sent {
            Ok(receipt) => {
                info!(
                    enrollment_id = %enrollment.id,
                    cursor_step = enrollment.cursor_step,
                    provider_id = %receipt.provider_id,
                    segments = receipt.segments,
                    "Drip step sent"
                );
                self.advance(&claim, &campaign, finished).await
            }
            Err(e) => {
                warn!(enrollment_id = %enrollment.id, error = %e, "Drip send failed");
                self.fail(&claim, &e.to_string(), finished).await
            }
        }
    }

    async fn advance(
        &self,
        claim: &Claim,
        campaign: &CampaignDefinition,
        now: DateTime<Utc>,
    ) -> DripResult<Outcome> {
        let enrollment = &claim.enrollment;
        let next = self.ctx.schedule.next_send_at(
            enrollment.started_at,
            campaign,
            enrollment.cursor_step.saturating_add(1),
        );
        let updated = self.ctx.enrollments.advance(claim, next, now).await?;

        self.emit(
            DripEventType::StepSent,
            &updated,
            Some(format!("step {}", enrollment.cursor_step)),
        );
        let completed = updated.status == EnrollmentStatus::Completed;
        if completed {
            info!(enrollment_id = %updated.id, "Drip enrollment completed");
            self.emit(DripEventType::EnrollmentCompleted, &updated, None);
        }
        Ok(Outcome::Sent { completed })
    }

    async fn fail(&self, claim: &Claim, message: &str, now: DateTime<Utc>) -> DripResult<Outcome> {
        let failed = self.ctx.enrollments.fail(claim, message, now).await?;
        warn!(enrollment_id = %failed.id, reason = %message, "Enrollment moved to error");
        self.emit(
            DripEventType::EnrollmentFailed,
            &failed,
            Some(message.to_string()),
        );
        Ok(Outcome::Failed)
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
