//! Enrollment persistence and the claim discipline.
//!
//! Every mutation of a due enrollment goes through a [`Claim`]: an exclusive,
//! time-leased right to process it. The claim's `claimed_at` doubles as a
//! fencing token, so a worker whose claim went stale and was taken over
//! cannot overwrite the new owner's progress.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use drip_core::types::{Enrollment, EnrollmentKey, EnrollmentStatus, NewEnrollment};
use drip_core::{DripError, DripResult};

use crate::state_machine::EnrollmentStateMachine;

/// Exclusive processing right over one enrollment for one tick.
#[derive(Debug, Clone)]
pub struct Claim {
    pub enrollment: Enrollment,
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    pub fn id(&self) -> Uuid {
        self.enrollment.id
    }
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Insert a new active enrollment. Fails with `DuplicateEnrollment` when
    /// an active or paused one already exists for the same tuple.
    async fn create(
        &self,
        request: &NewEnrollment,
        started_at: DateTime<Utc>,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment>;

    async fn get(&self, id: Uuid) -> DripResult<Option<Enrollment>>;

    /// The active or paused enrollment for a tuple, if any.
    async fn find_live(&self, key: &EnrollmentKey) -> DripResult<Option<Enrollment>>;

    /// Lead ids holding a live enrollment in `campaign_id` for `tenant_id`.
    async fn live_leads(&self, tenant_id: &str, campaign_id: &str) -> DripResult<HashSet<String>>;

    async fn list_for_tenant(&self, tenant_id: &str) -> DripResult<Vec<Enrollment>>;

    /// Up to `limit` due enrollments, oldest `next_send_at` first.
    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stale_after: Duration,
    ) -> DripResult<Vec<Enrollment>>;

    /// Atomically take the processing flag if the enrollment is still due
    /// and unclaimed (or its claim is stale). `None` means another worker
    /// won or the enrollment is no longer due.
    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> DripResult<Option<Claim>>;

    /// Select and claim in one pass.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stale_after: Duration,
    ) -> DripResult<Vec<Claim>> {
        let mut claims = Vec::new();
        for candidate in self.due(now, limit, stale_after).await? {
            if let Some(claim) = self.claim(candidate.id, now, stale_after).await? {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    /// Move the cursor forward after a send. `next_send_at = None` completes
    /// the enrollment. Clears the claim.
    async fn advance(
        &self,
        claim: &Claim,
        next_send_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment>;

    /// Clear the claim and reschedule without touching the cursor.
    async fn release(
        &self,
        claim: &Claim,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment>;

    /// Mark the enrollment as errored. No implicit retry.
    async fn fail(&self, claim: &Claim, message: &str, now: DateTime<Utc>)
        -> DripResult<Enrollment>;

    async fn pause(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment>;

    /// Paused → active keeps the schedule; error → active is due immediately.
    async fn resume(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment>;

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment>;
}

/// DashMap-backed store. The `live` index maps each tuple to the id of its
/// active/paused enrollment; its entry lock is what makes `create` atomic.
///
/// Lock order is always `live` before `enrollments`; no code path holds an
/// `enrollments` guard while touching `live`.
pub struct InMemoryEnrollmentStore {
    enrollments: DashMap<Uuid, Enrollment>,
    live: DashMap<EnrollmentKey, Uuid>,
    state_machine: EnrollmentStateMachine,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self {
            enrollments: DashMap::new(),
            live: DashMap::new(),
            state_machine: EnrollmentStateMachine::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.enrollments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrollments.is_empty()
    }

    fn is_live(&self, id: &Uuid) -> bool {
        self.enrollments
            .get(id)
            .is_some_and(|e| e.status.is_live())
    }

    fn build(
        request: &NewEnrollment,
        started_at: DateTime<Utc>,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id.clone(),
            lead_id: request.lead_id.clone(),
            campaign_id: request.campaign_id.clone(),
            status: EnrollmentStatus::Active,
            cursor_step: 0,
            next_send_at: Some(next_send_at),
            started_at,
            last_sent_at: None,
            processing: false,
            processing_at: None,
            source: request.source,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `f` under the enrollment's write guard, then drop the tuple's
    /// live-index slot if the enrollment left the live states.
    fn mutate<F>(&self, id: Uuid, f: F) -> DripResult<Enrollment>
    where
        F: FnOnce(&mut Enrollment) -> DripResult<()>,
    {
        let updated = {
            let mut entry = self
                .enrollments
                .get_mut(&id)
                .ok_or_else(|| DripError::NotFound(format!("enrollment {id}")))?;
            f(entry.value_mut())?;
            entry.clone()
        };

        if !updated.status.is_live() {
            self.live.remove_if(&updated.key(), |_, holder| *holder == id);
        }
        Ok(updated)
    }

    fn holds(enrollment: &Enrollment, claim: &Claim) -> bool {
        enrollment.processing && enrollment.processing_at == Some(claim.claimed_at)
    }

    fn clear_claim(enrollment: &mut Enrollment) {
        enrollment.processing = false;
        enrollment.processing_at = None;
    }

    /// Error → active under the tuple's live slot, which the caller holds.
    fn revive(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment> {
        let mut entry = self
            .enrollments
            .get_mut(&id)
            .ok_or_else(|| DripError::NotFound(format!("enrollment {id}")))?;
        self.state_machine
            .check(entry.status, EnrollmentStatus::Active)?;
        entry.status = EnrollmentStatus::Active;
        entry.last_error = None;
        entry.next_send_at = Some(now);
        Self::clear_claim(&mut entry);
        entry.updated_at = now;
        Ok(entry.clone())
    }
}

impl Default for InMemoryEnrollmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn create(
        &self,
        request: &NewEnrollment,
        started_at: DateTime<Utc>,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment> {
        let key = request.key();
        match self.live.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if self.is_live(slot.get()) {
                    return Err(DripError::DuplicateEnrollment(key));
                }
                let enrollment = Self::build(request, started_at, next_send_at, now);
                self.enrollments.insert(enrollment.id, enrollment.clone());
                slot.insert(enrollment.id);
                Ok(enrollment)
            }
            Entry::Vacant(slot) => {
                let enrollment = Self::build(request, started_at, next_send_at, now);
                self.enrollments.insert(enrollment.id, enrollment.clone());
                slot.insert(enrollment.id);
                Ok(enrollment)
            }
        }
    }

    async fn get(&self, id: Uuid) -> DripResult<Option<Enrollment>> {
        Ok(self.enrollments.get(&id).map(|e| e.clone()))
    }

    async fn find_live(&self, key: &EnrollmentKey) -> DripResult<Option<Enrollment>> {
        let Some(id) = self.live.get(key).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self
            .enrollments
            .get(&id)
            .filter(|e| e.status.is_live())
            .map(|e| e.clone()))
    }

    async fn live_leads(&self, tenant_id: &str, campaign_id: &str) -> DripResult<HashSet<String>> {
        Ok(self
            .enrollments
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id && e.campaign_id == campaign_id && e.status.is_live()
            })
            .map(|e| e.lead_id.clone())
            .collect())
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> DripResult<Vec<Enrollment>> {
        let mut list: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect();
        list.sort_by_key(|e| e.created_at);
        Ok(list)
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stale_after: Duration,
    ) -> DripResult<Vec<Enrollment>> {
        let mut due: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| e.is_due(now, stale_after))
            .map(|e| e.value().clone())
            .collect();
        due.sort_by_key(|e| (e.next_send_at, e.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> DripResult<Option<Claim>> {
        let Some(mut entry) = self.enrollments.get_mut(&id) else {
            return Ok(None);
        };
        if !entry.is_due(now, stale_after) {
            return Ok(None);
        }
        if entry.processing {
            debug!(enrollment_id = %id, previous = ?entry.processing_at, "reclaiming stale claim");
        }
        entry.processing = true;
        entry.processing_at = Some(now);
        entry.updated_at = now;
        Ok(Some(Claim {
            enrollment: entry.clone(),
            claimed_at: now,
        }))
    }

    async fn advance(
        &self,
        claim: &Claim,
        next_send_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment> {
        let id = claim.id();
        self.mutate(id, |e| {
            if e.status == EnrollmentStatus::Canceled {
                // Send finished after a cancel: record it, schedule nothing.
                e.last_sent_at = Some(now);
                e.updated_at = now;
                return Ok(());
            }
            if !Self::holds(e, claim) {
                return Err(DripError::StaleClaim(id.to_string()));
            }
            e.cursor_step = e.cursor_step.saturating_add(1);
            e.last_sent_at = Some(now);
            match next_send_at {
                Some(at) => e.next_send_at = Some(at),
                None => {
                    self.state_machine
                        .check(e.status, EnrollmentStatus::Completed)?;
                    e.status = EnrollmentStatus::Completed;
                    e.next_send_at = None;
                }
            }
            Self::clear_claim(e);
            e.updated_at = now;
            Ok(())
        })
    }

    async fn release(
        &self,
        claim: &Claim,
        next_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment> {
        let id = claim.id();
        self.mutate(id, |e| {
            if !Self::holds(e, claim) {
                return Err(DripError::StaleClaim(id.to_string()));
            }
            if e.status.is_live() {
                e.next_send_at = Some(next_send_at);
            }
            Self::clear_claim(e);
            e.updated_at = now;
            Ok(())
        })
    }

    async fn fail(
        &self,
        claim: &Claim,
        message: &str,
        now: DateTime<Utc>,
    ) -> DripResult<Enrollment> {
        let id = claim.id();
        self.mutate(id, |e| {
            if !Self::holds(e, claim) {
                return Err(DripError::StaleClaim(id.to_string()));
            }
            self.state_machine.check(e.status, EnrollmentStatus::Error)?;
            e.status = EnrollmentStatus::Error;
            e.last_error = Some(message.to_string());
            e.next_send_at = None;
            Self::clear_claim(e);
            e.updated_at = now;
            Ok(())
        })
    }

    async fn pause(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment> {
        self.mutate(id, |e| {
            self.state_machine.check(e.status, EnrollmentStatus::Paused)?;
            e.status = EnrollmentStatus::Paused;
            e.updated_at = now;
            Ok(())
        })
    }

    async fn resume(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment> {
        let current = self
            .enrollments
            .get(&id)
            .map(|e| e.clone())
            .ok_or_else(|| DripError::NotFound(format!("enrollment {id}")))?;

        if current.status != EnrollmentStatus::Error {
            return self.mutate(id, |e| {
                self.state_machine.check(e.status, EnrollmentStatus::Active)?;
                e.status = EnrollmentStatus::Active;
                e.updated_at = now;
                Ok(())
            });
        }

        // An errored enrollment gave up its live slot; take it back unless
        // the tuple was re-enrolled in the meantime.
        let key = current.key();
        match self.live.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let holder = *slot.get();
                if holder != id && self.is_live(&holder) {
                    return Err(DripError::DuplicateEnrollment(key));
                }
                let revived = self.revive(id, now)?;
                slot.insert(id);
                Ok(revived)
            }
            Entry::Vacant(slot) => {
                let revived = self.revive(id, now)?;
                slot.insert(id);
                Ok(revived)
            }
        }
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> DripResult<Enrollment> {
        self.mutate(id, |e| {
            self.state_machine.check(e.status, EnrollmentStatus::Canceled)?;
            e.status = EnrollmentStatus::Canceled;
            e.next_send_at = None;
            Self::clear_claim(e);
            e.updated_at = now;
            Ok(())
        })
    }
}
