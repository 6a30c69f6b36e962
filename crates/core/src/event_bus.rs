//! Unified event bus — trait for emitting enrollment lifecycle events.
//!
//! The engine never talks to pub/sub directly. Components accept an
//! `Arc<dyn EventSink>` and an adapter forwards events to the real-time
//! notification transport.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DripEventType {
    EnrollmentCreated,
    EnrollmentPaused,
    EnrollmentResumed,
    EnrollmentCanceled,
    StepSent,
    EnrollmentCompleted,
    EnrollmentFailed,
    SendSuppressed,
    FolderWatchDeactivated,
}

/// An event describing a state change inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripEvent {
    pub event_id: Uuid,
    pub event_type: DripEventType,
    pub tenant_id: String,
    pub lead_id: Option<String>,
    pub campaign_id: Option<String>,
    pub subject_id: Option<Uuid>,
    pub detail: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Trait for emitting events. Implementations forward to pub/sub or logs.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DripEvent);
}

/// No-op sink for tests and deployments without a notification adapter.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: DripEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DripEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DripEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: DripEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DripEvent) {
        self.events.lock().push(event);
    }
}

/// Sink that writes each event to the tracing log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DripEvent) {
        tracing::info!(
            event_type = ?event.event_type,
            tenant_id = %event.tenant_id,
            lead_id = ?event.lead_id,
            campaign_id = ?event.campaign_id,
            subject_id = ?event.subject_id,
            detail = ?event.detail,
            "drip event"
        );
    }
}

/// Convenience builder for creating a `DripEvent` with minimal boilerplate.
pub fn make_event(
    event_type: DripEventType,
    tenant_id: impl Into<String>,
    lead_id: Option<String>,
    campaign_id: Option<String>,
    subject_id: Option<Uuid>,
) -> DripEvent {
    DripEvent {
        event_id: Uuid::new_v4(),
        event_type,
        tenant_id: tenant_id.into(),
        lead_id,
        campaign_id,
        subject_id,
        detail: None,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(make_event(
            DripEventType::EnrollmentCreated,
            "tenant-1",
            Some("lead-1".into()),
            Some("camp-1".into()),
            None,
        ));
        let mut sent = make_event(
            DripEventType::StepSent,
            "tenant-1",
            Some("lead-1".into()),
            Some("camp-1".into()),
            None,
        );
        sent.detail = Some("step 0".into());
        sink.emit(sent);

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(DripEventType::EnrollmentCreated), 1);
        assert_eq!(sink.count_type(DripEventType::StepSent), 1);

        let events = sink.events();
        assert_eq!(events[0].tenant_id, "tenant-1");
        assert_eq!(events[1].detail, Some("step 0".into()));

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        sink.emit(make_event(
            DripEventType::SendSuppressed,
            "tenant-1",
            None,
            None,
            None,
        ));
    }
}
