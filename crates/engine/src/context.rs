use std::sync::Arc;

use drip_core::directory::{CampaignDirectory, LeadDirectory, MessageSender, TemplateRenderer};
use drip_core::event_bus::EventSink;
use drip_core::Clock;
use drip_lock::LeaseLock;

use crate::schedule::SendSchedule;
use crate::store::EnrollmentStore;
use crate::watch_store::FolderWatchStore;

/// Everything the engine components share: persistence, collaborators, the
/// lock, the clock and the event sink. Cheap to clone.
#[derive(Clone)]
pub struct EngineContext {
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub watches: Arc<dyn FolderWatchStore>,
    pub campaigns: Arc<dyn CampaignDirectory>,
    pub leads: Arc<dyn LeadDirectory>,
    pub sender: Arc<dyn MessageSender>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub lock: Arc<dyn LeaseLock>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub schedule: SendSchedule,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Attach an event sink for lifecycle notifications.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
