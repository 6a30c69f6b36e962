//! In-memory wiring shared by the unit tests of this crate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use drip_core::directory::{
    InMemoryCampaignDirectory, InMemoryLeadDirectory, MessageSender, TemplateRenderer,
};
use drip_core::event_bus::{capture_sink, CaptureSink};
use drip_core::types::{
    CampaignChannel, CampaignDefinition, CampaignStep, RenderContext, SendReceipt, TenantContext,
};
use drip_core::{Clock, DripError, DripResult, ManualClock};
use drip_lock::LocalLeaseLock;

use crate::context::EngineContext;
use crate::schedule::SendSchedule;
use crate::store::InMemoryEnrollmentStore;
use crate::watch_store::InMemoryFolderWatchStore;

/// Records every send; numbers marked with `fail_for` are rejected.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn fail_for(&self, to: &str) {
        self.failing.lock().insert(to.to_string());
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, to: &str, body: &str, _tenant: &TenantContext) -> DripResult<SendReceipt> {
        if self.failing.lock().contains(to) {
            return Err(DripError::Send(format!("carrier rejected {to}")));
        }
        let mut sent = self.sent.lock();
        sent.push((to.to_string(), body.to_string()));
        Ok(SendReceipt {
            provider_id: format!("test-{}", sent.len()),
            segments: 1,
            sent_at: Utc::now(),
        })
    }
}

/// Substitutes `{{first_name}}` only.
pub struct FirstNameRenderer;

impl TemplateRenderer for FirstNameRenderer {
    fn render(&self, template: &str, context: &RenderContext) -> String {
        template.replace("{{first_name}}", context.get("first_name").unwrap_or(""))
    }
}

pub struct Harness {
    pub ctx: EngineContext,
    pub store: Arc<InMemoryEnrollmentStore>,
    pub watches: Arc<InMemoryFolderWatchStore>,
    pub campaigns: Arc<InMemoryCampaignDirectory>,
    pub leads: Arc<InMemoryLeadDirectory>,
    pub sender: Arc<RecordingSender>,
    pub lock: Arc<LocalLeaseLock>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<CaptureSink>,
}

impl Harness {
    pub fn add_lead(&self, lead_id: &str, first_name: &str, phone: Option<&str>) {
        let mut fields = HashMap::new();
        fields.insert("firstName".to_string(), first_name.to_string());
        if let Some(phone) = phone {
            fields.insert("phone".to_string(), phone.to_string());
        }
        self.leads.upsert_lead("t1", lead_id, fields);
    }
}

/// Fresh in-memory engine with the clock at 2024-03-04 20:00 UTC.
pub fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap(),
    ));
    let store = InMemoryEnrollmentStore::shared();
    let watches = InMemoryFolderWatchStore::shared();
    let campaigns = Arc::new(InMemoryCampaignDirectory::new());
    let leads = Arc::new(InMemoryLeadDirectory::new());
    let sender = Arc::new(RecordingSender::default());
    let lock = Arc::new(LocalLeaseLock::with_clock(
        "test-node",
        clock.clone() as Arc<dyn Clock>,
    ));
    let events = capture_sink();

    let ctx = EngineContext {
        enrollments: store.clone(),
        watches: watches.clone(),
        campaigns: campaigns.clone(),
        leads: leads.clone(),
        sender: sender.clone(),
        renderer: Arc::new(FirstNameRenderer),
        lock: lock.clone(),
        clock: clock.clone(),
        events: events.clone(),
        schedule: SendSchedule::default(),
    };

    Harness {
        ctx,
        store,
        watches,
        campaigns,
        leads,
        sender,
        lock,
        clock,
        events,
    }
}

/// SMS campaign with one step per entry of `days`.
pub fn campaign(tenant_id: &str, id: &str, days: &[u32]) -> CampaignDefinition {
    CampaignDefinition {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        name: format!("Campaign {id}"),
        is_active: true,
        channel: CampaignChannel::Sms,
        steps: days
            .iter()
            .map(|&d| CampaignStep {
                template: format!("Hi {{{{first_name}}}}, day {d}"),
                day_offset: d,
                time_of_day: None,
                active: true,
            })
            .collect(),
    }
}
