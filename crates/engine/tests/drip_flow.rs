//! End-to-end drip scenarios over the in-memory stores, the local lease
//! lock, the SMS simulator and a manual clock.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use drip_channels::{DripTemplateRenderer, SmsProvider};
use drip_core::config::SmsConfig;
use drip_core::directory::{InMemoryCampaignDirectory, InMemoryLeadDirectory};
use drip_core::event_bus::{capture_sink, CaptureSink, DripEventType};
use drip_core::types::{
    CampaignChannel, CampaignDefinition, CampaignStep, EnrollmentSource, EnrollmentStatus,
    FolderWatch, NewEnrollment, StartMode,
};
use drip_core::{Clock, DripError, ManualClock};
use drip_engine::{
    Dispatcher, DispatcherSettings, EngineContext, EnrollmentService, EnrollmentStore,
    FolderWatchSettings, FolderWatchStore, FolderWatcher, InMemoryEnrollmentStore,
    InMemoryFolderWatchStore, SendSchedule, SuppressionPolicy,
};
use drip_lock::LocalLeaseLock;
use uuid::Uuid;

const TENANT: &str = "acme";
const CAMPAIGN: &str = "follow-up";

struct World {
    ctx: EngineContext,
    store: Arc<InMemoryEnrollmentStore>,
    watches: Arc<InMemoryFolderWatchStore>,
    campaigns: Arc<InMemoryCampaignDirectory>,
    leads: Arc<InMemoryLeadDirectory>,
    sms: Arc<SmsProvider>,
    clock: Arc<ManualClock>,
    events: Arc<CaptureSink>,
}

impl World {
    /// Monday 2024-03-04 10:00 UTC, inside the default send window.
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = InMemoryEnrollmentStore::shared();
        let watches = InMemoryFolderWatchStore::shared();
        let campaigns = Arc::new(InMemoryCampaignDirectory::new());
        let leads = Arc::new(InMemoryLeadDirectory::new());
        let sms = Arc::new(SmsProvider::new(SmsConfig::default()));
        let events = capture_sink();
        let lock = Arc::new(LocalLeaseLock::with_clock(
            "node-a",
            clock.clone() as Arc<dyn Clock>,
        ));

        campaigns.upsert(CampaignDefinition {
            id: CAMPAIGN.into(),
            tenant_id: TENANT.into(),
            name: "Follow up".into(),
            is_active: true,
            channel: CampaignChannel::Sms,
            steps: [0, 2, 5]
                .iter()
                .map(|&day| CampaignStep {
                    template: format!("Hi {{{{ first_name | default:\"there\" }}}}, day {day}"),
                    day_offset: day,
                    time_of_day: None,
                    active: true,
                })
                .collect(),
        });

        let ctx = EngineContext {
            enrollments: store.clone(),
            watches: watches.clone(),
            campaigns: campaigns.clone(),
            leads: leads.clone(),
            sender: sms.clone(),
            renderer: Arc::new(DripTemplateRenderer::default()),
            lock,
            clock: clock.clone(),
            events: events.clone(),
            schedule: SendSchedule::default(),
        };

        Self {
            ctx,
            store,
            watches,
            campaigns,
            leads,
            sms,
            clock,
            events,
        }
    }

    fn add_lead(&self, lead_id: &str, phone: &str) {
        let mut fields = HashMap::new();
        fields.insert("First Name".to_string(), lead_id.to_uppercase());
        fields.insert("phone_number".to_string(), phone.to_string());
        self.leads.upsert_lead(TENANT, lead_id, fields);
    }

    fn service(&self) -> EnrollmentService {
        EnrollmentService::new(self.ctx.clone())
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.ctx.clone(),
            DispatcherSettings::default(),
            SuppressionPolicy::new(true, Duration::hours(4)),
        )
    }

    async fn enroll(&self, lead_id: &str) -> Uuid {
        self.service()
            .create(NewEnrollment {
                tenant_id: TENANT.into(),
                lead_id: lead_id.into(),
                campaign_id: CAMPAIGN.into(),
                source: EnrollmentSource::Manual,
                start_mode: StartMode::Immediate,
            })
            .await
            .unwrap()
            .id
    }

    fn bodies_to(&self, phone: &str) -> Vec<String> {
        self.sms
            .messages_to(phone)
            .into_iter()
            .map(|m| m.body)
            .collect()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
}

#[tokio::test]
async fn day0_day2_day5_with_cancel() {
    let world = World::new();
    world.add_lead("ann", "+15550000001");
    world.add_lead("bob", "+15550000002");
    let ann = world.enroll("ann").await;
    let bob = world.enroll("bob").await;
    let dispatcher = world.dispatcher();

    let report = dispatcher.tick().await.unwrap();
    assert_eq!(report.sent, 2);
    // Same instant: the job lock is still held.
    assert!(dispatcher.tick().await.unwrap().skipped);

    world.clock.advance(Duration::days(1));
    assert_eq!(dispatcher.tick().await.unwrap().selected, 0);

    world.clock.advance(Duration::days(1));
    assert_eq!(dispatcher.tick().await.unwrap().sent, 2);

    world.service().cancel(bob).await.unwrap();

    world.clock.advance(Duration::days(3));
    let report = dispatcher.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.completed, 1);

    world.clock.advance(Duration::days(30));
    assert_eq!(dispatcher.tick().await.unwrap().selected, 0);

    assert_eq!(
        world.bodies_to("+15550000001"),
        vec![
            "Hi ANN, day 0 Reply STOP to opt out.",
            "Hi ANN, day 2 Reply STOP to opt out.",
            "Hi ANN, day 5 Reply STOP to opt out.",
        ]
    );
    assert_eq!(world.bodies_to("+15550000002").len(), 2);

    let ann = world.store.get(ann).await.unwrap().unwrap();
    assert_eq!(ann.status, EnrollmentStatus::Completed);
    assert_eq!(ann.cursor_step, 3);
    assert_eq!(ann.next_send_at, None);
    let bob = world.store.get(bob).await.unwrap().unwrap();
    assert_eq!(bob.status, EnrollmentStatus::Canceled);
    assert_eq!(bob.cursor_step, 2);
    assert_eq!(world.events.count_type(DripEventType::EnrollmentCompleted), 1);
    assert_eq!(world.events.count_type(DripEventType::StepSent), 5);
}

#[tokio::test]
async fn cancel_after_step_is_due_stops_the_send() {
    let world = World::new();
    world.add_lead("cy", "+15550000003");
    let cy = world.enroll("cy").await;
    let dispatcher = world.dispatcher();
    assert_eq!(dispatcher.tick().await.unwrap().sent, 1);

    // Day 2 is overdue by a day when the cancel lands.
    world.clock.advance(Duration::days(3));
    let due = world.store.get(cy).await.unwrap().unwrap();
    assert!(due.next_send_at.unwrap() < world.clock.now());
    world.service().cancel(cy).await.unwrap();

    let report = dispatcher.tick().await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.selected, 0);
    assert_eq!(report.sent, 0);

    world.clock.advance(Duration::days(10));
    assert_eq!(dispatcher.tick().await.unwrap().sent, 0);

    assert_eq!(world.bodies_to("+15550000003").len(), 1);
    let cy = world.store.get(cy).await.unwrap().unwrap();
    assert_eq!(cy.status, EnrollmentStatus::Canceled);
    assert_eq!(cy.cursor_step, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_send_each_step_once() {
    let world = World::new();
    for i in 0..60 {
        let lead = format!("lead-{i}");
        world.add_lead(&lead, &format!("+1555100{i:04}"));
        world.enroll(&lead).await;
    }

    let dispatcher = Arc::new(world.dispatcher());
    let mut workers = Vec::new();
    for _ in 0..8 {
        let dispatcher = dispatcher.clone();
        workers.push(tokio::spawn(async move { dispatcher.run_batch().await }));
    }

    let mut sent = 0;
    for worker in workers {
        sent += worker.await.unwrap().unwrap().sent;
    }
    assert_eq!(sent, 60);
    assert_eq!(world.sms.sent_count(), 60);
    for i in 0..60 {
        assert_eq!(world.sms.messages_to(&format!("+1555100{i:04}")).len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_keep_one_live_enrollment() {
    let world = World::new();
    let service = world.service();
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .create(NewEnrollment {
                    tenant_id: TENANT.into(),
                    lead_id: "racer".into(),
                    campaign_id: CAMPAIGN.into(),
                    source: EnrollmentSource::Manual,
                    start_mode: StartMode::Immediate,
                })
                .await
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(e.is_duplicate(), "unexpected error {e}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(world.store.len(), 1);
}

#[tokio::test]
async fn stale_claim_is_reclaimed_and_fenced() {
    let world = World::new();
    world.add_lead("ann", "+15550000001");
    let id = world.enroll("ann").await;
    let settings = DispatcherSettings::default();

    // A worker claims and then disappears.
    let abandoned = world
        .store
        .claim(id, world.clock.now(), settings.stale_after)
        .await
        .unwrap()
        .unwrap();

    let dispatcher = world.dispatcher();
    assert_eq!(dispatcher.run_batch().await.unwrap().selected, 0);

    world.clock.advance(Duration::seconds(60));
    assert_eq!(dispatcher.run_batch().await.unwrap().selected, 0);

    world.clock.advance(Duration::seconds(1));
    assert_eq!(dispatcher.run_batch().await.unwrap().sent, 1);

    let late = world
        .store
        .advance(&abandoned, None, world.clock.now())
        .await;
    assert!(matches!(late, Err(DripError::StaleClaim(_))));
    let e = world.store.get(id).await.unwrap().unwrap();
    assert_eq!(e.cursor_step, 1);
    assert_eq!(e.status, EnrollmentStatus::Active);
}

#[tokio::test]
async fn human_outreach_defers_drip_until_cooldown() {
    let world = World::new();
    world.add_lead("ann", "+15550000001");
    let id = world.enroll("ann").await;
    let human = t0() - Duration::hours(1);
    world.leads.record_human_outbound(TENANT, "ann", human);
    let dispatcher = world.dispatcher();

    assert_eq!(dispatcher.run_batch().await.unwrap().suppressed, 1);
    let e = world.store.get(id).await.unwrap().unwrap();
    assert_eq!(e.next_send_at, Some(human + Duration::hours(4)));

    world.clock.set(human + Duration::hours(4) - Duration::seconds(1));
    assert_eq!(dispatcher.run_batch().await.unwrap().selected, 0);

    world.clock.set(human + Duration::hours(4));
    assert_eq!(dispatcher.run_batch().await.unwrap().sent, 1);
    assert_eq!(world.sms.sent_count(), 1);
}

#[tokio::test]
async fn inbound_reply_lifts_suppression() {
    let world = World::new();
    world.add_lead("ann", "+15550000001");
    world.enroll("ann").await;
    world
        .leads
        .record_human_outbound(TENANT, "ann", t0() - Duration::minutes(30));
    world
        .leads
        .record_inbound(TENANT, "ann", t0() - Duration::minutes(10));

    assert_eq!(world.dispatcher().run_batch().await.unwrap().sent, 1);
}

#[tokio::test]
async fn failed_send_waits_for_manual_resume() {
    let world = World::new();
    world.add_lead("ann", "not-a-number");
    let id = world.enroll("ann").await;
    let dispatcher = world.dispatcher();

    assert_eq!(dispatcher.run_batch().await.unwrap().failed, 1);
    let e = world.store.get(id).await.unwrap().unwrap();
    assert_eq!(e.status, EnrollmentStatus::Error);
    assert!(e.last_error.unwrap().contains("invalid destination"));

    world.clock.advance(Duration::minutes(1));
    assert_eq!(dispatcher.run_batch().await.unwrap().selected, 0);

    world.add_lead("ann", "+15550000001");
    let resumed = world.service().resume(id).await.unwrap();
    assert_eq!(resumed.next_send_at, Some(world.clock.now()));
    assert_eq!(resumed.last_error, None);

    // The failed attempt still holds the step's dedup lock.
    assert_eq!(dispatcher.run_batch().await.unwrap().contended, 1);
    world.clock.advance(Duration::minutes(10));
    assert_eq!(dispatcher.run_batch().await.unwrap().sent, 1);
    assert_eq!(world.bodies_to("+15550000001").len(), 1);
}

#[tokio::test]
async fn overlapping_folder_ticks_do_not_double_enroll() {
    let world = World::new();
    for i in 0..25 {
        let lead = format!("f-{i}");
        world.add_lead(&lead, &format!("+1555200{i:04}"));
        world.leads.add_to_folder(TENANT, "hot", &lead);
    }
    world
        .watches
        .insert(FolderWatch::new(
            TENANT,
            "hot",
            CAMPAIGN,
            StartMode::Immediate,
            world.clock.now(),
        ))
        .await
        .unwrap();

    // Two workers whose locks do not see each other, as after a lock
    // backend failover.
    let second_ctx = EngineContext {
        lock: Arc::new(LocalLeaseLock::with_clock(
            "node-b",
            world.clock.clone() as Arc<dyn Clock>,
        )),
        ..world.ctx.clone()
    };
    let a = FolderWatcher::new(world.ctx.clone(), FolderWatchSettings::default());
    let b = FolderWatcher::new(second_ctx, FolderWatchSettings::default());

    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.created + rb.created, 25);
    assert_eq!(world.store.len(), 25);
    assert_eq!(world.store.live_leads(TENANT, CAMPAIGN).await.unwrap().len(), 25);

    // A manual import of the same leads is a no-op.
    let leads: Vec<String> = (0..25).map(|i| format!("f-{i}")).collect();
    let report = world
        .service()
        .bulk_enroll(TENANT, CAMPAIGN, &leads, StartMode::Immediate)
        .await
        .unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.deduped, 25);
}

#[tokio::test]
async fn deactivated_campaign_stops_watch_and_errors_due_enrollments() {
    let world = World::new();
    world.add_lead("ann", "+15550000001");
    world.leads.add_to_folder(TENANT, "hot", "ann");
    let watch = world
        .service()
        .create_watch(TENANT, "hot", CAMPAIGN, StartMode::Immediate)
        .await
        .unwrap();
    let watcher = FolderWatcher::new(world.ctx.clone(), FolderWatchSettings::default());
    assert_eq!(watcher.tick().await.unwrap().created, 1);

    world.campaigns.set_active(CAMPAIGN, false);
    world.clock.advance(Duration::minutes(5));
    let report = watcher.tick().await.unwrap();
    assert_eq!(report.deactivated, 1);
    assert!(!world.watches.get(watch.id).await.unwrap().unwrap().active);

    assert_eq!(world.dispatcher().run_batch().await.unwrap().failed, 1);
    assert_eq!(world.sms.sent_count(), 0);
}
