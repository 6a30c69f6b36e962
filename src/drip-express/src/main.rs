//! Drip Express — multi-tenant drip campaign enrollment and scheduling engine.
//!
//! Main entry point: loads configuration, wires the engine, and serves the
//! REST API with the cron trigger endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use drip_api::{ApiServer, AppState};
use drip_channels::{DripTemplateRenderer, SmsProvider};
use drip_core::config::{AppConfig, LockBackend};
use drip_core::directory::{InMemoryCampaignDirectory, InMemoryLeadDirectory};
use drip_core::event_bus::TracingSink;
use drip_core::{Clock, SystemClock};
use drip_engine::{
    demo, Dispatcher, DispatcherSettings, EngineContext, EnrollmentService, FolderWatchSettings,
    FolderWatcher, InMemoryEnrollmentStore, InMemoryFolderWatchStore, SendSchedule,
    SuppressionPolicy,
};
use drip_lock::{LeaseLock, LocalLeaseLock, RedisLeaseLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LockArg {
    Local,
    Redis,
}

impl From<LockArg> for LockBackend {
    fn from(arg: LockArg) -> Self {
        match arg {
            LockArg::Local => LockBackend::Local,
            LockArg::Redis => LockBackend::Redis,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "drip-express")]
#[command(about = "Drip campaign enrollment and scheduling engine")]
#[command(version)]
struct Cli {
    /// TOML config file, read beneath the environment
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "DRIP_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "DRIP_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Lock backend (overrides config)
    #[arg(long, value_enum)]
    lock_backend: Option<LockArg>,

    /// Built-in trigger period in seconds; 0 relies on an external cron
    #[arg(long)]
    tick_interval_secs: Option<u64>,

    /// Seed the demo tenant, campaign, leads and folder watch
    #[arg(long, default_value_t = false)]
    seed_demo: bool,

    /// Run one folder-watch tick and one dispatch tick, print the reports, and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drip_express=info,drip_engine=info,drip_api=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Drip Express starting up");

    let mut config = match AppConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(backend) = cli.lock_backend {
        config.lock.backend = backend.into();
    }
    if let Some(secs) = cli.tick_interval_secs {
        config.dispatcher.tick_interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        lock_backend = ?config.lock.backend,
        tick_interval_secs = config.dispatcher.tick_interval_secs,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Lease locks: local for a single process, Redis when workers share state.
    let mut local_lock = None;
    let lock: Arc<dyn LeaseLock> = match config.lock.backend {
        LockBackend::Local => {
            let lock = Arc::new(LocalLeaseLock::with_clock(
                config.node_id.clone(),
                clock.clone(),
            ));
            local_lock = Some(lock.clone());
            lock
        }
        LockBackend::Redis => {
            Arc::new(RedisLeaseLock::new(&config.redis, config.node_id.clone()).await?)
        }
    };

    let campaigns = Arc::new(InMemoryCampaignDirectory::new());
    let leads = Arc::new(InMemoryLeadDirectory::new());
    let watches = InMemoryFolderWatchStore::shared();
    let sms = Arc::new(SmsProvider::new(config.sms.clone()));

    let ctx = EngineContext {
        enrollments: InMemoryEnrollmentStore::shared(),
        watches: watches.clone(),
        campaigns: campaigns.clone(),
        leads: leads.clone(),
        sender: sms.clone(),
        renderer: Arc::new(DripTemplateRenderer::from_config(&config.templates)),
        lock,
        clock: clock.clone(),
        events: Arc::new(TracingSink),
        schedule: SendSchedule::from_config(&config.send_window)?,
    };

    if cli.seed_demo {
        let watch = demo::seed_demo(&campaigns, &leads, watches.as_ref(), clock.now()).await?;
        info!(watch_id = %watch.id, folder_id = %watch.folder_id, "Demo data seeded");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        ctx.clone(),
        DispatcherSettings::from_config(&config.dispatcher),
        SuppressionPolicy::from_config(&config.suppression),
    ));
    let folder_watcher = Arc::new(FolderWatcher::new(
        ctx.clone(),
        FolderWatchSettings::from_config(&config.folder_watch, &config.dispatcher),
    ));

    if cli.once {
        let watched = folder_watcher.tick().await?;
        println!("{}", serde_json::to_string_pretty(&watched)?);
        let dispatched = dispatcher.tick().await?;
        println!("{}", serde_json::to_string_pretty(&dispatched)?);
        return Ok(());
    }

    if config.dispatcher.tick_interval_secs > 0 {
        let period = Duration::from_secs(config.dispatcher.tick_interval_secs);
        let dispatcher = dispatcher.clone();
        let folder_watcher = folder_watcher.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                // Folder first so freshly enrolled leads are due this round.
                if let Err(e) = folder_watcher.tick().await {
                    error!(error = %e, "Folder-watch tick failed");
                }
                if let Err(e) = dispatcher.tick().await {
                    error!(error = %e, "Dispatch tick failed");
                }
            }
        });
        info!(period_secs = period.as_secs(), "Built-in trigger started");
    }

    // Expired local leases are dead weight; sweep them periodically.
    if let Some(local_lock) = local_lock {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let evicted = local_lock.evict_expired();
                if evicted > 0 {
                    info!(evicted, "Evicted expired leases");
                }
            }
        });
    }

    let state = AppState {
        enrollments: EnrollmentService::new(ctx),
        dispatcher,
        folder_watcher,
        sms: Some(sms),
        cron_secret: config.cron.secret.clone(),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
    };
    if state.cron_secret.is_none() {
        warn!("No cron secret configured; cron endpoints are unauthenticated");
    }

    let api_server = ApiServer::new(config.clone(), state);

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("Drip Express is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
