use serde::Deserialize;

use crate::types::CampaignChannel;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DRIP_EXPRESS__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub suppression: SuppressionConfig,
    #[serde(default)]
    pub send_window: SendWindowConfig,
    #[serde(default)]
    pub folder_watch: FolderWatchConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub cron: CronConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Which lease-lock implementation backs job, watch and send-dedup locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    Local,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_backend")]
    pub backend: LockBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Max enrollments selected per tick.
    #[serde(default = "default_dispatch_batch_size")]
    pub batch_size: usize,
    /// Age after which a processing claim is considered abandoned.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
    /// Lifetime of the per-step send-dedup lock.
    #[serde(default = "default_send_dedup_ttl_secs")]
    pub send_dedup_ttl_secs: u64,
    /// Lifetime of the job-level lock taken by each tick.
    #[serde(default = "default_job_lock_ttl_secs")]
    pub job_lock_ttl_secs: u64,
    /// Delay before re-checking an enrollment skipped for lock contention.
    #[serde(default = "default_contention_recheck_secs")]
    pub contention_recheck_secs: u64,
    /// Built-in periodic trigger; 0 leaves triggering to an external cron.
    #[serde(default)]
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuppressionConfig {
    #[serde(default = "default_suppression_enabled")]
    pub enabled: bool,
    /// Cooldown after a human operator message during which drips wait.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Daily window in which `next_window` enrollments may start.
#[derive(Debug, Clone, Deserialize)]
pub struct SendWindowConfig {
    #[serde(default = "default_window_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_window_end_hour")]
    pub end_hour: u32,
    /// Offset of the window's local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderWatchConfig {
    /// Safety cap on enrollments created per watch per tick.
    #[serde(default = "default_folder_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_watch_lock_ttl_secs")]
    pub watch_lock_ttl_secs: u64,
    #[serde(default = "default_applicable_channels")]
    pub applicable_channels: Vec<CampaignChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_opt_out_suffix")]
    pub opt_out_suffix: String,
}

/// Default sending identity of the SMS transport; tenants may override
/// the from-number.
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_sms_account_sid")]
    pub account_sid: String,
    #[serde(default = "default_sms_from_number")]
    pub from_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronConfig {
    /// Shared secret the cron trigger must present. `None` disables the check.
    #[serde(default)]
    pub secret: Option<String>,
}

// Default functions
fn default_node_id() -> String {
    "drip-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_key_prefix() -> String {
    "drip".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_lock_backend() -> LockBackend {
    LockBackend::Local
}
fn default_dispatch_batch_size() -> usize {
    100
}
fn default_stale_claim_secs() -> u64 {
    60
}
fn default_send_dedup_ttl_secs() -> u64 {
    600
}
fn default_job_lock_ttl_secs() -> u64 {
    55
}
fn default_contention_recheck_secs() -> u64 {
    60
}
fn default_suppression_enabled() -> bool {
    true
}
fn default_cooldown_secs() -> u64 {
    4 * 3600
}
fn default_window_start_hour() -> u32 {
    9
}
fn default_window_end_hour() -> u32 {
    17
}
fn default_folder_batch_size() -> usize {
    200
}
fn default_watch_lock_ttl_secs() -> u64 {
    120
}
fn default_applicable_channels() -> Vec<CampaignChannel> {
    vec![CampaignChannel::Sms]
}
fn default_opt_out_suffix() -> String {
    "Reply STOP to opt out.".to_string()
}
fn default_sms_account_sid() -> String {
    "AC_local".to_string()
}
fn default_sms_from_number() -> String {
    "+15550100000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: default_lock_backend(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_dispatch_batch_size(),
            stale_claim_secs: default_stale_claim_secs(),
            send_dedup_ttl_secs: default_send_dedup_ttl_secs(),
            job_lock_ttl_secs: default_job_lock_ttl_secs(),
            contention_recheck_secs: default_contention_recheck_secs(),
            tick_interval_secs: 0,
        }
    }
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_suppression_enabled(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for SendWindowConfig {
    fn default() -> Self {
        Self {
            start_hour: default_window_start_hour(),
            end_hour: default_window_end_hour(),
            utc_offset_minutes: 0,
        }
    }
}

impl Default for FolderWatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_folder_batch_size(),
            watch_lock_ttl_secs: default_watch_lock_ttl_secs(),
            applicable_channels: default_applicable_channels(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            opt_out_suffix: default_opt_out_suffix(),
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            account_sid: default_sms_account_sid(),
            from_number: default_sms_from_number(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            redis: RedisConfig::default(),
            lock: LockConfig::default(),
            dispatcher: DispatcherConfig::default(),
            suppression: SuppressionConfig::default(),
            send_window: SendWindowConfig::default(),
            folder_watch: FolderWatchConfig::default(),
            templates: TemplateConfig::default(),
            sms: SmsConfig::default(),
            cron: CronConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Like [`AppConfig::load`], reading `path` (TOML) beneath the environment.
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("DRIP_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("redis.urls")
                .with_list_parse_key("folder_watch.applicable_channels"),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot operate with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let window = &self.send_window;
        if window.start_hour > 23 || window.end_hour > 24 || window.start_hour >= window.end_hour {
            return Err(config::ConfigError::Message(format!(
                "send_window must satisfy 0 <= start_hour < end_hour <= 24, got {}..{}",
                window.start_hour, window.end_hour
            )));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(config::ConfigError::Message(
                "dispatcher.batch_size must be positive".to_string(),
            ));
        }
        if self.dispatcher.stale_claim_secs == 0 {
            return Err(config::ConfigError::Message(
                "dispatcher.stale_claim_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
