//! Human-interaction suppression: a drip waits while a human operator is
//! actively talking to the lead.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use drip_core::config::SuppressionConfig;
use drip_core::types::LeadActivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SuppressionDecision {
    Allow,
    /// Skip this tick and reconsider at `retry_after`.
    Skip { retry_after: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct SuppressionPolicy {
    enabled: bool,
    cooldown: Duration,
}

impl SuppressionPolicy {
    pub fn new(enabled: bool, cooldown: Duration) -> Self {
        Self { enabled, cooldown }
    }

    pub fn from_config(config: &SuppressionConfig) -> Self {
        let secs = i64::try_from(config.cooldown_secs).unwrap_or(i64::MAX / 1000);
        Self::new(config.enabled, Duration::seconds(secs))
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::zero())
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Skip when the latest human outbound is newer than the latest inbound
    /// reply (or there is no reply) and falls inside the cooldown.
    pub fn evaluate(&self, activity: &LeadActivity, now: DateTime<Utc>) -> SuppressionDecision {
        if !self.enabled {
            return SuppressionDecision::Allow;
        }
        let Some(human) = activity.last_human_outbound_at else {
            return SuppressionDecision::Allow;
        };
        if activity.last_inbound_at.is_some_and(|inbound| inbound >= human) {
            return SuppressionDecision::Allow;
        }
        if now.signed_duration_since(human) >= self.cooldown {
            return SuppressionDecision::Allow;
        }
        SuppressionDecision::Skip {
            retry_after: human + self.cooldown,
        }
    }
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self::from_config(&SuppressionConfig::default())
    }
}
