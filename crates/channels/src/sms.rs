//! Twilio-style SMS sender. Simulated: messages are validated, segmented and
//! logged in memory, and delivery status arrives through
//! [`SmsProvider::handle_status_callback`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drip_core::config::SmsConfig;
use drip_core::directory::MessageSender;
use drip_core::types::{SendReceipt, TenantContext};
use drip_core::{DripError, DripResult};

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Undelivered,
}

impl SmsStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "undelivered" => Some(Self::Undelivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub id: Uuid,
    pub tenant_id: String,
    pub to: String,
    pub from: String,
    pub body: String,
    pub status: SmsStatus,
    pub provider_id: String,
    pub segments: u32,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory SMS transport implementing [`MessageSender`].
pub struct SmsProvider {
    config: SmsConfig,
    messages: DashMap<Uuid, SmsMessage>,
    /// provider_id -> message id, for status callbacks.
    provider_index: DashMap<String, Uuid>,
}

impl SmsProvider {
    pub fn new(config: SmsConfig) -> Self {
        tracing::info!(
            account_sid = %config.account_sid,
            from = %config.from_number,
            "SMS provider initialized"
        );
        Self {
            config,
            messages: DashMap::new(),
            provider_index: DashMap::new(),
        }
    }

    pub fn get_message(&self, id: Uuid) -> Option<SmsMessage> {
        self.messages.get(&id).map(|m| m.clone())
    }

    pub fn get_by_provider_id(&self, provider_id: &str) -> Option<SmsMessage> {
        let id = *self.provider_index.get(provider_id)?;
        self.get_message(id)
    }

    /// Most recent messages first.
    pub fn list_messages(&self, limit: usize) -> Vec<SmsMessage> {
        let mut messages: Vec<SmsMessage> =
            self.messages.iter().map(|m| m.value().clone()).collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        messages
    }

    pub fn messages_to(&self, to: &str) -> Vec<SmsMessage> {
        let mut messages: Vec<SmsMessage> = self
            .messages
            .iter()
            .filter(|m| m.to == to)
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    pub fn sent_count(&self) -> usize {
        self.messages.len()
    }

    /// Apply a delivery status callback. Returns false for unknown
    /// provider ids or statuses.
    pub fn handle_status_callback(
        &self,
        provider_id: &str,
        status: &str,
        error_code: Option<&str>,
    ) -> bool {
        let Some(new_status) = SmsStatus::parse(status) else {
            tracing::warn!(status = %status, "Unknown SMS status in callback");
            return false;
        };
        let Some(id) = self.provider_index.get(provider_id).map(|e| *e) else {
            tracing::warn!(provider_id = %provider_id, "Status callback for unknown provider_id");
            return false;
        };
        let Some(mut msg) = self.messages.get_mut(&id) else {
            return false;
        };
        msg.status = new_status;
        msg.error_code = error_code.map(str::to_string);
        msg.updated_at = Utc::now();

        metrics::counter!("sms.status_callbacks", "status" => status.to_string()).increment(1);
        true
    }

    /// Number of SMS segments needed for `body`: 160/153 septets for GSM-7
    /// (extension characters take two), 70/67 characters for UCS-2.
    pub fn calculate_segments(body: &str) -> u32 {
        let septets: Option<u32> = body.chars().map(gsm_septets).sum();
        let (units, single, multi) = match septets {
            Some(n) => (n, 160, 153),
            None => (body.chars().count() as u32, 70, 67),
        };
        if units <= single {
            1
        } else {
            units.div_ceil(multi)
        }
    }
}

const GSM_BASIC_EXTRA: &str = "@£$¥èéùìòÇØøÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ!\"#¤%&'()*+,-./:;<=>?¡ÄÖÑÜ§¿äöñüà \n\r";
const GSM_EXTENSION: &str = "^{}\\[~]|€";

/// Septets a character occupies in GSM-7, or `None` if it forces UCS-2.
fn gsm_septets(c: char) -> Option<u32> {
    if c.is_ascii_alphanumeric() || GSM_BASIC_EXTRA.contains(c) {
        Some(1)
    } else if GSM_EXTENSION.contains(c) {
        Some(2)
    } else {
        None
    }
}

/// Loose E.164 check: `+` followed by 8 to 15 digits.
fn is_dialable(number: &str) -> bool {
    number
        .strip_prefix('+')
        .is_some_and(|d| (8..=15).contains(&d.len()) && d.chars().all(|c| c.is_ascii_digit()))
}

#[async_trait]
impl MessageSender for SmsProvider {
    async fn send(&self, to: &str, body: &str, tenant: &TenantContext) -> DripResult<SendReceipt> {
        let to = to.trim();
        if !is_dialable(to) {
            metrics::counter!("sms.rejected", "reason" => "invalid_number").increment(1);
            return Err(DripError::Send(format!("invalid destination number {to:?}")));
        }
        if body.trim().is_empty() {
            metrics::counter!("sms.rejected", "reason" => "empty_body").increment(1);
            return Err(DripError::Send("empty message body".to_string()));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let provider_id = format!("SM{}", id.simple());
        let segments = Self::calculate_segments(body);
        let from = tenant
            .from_number
            .clone()
            .unwrap_or_else(|| self.config.from_number.clone());

        tracing::info!(
            id = %id,
            tenant_id = %tenant.tenant_id,
            to = %to,
            provider_id = %provider_id,
            segments = segments,
            "SMS message queued"
        );
        metrics::counter!("sms.messages_sent").increment(1);
        metrics::counter!("sms.segments_sent").increment(u64::from(segments));

        self.messages.insert(
            id,
            SmsMessage {
                id,
                tenant_id: tenant.tenant_id.clone(),
                to: to.to_string(),
                from,
                body: body.to_string(),
                status: SmsStatus::Queued,
                provider_id: provider_id.clone(),
                segments,
                error_code: None,
                created_at: now,
                updated_at: now,
            },
        );
        self.provider_index.insert(provider_id.clone(), id);

        Ok(SendReceipt {
            provider_id,
            segments,
            sent_at: now,
        })
    }
}
