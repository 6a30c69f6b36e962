use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Enrollment ─────────────────────────────────────────────────────────

/// Lifecycle status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Error,
    Canceled,
}

impl EnrollmentStatus {
    /// Active and paused enrollments occupy the uniqueness slot for their tuple.
    pub fn is_live(self) -> bool {
        matches!(self, EnrollmentStatus::Active | EnrollmentStatus::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EnrollmentStatus::Completed | EnrollmentStatus::Canceled)
    }
}

/// How an enrollment came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentSource {
    Manual,
    FolderBulk,
    SheetBulk,
}

/// When the first step of a new enrollment becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    #[default]
    Immediate,
    NextWindow,
}

/// The (tenant, lead, campaign) triple that identifies a drip lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentKey {
    pub tenant_id: String,
    pub lead_id: String,
    pub campaign_id: String,
}

impl EnrollmentKey {
    pub fn new(
        tenant_id: impl Into<String>,
        lead_id: impl Into<String>,
        campaign_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            lead_id: lead_id.into(),
            campaign_id: campaign_id.into(),
        }
    }
}

impl fmt::Display for EnrollmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant_id, self.lead_id, self.campaign_id)
    }
}

/// Persisted progression of one lead through one campaign.
///
/// Holds ids only; lead and campaign documents are resolved through the
/// directory traits when needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub tenant_id: String,
    pub lead_id: String,
    pub campaign_id: String,
    pub status: EnrollmentStatus,
    pub cursor_step: u32,
    pub next_send_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub processing: bool,
    pub processing_at: Option<DateTime<Utc>>,
    pub source: EnrollmentSource,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn key(&self) -> EnrollmentKey {
        EnrollmentKey::new(&self.tenant_id, &self.lead_id, &self.campaign_id)
    }

    /// Due means active, scheduled at or before `now`, and not held by a
    /// fresh claim.
    pub fn is_due(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.status == EnrollmentStatus::Active
            && self.next_send_at.is_some_and(|at| at <= now)
            && self.is_claimable(now, stale_after)
    }

    /// A claim older than `stale_after` counts as abandoned.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        if !self.processing {
            return true;
        }
        match self.processing_at {
            Some(at) => now.signed_duration_since(at) > stale_after,
            None => true,
        }
    }
}

/// Request to create an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEnrollment {
    pub tenant_id: String,
    pub lead_id: String,
    pub campaign_id: String,
    pub source: EnrollmentSource,
    #[serde(default)]
    pub start_mode: StartMode,
}

impl NewEnrollment {
    pub fn key(&self) -> EnrollmentKey {
        EnrollmentKey::new(&self.tenant_id, &self.lead_id, &self.campaign_id)
    }
}

// ─── Campaign definitions ───────────────────────────────────────────────

/// Delivery channel of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignChannel {
    Sms,
    Voice,
    Email,
}

/// One step of a drip sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStep {
    pub template: String,
    /// Days after the enrollment anchor.
    pub day_offset: u32,
    /// Wall-clock time on the target day; `None` keeps the anchor's time.
    #[serde(default)]
    pub time_of_day: Option<NaiveTime>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Read-only campaign definition owned by an external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDefinition {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub is_active: bool,
    pub channel: CampaignChannel,
    pub steps: Vec<CampaignStep>,
}

impl CampaignDefinition {
    /// Steps the cursor walks over; inactive steps are skipped.
    pub fn active_steps(&self) -> Vec<&CampaignStep> {
        self.steps.iter().filter(|s| s.active).collect()
    }

    pub fn step_at(&self, cursor: u32) -> Option<&CampaignStep> {
        self.steps
            .iter()
            .filter(|s| s.active)
            .nth(usize::try_from(cursor).ok()?)
    }

    pub fn step_count(&self) -> u32 {
        u32::try_from(self.steps.iter().filter(|s| s.active).count()).unwrap_or(u32::MAX)
    }
}

// ─── Folder watches ─────────────────────────────────────────────────────

/// Standing subscription that auto-enrolls folder members into a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderWatch {
    pub id: Uuid,
    pub tenant_id: String,
    pub folder_id: String,
    pub campaign_id: String,
    pub start_mode: StartMode,
    pub active: bool,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub deactivated_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FolderWatch {
    pub fn new(
        tenant_id: impl Into<String>,
        folder_id: impl Into<String>,
        campaign_id: impl Into<String>,
        start_mode: StartMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            folder_id: folder_id.into(),
            campaign_id: campaign_id.into(),
            start_mode,
            active: true,
            last_scan_at: None,
            deactivated_reason: None,
            created_at: now,
        }
    }
}

// ─── Locks ──────────────────────────────────────────────────────────────

/// A leased mutual-exclusion record. Released only by expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub domain: String,
    pub key: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

// ─── Lead and tenant context ────────────────────────────────────────────

/// Canonical form of a lead field name: lowercase ASCII alphanumerics only,
/// so `firstName`, `first_name` and `First Name` collapse to `firstname`.
pub fn normalize_field_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Typed lead view, normalized once at the directory boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadContext {
    pub lead_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Remaining fields keyed by normalized name.
    pub fields: BTreeMap<String, String>,
}

impl LeadContext {
    /// Build a context from loosely-typed lead fields. The first non-empty
    /// value among the casing variants of a field wins.
    pub fn from_fields(lead_id: impl Into<String>, raw: &HashMap<String, String>) -> Self {
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        let mut names: Vec<&String> = raw.keys().collect();
        names.sort();
        for name in names {
            let value = raw[name].trim();
            if value.is_empty() {
                continue;
            }
            fields
                .entry(normalize_field_name(name))
                .or_insert_with(|| value.to_string());
        }

        let first_name = fields.remove("firstname");
        let last_name = fields.remove("lastname");
        let phone = fields
            .remove("phone")
            .or_else(|| fields.remove("phonenumber"))
            .or_else(|| fields.remove("mobile"));
        let email = fields
            .remove("email")
            .or_else(|| fields.remove("emailaddress"));

        Self {
            lead_id: lead_id.into(),
            first_name,
            last_name,
            phone,
            email,
            fields,
        }
    }

    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        }
    }
}

/// Recent conversation activity used by the suppression policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadActivity {
    pub last_human_outbound_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

/// Per-tenant sending identity and agent details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub agent_name: Option<String>,
    pub agent_phone: Option<String>,
    pub from_number: Option<String>,
}

/// Flat variable map handed to the template renderer.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: HashMap<String, String>,
}

impl RenderContext {
    pub fn new(lead: &LeadContext, tenant: &TenantContext) -> Self {
        let mut values: HashMap<String, String> = lead
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut put = |name: &str, value: Option<String>| {
            if let Some(v) = value {
                values.insert(normalize_field_name(name), v);
            }
        };
        put("first_name", lead.first_name.clone());
        put("last_name", lead.last_name.clone());
        put("full_name", lead.full_name());
        put("phone", lead.phone.clone());
        put("email", lead.email.clone());
        put("agent_name", tenant.agent_name.clone());
        put("agent_phone", tenant.agent_phone.clone());
        Self { values }
    }

    /// Look up a placeholder by any casing variant of its name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&normalize_field_name(name))
            .map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(normalize_field_name(name), value.into());
    }
}

/// Transport acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_id: String,
    pub segments: u32,
    pub sent_at: DateTime<Utc>,
}
