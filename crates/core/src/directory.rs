//! Collaborator seams: campaign definitions, the lead directory, message
//! transport and template rendering. The engine only sees these traits.
//!
//! In-memory directories are provided for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::DripResult;
use crate::types::{
    CampaignDefinition, LeadActivity, LeadContext, RenderContext, SendReceipt, TenantContext,
};

/// Read-only access to campaign definitions.
#[async_trait]
pub trait CampaignDirectory: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> DripResult<Option<CampaignDefinition>>;
}

/// Lead lookups. Implementations normalize raw lead documents into
/// [`LeadContext`] before returning them.
#[async_trait]
pub trait LeadDirectory: Send + Sync {
    async fn find_leads_in_folder(&self, tenant_id: &str, folder_id: &str)
        -> DripResult<Vec<String>>;

    async fn lead_context(&self, tenant_id: &str, lead_id: &str)
        -> DripResult<Option<LeadContext>>;

    async fn lead_activity(&self, tenant_id: &str, lead_id: &str) -> DripResult<LeadActivity>;

    async fn tenant_context(&self, tenant_id: &str) -> DripResult<TenantContext>;
}

/// Outbound transport. Errors are reported as [`crate::DripError::Send`].
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, to: &str, body: &str, tenant: &TenantContext) -> DripResult<SendReceipt>;
}

/// Renders a step template against lead and agent context.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &RenderContext) -> String;
}

// ─── In-memory implementations ──────────────────────────────────────────

/// Campaign definitions held in process memory.
#[derive(Default)]
pub struct InMemoryCampaignDirectory {
    campaigns: DashMap<String, CampaignDefinition>,
}

impl InMemoryCampaignDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, campaign: CampaignDefinition) {
        self.campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn set_active(&self, campaign_id: &str, active: bool) -> bool {
        match self.campaigns.get_mut(campaign_id) {
            Some(mut c) => {
                c.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CampaignDirectory for InMemoryCampaignDirectory {
    async fn get_campaign(&self, campaign_id: &str) -> DripResult<Option<CampaignDefinition>> {
        Ok(self.campaigns.get(campaign_id).map(|c| c.clone()))
    }
}

type TenantScoped = (String, String);

/// Lead directory held in process memory. Leads are stored as raw
/// loosely-typed field maps and normalized on read.
#[derive(Default)]
pub struct InMemoryLeadDirectory {
    leads: DashMap<TenantScoped, HashMap<String, String>>,
    folders: DashMap<TenantScoped, Vec<String>>,
    activity: DashMap<TenantScoped, LeadActivity>,
    tenants: DashMap<String, TenantContext>,
}

impl InMemoryLeadDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_lead(&self, tenant_id: &str, lead_id: &str, fields: HashMap<String, String>) {
        self.leads
            .insert((tenant_id.to_string(), lead_id.to_string()), fields);
    }

    pub fn add_to_folder(&self, tenant_id: &str, folder_id: &str, lead_id: &str) {
        let mut members = self
            .folders
            .entry((tenant_id.to_string(), folder_id.to_string()))
            .or_default();
        if !members.iter().any(|l| l == lead_id) {
            members.push(lead_id.to_string());
        }
    }

    pub fn remove_from_folder(&self, tenant_id: &str, folder_id: &str, lead_id: &str) {
        if let Some(mut members) = self
            .folders
            .get_mut(&(tenant_id.to_string(), folder_id.to_string()))
        {
            members.retain(|l| l != lead_id);
        }
    }

    pub fn record_human_outbound(&self, tenant_id: &str, lead_id: &str, at: DateTime<Utc>) {
        self.activity
            .entry((tenant_id.to_string(), lead_id.to_string()))
            .or_default()
            .last_human_outbound_at = Some(at);
    }

    pub fn record_inbound(&self, tenant_id: &str, lead_id: &str, at: DateTime<Utc>) {
        self.activity
            .entry((tenant_id.to_string(), lead_id.to_string()))
            .or_default()
            .last_inbound_at = Some(at);
    }

    pub fn set_tenant(&self, tenant: TenantContext) {
        self.tenants.insert(tenant.tenant_id.clone(), tenant);
    }
}

#[async_trait]
impl LeadDirectory for InMemoryLeadDirectory {
    async fn find_leads_in_folder(
        &self,
        tenant_id: &str,
        folder_id: &str,
    ) -> DripResult<Vec<String>> {
        Ok(self
            .folders
            .get(&(tenant_id.to_string(), folder_id.to_string()))
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn lead_context(
        &self,
        tenant_id: &str,
        lead_id: &str,
    ) -> DripResult<Option<LeadContext>> {
        Ok(self
            .leads
            .get(&(tenant_id.to_string(), lead_id.to_string()))
            .map(|raw| LeadContext::from_fields(lead_id, &raw)))
    }

    async fn lead_activity(&self, tenant_id: &str, lead_id: &str) -> DripResult<LeadActivity> {
        Ok(self
            .activity
            .get(&(tenant_id.to_string(), lead_id.to_string()))
            .map(|a| *a)
            .unwrap_or_default())
    }

    async fn tenant_context(&self, tenant_id: &str) -> DripResult<TenantContext> {
        Ok(self
            .tenants
            .get(tenant_id)
            .map(|t| t.clone())
            .unwrap_or_else(|| TenantContext {
                tenant_id: tenant_id.to_string(),
                ..TenantContext::default()
            }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lead_directory_normalizes_on_read() {
        let dir = InMemoryLeadDirectory::new();
        let mut raw = HashMap::new();
        raw.insert("FirstName".to_string(), "Lin".to_string());
        raw.insert("phone_number".to_string(), "+15551230000".to_string());
        dir.upsert_lead("t1", "lead-1", raw);

        let ctx = dir.lead_context("t1", "lead-1").await.unwrap().unwrap();
        assert_eq!(ctx.first_name.as_deref(), Some("Lin"));
        assert_eq!(ctx.phone.as_deref(), Some("+15551230000"));
        assert!(dir.lead_context("t2", "lead-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_folder_membership_is_tenant_scoped() {
        let dir = InMemoryLeadDirectory::new();
        dir.add_to_folder("t1", "hot", "a");
        dir.add_to_folder("t1", "hot", "a");
        dir.add_to_folder("t1", "hot", "b");
        dir.add_to_folder("t2", "hot", "c");
        dir.remove_from_folder("t1", "hot", "b");

        assert_eq!(dir.find_leads_in_folder("t1", "hot").await.unwrap(), vec!["a"]);
        assert_eq!(dir.find_leads_in_folder("t2", "hot").await.unwrap(), vec!["c"]);
        assert!(dir.find_leads_in_folder("t1", "cold").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tenant_gets_bare_context() {
        let dir = InMemoryLeadDirectory::new();
        let ctx = dir.tenant_context("t9").await.unwrap();
        assert_eq!(ctx.tenant_id, "t9");
        assert!(ctx.from_number.is_none());
    }
}
