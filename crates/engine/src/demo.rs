//! Demo data for local runs: one tenant, a three-step follow-up campaign, a
//! handful of leads in a folder, and a watch on that folder.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::info;

use drip_core::directory::{InMemoryCampaignDirectory, InMemoryLeadDirectory};
use drip_core::types::{
    CampaignChannel, CampaignDefinition, CampaignStep, FolderWatch, StartMode, TenantContext,
};
use drip_core::DripResult;

use crate::watch_store::FolderWatchStore;

pub const DEMO_TENANT: &str = "demo-tenant";
pub const DEMO_CAMPAIGN: &str = "demo-follow-up";
pub const DEMO_FOLDER: &str = "new-leads";

fn step(template: &str, day_offset: u32, time_of_day: Option<NaiveTime>) -> CampaignStep {
    CampaignStep {
        template: template.to_string(),
        day_offset,
        time_of_day,
        active: true,
    }
}

/// Day-0/day-2/day-5 SMS follow-up.
pub fn demo_campaign() -> CampaignDefinition {
    let morning = NaiveTime::from_hms_opt(10, 0, 0);
    CampaignDefinition {
        id: DEMO_CAMPAIGN.to_string(),
        tenant_id: DEMO_TENANT.to_string(),
        name: "New lead follow-up".to_string(),
        is_active: true,
        channel: CampaignChannel::Sms,
        steps: vec![
            step(
                "Hi {{ first_name | default:\"there\" }}, it's {{ agent_name }}. Thanks for reaching out!",
                0,
                None,
            ),
            step(
                "Hi {{ first_name | default:\"there\" }}, still looking? I have a few options to share.",
                2,
                morning,
            ),
            step(
                "{{ first_name | default:\"Hi\" }}, last check-in from {{ agent_name }}. Call {{ agent_phone }} anytime.",
                5,
                morning,
            ),
        ],
    }
}

/// Seed the demo tenant into the in-memory collaborators and register a
/// watch on the demo folder.
pub async fn seed_demo(
    campaigns: &InMemoryCampaignDirectory,
    leads: &InMemoryLeadDirectory,
    watches: &dyn FolderWatchStore,
    now: DateTime<Utc>,
) -> DripResult<FolderWatch> {
    campaigns.upsert(demo_campaign());
    leads.set_tenant(TenantContext {
        tenant_id: DEMO_TENANT.to_string(),
        agent_name: Some("Jordan".to_string()),
        agent_phone: Some("+15550109999".to_string()),
        from_number: Some("+15550100000".to_string()),
    });

    // Field casing varies on purpose, as it does in imported lead sheets.
    let demo_leads = [
        ("lead-1", "firstName", "Avery", "+15550101001"),
        ("lead-2", "first_name", "Blake", "+15550101002"),
        ("lead-3", "First Name", "Casey", "+15550101003"),
    ];
    for (lead_id, name_field, name, phone) in demo_leads {
        let mut fields = HashMap::new();
        fields.insert(name_field.to_string(), name.to_string());
        fields.insert("Phone".to_string(), phone.to_string());
        leads.upsert_lead(DEMO_TENANT, lead_id, fields);
        leads.add_to_folder(DEMO_TENANT, DEMO_FOLDER, lead_id);
    }

    let watch = watches
        .insert(FolderWatch::new(
            DEMO_TENANT,
            DEMO_FOLDER,
            DEMO_CAMPAIGN,
            StartMode::Immediate,
            now,
        ))
        .await?;
    info!(watch_id = %watch.id, leads = demo_leads.len(), "Demo data seeded");
    Ok(watch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::watch_store::InMemoryFolderWatchStore;
    use drip_core::directory::LeadDirectory;

    #[tokio::test]
    async fn test_seed_demo() {
        let campaigns = InMemoryCampaignDirectory::new();
        let leads = InMemoryLeadDirectory::new();
        let watches = InMemoryFolderWatchStore::new();

        let watch = seed_demo(&campaigns, &leads, &watches, Utc::now())
            .await
            .unwrap();
        assert!(watch.active);
        assert_eq!(watches.list_active().await.unwrap().len(), 1);

        let members = leads
            .find_leads_in_folder(DEMO_TENANT, DEMO_FOLDER)
            .await
            .unwrap();
        assert_eq!(members.len(), 3);
        for lead in &members {
            let ctx = leads.lead_context(DEMO_TENANT, lead).await.unwrap().unwrap();
            assert!(ctx.first_name.is_some());
            assert!(ctx.phone.is_some());
        }
        assert_eq!(demo_campaign().step_count(), 3);
    }
}
