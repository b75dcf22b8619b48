use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::lead_models::{ActionType, PersistedLead};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadStats {
    pub total: usize,
    pub immediate: usize,
    pub enquiry: usize,
    pub today: usize,
    pub this_week: usize,
    pub this_month: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCount {
    pub service: String,
    pub count: usize,
}

fn csv_cell(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

pub fn to_csv(leads: &[PersistedLead]) -> String {
    let mut lines = vec!["ID,Date,Time,Action Type,Email,WhatsApp,Services".to_string()];
    for lead in leads {
        let cells = [
            lead.id.to_string(),
            lead.created_at.format("%Y-%m-%d").to_string(),
            lead.created_at.format("%H:%M:%S").to_string(),
            lead.submission.action_type().to_string(),
            lead.submission.email().to_string(),
            lead.submission.whatsapp().to_string(),
            lead.submission.services().join("; "),
        ];
        lines.push(cells.iter().map(|c| csv_cell(c)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}

pub fn to_json(leads: &[PersistedLead]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(leads)
}

pub fn filter_by_action_type(leads: &[PersistedLead], action_type: ActionType) -> Vec<PersistedLead> {
    leads
        .iter()
        .filter(|lead| lead.submission.action_type() == action_type)
        .cloned()
        .collect()
}

/// Both ends inclusive.
pub fn filter_by_date_range(
    leads: &[PersistedLead],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<PersistedLead> {
    leads
        .iter()
        .filter(|lead| lead.created_at >= start && lead.created_at <= end)
        .cloned()
        .collect()
}

pub fn stats(leads: &[PersistedLead], now: DateTime<Utc>) -> LeadStats {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);

    let mut stats = LeadStats {
        total: leads.len(),
        ..LeadStats::default()
    };
    for lead in leads {
        match lead.submission.action_type() {
            ActionType::Immediate => stats.immediate += 1,
            ActionType::Enquiry => stats.enquiry += 1,
        }
        if lead.created_at >= midnight {
            stats.today += 1;
        }
        if lead.created_at >= week_ago {
            stats.this_week += 1;
        }
        if lead.created_at >= month_ago {
            stats.this_month += 1;
        }
    }
    stats
}

pub fn most_requested_services(leads: &[PersistedLead]) -> Vec<ServiceCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lead in leads {
        for service in lead.submission.services() {
            *counts.entry(service.as_str()).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<ServiceCount> = counts
        .into_iter()
        .map(|(service, count)| ServiceCount {
            service: service.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.service.cmp(&b.service)));
    ranked
}
