use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::form_submissions;
use crate::schema::kv_entries;

/// What the visitor wants from us: act now, or just ask questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Immediate,
    #[default]
    Enquiry,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Immediate => "immediate",
            ActionType::Enquiry => "enquiry",
        }
    }

    /// Human-facing label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::Immediate => "Immediate Action",
            ActionType::Enquiry => "Enquiry",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(ActionType::Immediate),
            "enquiry" => Ok(ActionType::Enquiry),
            other => Err(format!("unknown action type: {}", other)),
        }
    }
}

/// Form fields exactly as the render layer sent them. Nothing here is trusted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormFields {
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub whatsapp: String,
    #[serde(default, alias = "actionType")]
    pub action_type: Option<ActionType>,
}

/// A validated lead. Only the validator builds these, and nothing mutates
/// one afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSubmission {
    services: Vec<String>,
    email: String,
    whatsapp: String,
    action_type: ActionType,
    submitted_at: DateTime<Utc>,
}

impl LeadSubmission {
    pub(crate) fn new(
        services: Vec<String>,
        email: String,
        whatsapp: String,
        action_type: ActionType,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            services,
            email,
            whatsapp,
            action_type,
            submitted_at,
        }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn whatsapp(&self) -> &str {
        &self.whatsapp
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// Identifier assigned to a lead, either by the remote store or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("local_")
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedLead {
    pub id: RecordId,
    #[serde(flatten)]
    pub submission: LeadSubmission,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Clone, Debug)]
#[diesel(table_name = form_submissions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LeadRow {
    pub id: String,
    pub services: String, // JSON array of service names
    pub email: String,
    pub whatsapp: String,
    pub action_type: String, // "immediate" or "enquiry"
    pub timestamp: String,   // RFC 3339, when the visitor pressed submit
    pub created_at: i64,     // unix seconds, when the row was written
}

impl LeadRow {
    pub fn from_submission(
        id: &str,
        submission: &LeadSubmission,
        created_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.to_string(),
            services: serde_json::to_string(submission.services())?,
            email: submission.email().to_string(),
            whatsapp: submission.whatsapp().to_string(),
            action_type: submission.action_type().as_str().to_string(),
            timestamp: submission.submitted_at().to_rfc3339(),
            created_at: created_at.timestamp(),
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Clone, Debug)]
#[diesel(table_name = kv_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub expires_at: Option<i64>, // unix seconds, None never expires
}
