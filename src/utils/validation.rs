use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::models::lead_models::{LeadSubmission, RawFormFields};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

// 10-15 digits, optional leading '+', first digit non-zero.
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9][0-9]{9,14}$").expect("phone pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Services,
    Email,
    Whatsapp,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Services => "services",
            Field::Email => "email",
            Field::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    #[error("no service selected")]
    EmptySelection,
    #[error("email address is malformed")]
    InvalidFormat,
    #[error("phone number is malformed")]
    InvalidPhone,
}

/// One failed rule: the kind of failure plus the text shown next to the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub kind: FieldError,
    pub message: &'static str,
}

#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("form has {} invalid field(s)", .0.len())]
pub struct ValidationErrors(BTreeMap<Field, FieldIssue>);

impl ValidationErrors {
    fn push(&mut self, field: Field, kind: FieldError, message: &'static str) {
        self.0.insert(field, FieldIssue { kind, message });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: Field) -> Option<&FieldIssue> {
        self.0.get(&field)
    }

    pub fn kind(&self, field: Field) -> Option<FieldError> {
        self.0.get(&field).map(|issue| issue.kind)
    }

    /// Field name to message, the shape the render layer shows inline.
    pub fn messages(&self) -> BTreeMap<&'static str, &'static str> {
        self.0
            .iter()
            .map(|(field, issue)| (field.as_str(), issue.message))
            .collect()
    }
}

/// Strips the separators people type into phone numbers.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

pub fn is_valid_phone(raw: &str) -> bool {
    PHONE_PATTERN.is_match(&normalize_phone(raw))
}

/// Checks every rule and collects every failure; nothing short-circuits.
/// On success the lead is stamped with `submitted_at`.
pub fn validate(
    fields: &RawFormFields,
    submitted_at: DateTime<Utc>,
) -> Result<LeadSubmission, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    // Blank entries never count as a selection, and a service toggled twice
    // is still one service.
    let mut services: Vec<String> = Vec::with_capacity(fields.services.len());
    for service in &fields.services {
        let service = service.trim();
        if !service.is_empty() && !services.iter().any(|s| s == service) {
            services.push(service.to_string());
        }
    }
    if services.is_empty() {
        errors.push(
            Field::Services,
            FieldError::EmptySelection,
            "Please select at least one service",
        );
    }

    if fields.email.is_empty() {
        errors.push(Field::Email, FieldError::InvalidFormat, "Email is required");
    } else if !is_valid_email(&fields.email) {
        errors.push(
            Field::Email,
            FieldError::InvalidFormat,
            "Please enter a valid email",
        );
    }

    if fields.whatsapp.is_empty() {
        errors.push(
            Field::Whatsapp,
            FieldError::InvalidPhone,
            "WhatsApp number is required",
        );
    } else if !is_valid_phone(&fields.whatsapp) {
        errors.push(
            Field::Whatsapp,
            FieldError::InvalidPhone,
            "Please enter a valid WhatsApp number (10-15 digits)",
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(LeadSubmission::new(
        services,
        fields.email.clone(),
        fields.whatsapp.clone(),
        fields.action_type.unwrap_or_default(),
        submitted_at,
    ))
}
