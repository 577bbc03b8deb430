//! Field validators applied to model-supplied tool arguments before anything
//! reaches the CRM service.

use std::sync::OnceLock;

use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;

use crate::datetime;
use crate::domain::lead::{LeadId, LeadStatus};

pub const INVALID_PHONE: &str = "Invalid phone number";
pub const INVALID_NAME: &str = "Invalid name";
pub const INVALID_CITY: &str = "Invalid city";
pub const LEAD_ID_REQUIRED: &str = "Lead ID is required.";
pub const INVALID_LEAD_ID: &str = "Invalid lead_id, it should be valid uuid";
pub const VISIT_TIME_REQUIRED: &str = "Visit time is required.";
pub const INVALID_VISIT_TIME: &str = "Invalid time/LLM does not able to parse it correctly";

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\+91)?[6-9]\d{9}$").expect("phone regex is valid"))
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z\s\-']+$").expect("name regex is valid"))
}

fn city_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z\s\-]+$").expect("city regex is valid"))
}

/// Indian mobile number, optionally `+91`-prefixed. Spaces and hyphens are
/// ignored; the normalised digits are returned.
pub fn validate_phone(phone: &str) -> Result<String, String> {
    let normalized = phone.chars().filter(|c| *c != ' ' && *c != '-').collect::<String>();
    if phone_pattern().is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(INVALID_PHONE.to_string())
    }
}

pub fn validate_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim();
    if name_pattern().is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(INVALID_NAME.to_string())
    }
}

pub fn validate_city(city: &str) -> Result<String, String> {
    let trimmed = city.trim();
    if city_pattern().is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(INVALID_CITY.to_string())
    }
}

pub fn validate_lead_id(lead_id: &str) -> Result<LeadId, String> {
    if lead_id.is_empty() {
        return Err(LEAD_ID_REQUIRED.to_string());
    }
    LeadId::parse(lead_id).ok_or_else(|| INVALID_LEAD_ID.to_string())
}

pub fn validate_status(status: &str) -> Result<LeadStatus, String> {
    if status.trim().is_empty() {
        return Err(format!("Status is required. Must be one of {}", LeadStatus::allowed_list()));
    }
    status.parse::<LeadStatus>().map_err(|_| {
        format!("Invalid status '{}'. Must be one of {}", status, LeadStatus::allowed_list())
    })
}

/// Resolves a free-form visit time in the context of `now` (which also fixes
/// the timezone for offset-less inputs).
pub fn validate_timestamp(visit_time: &str, now: DateTime<Tz>) -> Result<String, String> {
    if visit_time.trim().is_empty() {
        return Err(VISIT_TIME_REQUIRED.to_string());
    }
    datetime::parse_timestamp(visit_time, now).ok_or_else(|| INVALID_VISIT_TIME.to_string())
}

/// Collects every problem with a set of arguments rather than stopping at the
/// first one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    errors: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `Missing required field: <field>` when the value is absent or
    /// empty, and hands back the present value otherwise.
    pub fn require<'a>(&mut self, field: &str, value: Option<&'a str>) -> Option<&'a str> {
        match value {
            Some(value) if !value.is_empty() => Some(value),
            _ => {
                self.errors.push(format!("Missing required field: {field}"));
                None
            }
        }
    }

    /// Runs a validator and keeps its message on failure.
    pub fn check<T>(&mut self, outcome: Result<T, String>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(message) => {
                self.errors.push(message);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}
