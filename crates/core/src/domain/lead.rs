use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// Opaque lead identifier assigned by the CRM service.
///
/// The service hands out either UUIDs or legacy numeric identifiers; both are
/// carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn parse(raw: &str) -> Option<Self> {
        if Uuid::parse_str(raw).is_ok() {
            return Some(Self(raw.to_string()));
        }
        if !raw.is_empty() && raw.chars().all(|character| character.is_ascii_digit()) {
            return Some(Self(raw.to_string()));
        }
        None
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    InProgress,
    FollowUp,
    Won,
    Lost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] =
        [Self::New, Self::InProgress, Self::FollowUp, Self::Won, Self::Lost];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProgress => "IN_PROGRESS",
            Self::FollowUp => "FOLLOW_UP",
            Self::Won => "WON",
            Self::Lost => "LOST",
        }
    }

    /// Renders the allowed set the way it is shown to users and the model,
    /// e.g. `['NEW', 'IN_PROGRESS', ...]`.
    pub fn allowed_list() -> String {
        let quoted =
            Self::ALL.iter().map(|status| format!("'{}'", status.as_str())).collect::<Vec<_>>();
        format!("[{}]", quoted.join(", "))
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| DomainError::UnknownLeadStatus(value.to_string()))
    }
}

/// Payload for `POST /leads`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    pub city: String,
    pub source: Option<String>,
}

/// Payload for `POST /leads/{id}/status`. The lead identifier travels in the
/// path, not in the body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: LeadStatus,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{LeadId, LeadStatus, NewLead, StatusUpdate};

    #[test]
    fn lead_id_accepts_uuid_and_numeric_forms() {
        assert!(LeadId::parse("b77e52a1-30c3-4d7f-9378-af5dfdb8dbde").is_some());
        assert!(LeadId::parse("123").is_some());
        assert!(LeadId::parse("abc-123").is_none());
        assert!(LeadId::parse("").is_none());
        assert!(LeadId::parse("12 3").is_none());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("won".parse::<LeadStatus>().ok(), Some(LeadStatus::Won));
        assert_eq!("Follow_Up".parse::<LeadStatus>().ok(), Some(LeadStatus::FollowUp));
        assert!("PENDING".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn status_serializes_to_canonical_uppercase() {
        let update = StatusUpdate { status: LeadStatus::InProgress, notes: None };
        let value = serde_json::to_value(&update).expect("serialize");
        assert_eq!(value["status"], "IN_PROGRESS");
        assert!(value["notes"].is_null());
    }

    #[test]
    fn allowed_list_names_every_status() {
        assert_eq!(
            LeadStatus::allowed_list(),
            "['NEW', 'IN_PROGRESS', 'FOLLOW_UP', 'WON', 'LOST']"
        );
    }

    #[test]
    fn new_lead_keeps_empty_source_distinct_from_absent() {
        let empty = NewLead {
            name: "Rohan".to_string(),
            phone: "9876543210".to_string(),
            city: "Delhi".to_string(),
            source: Some(String::new()),
        };
        let absent = NewLead { source: None, ..empty.clone() };

        assert_eq!(serde_json::to_value(&empty).expect("serialize")["source"], "");
        assert!(serde_json::to_value(&absent).expect("serialize")["source"].is_null());
    }
}
