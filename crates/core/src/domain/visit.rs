use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;

/// Payload for `POST /visits`. `visit_time` is an RFC 3339 timestamp with
/// offset, as produced by [`crate::validation::validate_timestamp`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVisit {
    pub lead_id: LeadId,
    pub visit_time: String,
    pub notes: Option<String>,
}
