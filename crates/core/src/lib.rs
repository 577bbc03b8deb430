pub mod action_log;
pub mod config;
pub mod datetime;
pub mod domain;
pub mod errors;
pub mod retry;
pub mod validation;

pub use action_log::{ActionKind, ActionLogSink, InMemoryActionLog, JsonlActionLog, LogEntry};
pub use domain::lead::{LeadId, LeadStatus, NewLead, StatusUpdate};
pub use domain::visit::NewVisit;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use retry::RetryPolicy;
pub use validation::ValidationReport;
