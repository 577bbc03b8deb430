//! HTTP client for the CRM service: create leads, schedule visits and update
//! lead status, with bounded retry and an append-only action log.

pub mod client;
pub mod error;

pub use client::CrmClient;
pub use error::CrmError;
