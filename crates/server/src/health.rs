use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use crmbot_core::action_log::JsonlActionLog;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    action_log: Arc<JsonlActionLog>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub action_log: HealthCheck,
    pub checked_at: String,
}

pub fn router(action_log: Arc<JsonlActionLog>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { action_log })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let action_log = action_log_check(&state.action_log);
    let ready = action_log.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "crmbot-server runtime initialized".to_string(),
        },
        action_log,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn action_log_check(action_log: &JsonlActionLog) -> HealthCheck {
    match action_log.check_writable() {
        Ok(()) => HealthCheck {
            status: "ready",
            detail: format!("action log `{}` is writable", action_log.path().display()),
        },
        Err(error) => {
            warn!(event_name = "system.health.action_log_unwritable", error = %error, "action log check failed");
            HealthCheck { status: "degraded", detail: error.to_string() }
        }
    }
}
