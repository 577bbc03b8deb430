use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{delete, post};
use axum::{Json, Router};
use crmbot_agent::{AgentError, AgentRuntime, SessionId};
use crmbot_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct BotState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct BotRequest {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotResponse {
    pub answer: Option<String>,
    pub session_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotError {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/bot/handle", post(handle))
        .route("/bot/sessions/{session_id}", delete(end_session))
        .with_state(BotState { runtime })
}

/// `*` allows any origin without credentials. An explicit list allows
/// credentials and mirrors the requested headers.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() || allowed_origins.iter().any(|origin| origin.trim() == "*") {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }

    let origins = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(event_name = "system.cors.invalid_origin", origin = %origin, error = %error, "ignoring invalid origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub async fn handle(
    State(state): State<BotState>,
    Json(request): Json<BotRequest>,
) -> Result<Json<BotResponse>, (StatusCode, Json<BotError>)> {
    let correlation_id = Uuid::new_v4().to_string();
    let session_id = match request.session_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => SessionId::parse(raw).map_err(|error| {
            reject(ApplicationError::Validation(error.to_string()), &correlation_id)
        })?,
        _ => SessionId::new_random(),
    };
    let transcript = request.transcript.unwrap_or_default();

    info!(
        event_name = "bot.handle.received",
        correlation_id = %correlation_id,
        session_id = %session_id,
        transcript_chars = transcript.chars().count(),
        "bot request received"
    );

    match state.runtime.handle_turn(&session_id, &transcript).await {
        Ok(outcome) => {
            info!(
                event_name = "bot.handle.completed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                tool_calls = outcome.invocations.len(),
                "bot request completed"
            );
            Ok(Json(BotResponse { answer: outcome.answer, session_id: session_id.to_string() }))
        }
        Err(AgentError::EmptyTranscript) => Err(reject(
            ApplicationError::Validation("transcript must not be empty".to_string()),
            &correlation_id,
        )),
        Err(AgentError::Llm(llm_error)) => {
            error!(
                event_name = "bot.handle.llm_unavailable",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %llm_error,
                "language model unavailable"
            );
            Err(reject(ApplicationError::Integration(llm_error.to_string()), &correlation_id))
        }
    }
}

pub async fn end_session(
    State(state): State<BotState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<BotError>)> {
    let correlation_id = Uuid::new_v4().to_string();
    let session_id = SessionId::parse(&session_id).map_err(|error| {
        reject(ApplicationError::Validation(error.to_string()), &correlation_id)
    })?;

    if state.runtime.sessions().end(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(BotError { error: format!("session `{session_id}` not found"), correlation_id }),
        ))
    }
}

fn reject(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<BotError>) {
    let interface = error.into_interface(correlation_id);
    let (status, error) = match &interface {
        InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message.clone()),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, interface.user_message().to_string())
        }
    };
    (status, Json(BotError { error, correlation_id: interface.correlation_id().to_string() }))
}
