use std::sync::Arc;

use crmbot_core::action_log::{ActionKind, ActionLogSink, LogEntry};
use crmbot_core::config::CrmConfig;
use crmbot_core::domain::lead::{LeadId, NewLead, StatusUpdate};
use crmbot_core::domain::visit::NewVisit;
use crmbot_core::retry::RetryPolicy;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::CrmError;

/// Client for the CRM service's three write operations.
///
/// Every call, including one rejected before dispatch via [`CrmClient::reject`],
/// appends exactly one entry to the action log.
#[derive(Clone)]
pub struct CrmClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    action_log: Arc<dyn ActionLogSink>,
}

impl CrmClient {
    pub fn from_config(
        config: &CrmConfig,
        action_log: Arc<dyn ActionLogSink>,
    ) -> Result<Self, CrmError> {
        let http = Client::builder().timeout(config.request_timeout()).build().map_err(|error| {
            CrmError::Transport { message: format!("failed to build http client: {error}"), connect: false }
        })?;
        Ok(Self::new(http, &config.base_url, config.retry_policy(), action_log))
    }

    pub fn new(
        http: Client,
        base_url: &str,
        retry: RetryPolicy,
        action_log: Arc<dyn ActionLogSink>,
    ) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), retry, action_log }
    }

    pub async fn create_lead(&self, lead: &NewLead) -> Result<Value, CrmError> {
        self.post(ActionKind::LeadCreate, "/leads", lead).await
    }

    pub async fn schedule_visit(&self, visit: &NewVisit) -> Result<Value, CrmError> {
        self.post(ActionKind::VisitSchedule, "/visits", visit).await
    }

    pub async fn update_lead_status(
        &self,
        lead_id: &LeadId,
        update: &StatusUpdate,
    ) -> Result<Value, CrmError> {
        self.post(ActionKind::LeadUpdate, &format!("/leads/{lead_id}/status"), update).await
    }

    /// Records an operation that failed validation and never reached the
    /// network.
    pub async fn reject(
        &self,
        action: ActionKind,
        entities: Value,
        errors: Vec<String>,
    ) -> CrmError {
        let error = CrmError::Validation(errors);
        warn!(
            event_name = "crm.request.rejected",
            action = action.as_str(),
            error = %error,
            "crm operation rejected by validation"
        );
        self.record(LogEntry::failed(action, entities, error.to_string())).await;
        error
    }

    /// Appends on the blocking pool; the file sink does synchronous I/O.
    async fn record(&self, entry: LogEntry) {
        let sink = Arc::clone(&self.action_log);
        if let Err(error) = tokio::task::spawn_blocking(move || sink.append(entry)).await {
            warn!(
                event_name = "crm.action_log.append_aborted",
                error = %error,
                "action log append task did not complete"
            );
        }
    }

    async fn post<T>(&self, action: ActionKind, path: &str, payload: &T) -> Result<Value, CrmError>
    where
        T: Serialize + ?Sized,
    {
        let entities = match serde_json::to_value(payload) {
            Ok(entities) => entities,
            Err(error) => {
                let error = CrmError::Parse(format!("failed to encode request payload: {error}"));
                self.record(LogEntry::failed(action, Value::Null, error.to_string())).await;
                return Err(error);
            }
        };
        let url = format!("{}{path}", self.base_url);

        let outcome = self.send_with_retry(action, &url, &entities).await;
        match &outcome {
            Ok(body) => {
                info!(
                    event_name = "crm.request.succeeded",
                    action = action.as_str(),
                    url = %url,
                    "crm operation succeeded"
                );
                self.record(LogEntry::succeeded(action, entities, body.clone())).await;
            }
            Err(error) => {
                warn!(
                    event_name = "crm.request.failed",
                    action = action.as_str(),
                    url = %url,
                    error_kind = error.kind(),
                    error = %error,
                    "crm operation failed"
                );
                self.record(LogEntry::failed(action, entities, error.to_string())).await;
            }
        }
        outcome
    }

    async fn send_with_retry(
        &self,
        action: ActionKind,
        url: &str,
        body: &Value,
    ) -> Result<Value, CrmError> {
        let mut retry = 0_u32;

        loop {
            let failure_reason = match self.http.post(url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !self.retry.should_retry_status(status.as_u16()) {
                        return read_response(response, url).await;
                    }
                    if retry >= self.retry.max_retries {
                        return Err(CrmError::Transient {
                            status: status.as_u16(),
                            attempts: retry + 1,
                            url: url.to_string(),
                        });
                    }
                    format!("status {}", status.as_u16())
                }
                Err(error) if error.is_connect() && retry < self.retry.max_retries => {
                    error.to_string()
                }
                Err(error) => {
                    return Err(CrmError::Transport {
                        message: error.to_string(),
                        connect: error.is_connect(),
                    });
                }
            };

            retry += 1;
            let delay = self.retry.backoff(retry);
            warn!(
                event_name = "crm.request.retrying",
                action = action.as_str(),
                url,
                retry,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = %failure_reason,
                "retrying crm request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn read_response(response: reqwest::Response, url: &str) -> Result<Value, CrmError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("detail").map(render_detail))
            .filter(|detail| !detail.is_empty());
        return Err(CrmError::Http { status: status.as_u16(), url: url.to_string(), detail });
    }

    response.json::<Value>().await.map_err(|error| CrmError::Parse(error.to_string()))
}

fn render_detail(detail: &Value) -> String {
    match detail {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use crmbot_core::action_log::{ActionKind, InMemoryActionLog, JsonlActionLog};
    use crmbot_core::domain::lead::{LeadId, LeadStatus, NewLead, StatusUpdate};
    use crmbot_core::domain::visit::NewVisit;
    use crmbot_core::retry::RetryPolicy;
    use serde_json::{json, Value};

    use super::CrmClient;
    use crate::error::CrmError;

    #[derive(Clone, Default)]
    struct StubState {
        visit_calls: Arc<AtomicUsize>,
        status_calls: Arc<AtomicUsize>,
        failures_before_success: usize,
    }

    async fn create_lead(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        (
            StatusCode::CREATED,
            Json(json!({
                "lead_id": "b77e52a1-30c3-4d7f-9378-af5dfdb8dbde",
                "name": body["name"],
                "status": "NEW",
            })),
        )
    }

    async fn schedule_visit(State(state): State<StubState>) -> (StatusCode, Json<Value>) {
        let call = state.visit_calls.fetch_add(1, Ordering::SeqCst);
        if call < state.failures_before_success {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"detail": "warming up"})));
        }
        (StatusCode::OK, Json(json!({"visit_id": "v-1", "status": "SCHEDULED"})))
    }

    async fn update_status(
        State(state): State<StubState>,
        Path(lead_id): Path<String>,
    ) -> (StatusCode, Json<Value>) {
        state.status_calls.fetch_add(1, Ordering::SeqCst);
        match lead_id.as_str() {
            "404" => return (StatusCode::NOT_FOUND, Json(json!({"detail": "Lead not found"}))),
            "501" => return (StatusCode::NOT_IMPLEMENTED, Json(json!({"detail": "not supported"}))),
            _ => {}
        }
        (StatusCode::OK, Json(json!({"lead_id": lead_id, "status": "WON"})))
    }

    async fn spawn_stub(state: StubState) -> String {
        let app = Router::new()
            .route("/crm/leads", post(create_lead))
            .route("/crm/visits", post(schedule_visit))
            .route("/crm/leads/{lead_id}/status", post(update_status))
            .route("/crm/broken", post(|| async { "not json" }))
            .with_state(state);

        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub listener");
        let addr: SocketAddr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/crm")
    }

    fn client(base_url: &str, retries: u32, log: &InMemoryActionLog) -> CrmClient {
        CrmClient::new(
            reqwest::Client::new(),
            base_url,
            RetryPolicy::new(retries, 0.0),
            Arc::new(log.clone()),
        )
    }

    fn rohan() -> NewLead {
        NewLead {
            name: "Rohan".to_string(),
            phone: "9876543210".to_string(),
            city: "Delhi".to_string(),
            source: Some(String::new()),
        }
    }

    #[tokio::test]
    async fn create_lead_returns_body_and_logs_success() {
        let base_url = spawn_stub(StubState::default()).await;
        let log = InMemoryActionLog::default();

        let body = client(&base_url, 2, &log).create_lead(&rohan()).await.expect("lead created");

        assert_eq!(body["lead_id"], "b77e52a1-30c3-4d7f-9378-af5dfdb8dbde");
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].action, ActionKind::LeadCreate);
        assert_eq!(entries[0].output.as_ref(), Some(&body));
        assert_eq!(entries[0].entities["source"], "");
    }

    #[tokio::test]
    async fn file_log_line_is_written_before_the_call_returns() {
        let base_url = spawn_stub(StubState::default()).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("crm_log.jsonl");
        let crm = CrmClient::new(
            reqwest::Client::new(),
            &base_url,
            RetryPolicy::new(0, 0.0),
            Arc::new(JsonlActionLog::new(&path)),
        );

        crm.create_lead(&rohan()).await.expect("lead created");

        let contents = std::fs::read_to_string(&path).expect("read log");
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 1);
        let entry: Value = serde_json::from_str(lines[0]).expect("log line");
        assert_eq!(entry["action"], "LEAD_CREATE");
        assert_eq!(entry["success"], true);
    }

    #[tokio::test]
    async fn transient_statuses_are_retried_until_success() {
        let state = StubState { failures_before_success: 2, ..StubState::default() };
        let calls = Arc::clone(&state.visit_calls);
        let base_url = spawn_stub(state).await;
        let log = InMemoryActionLog::default();
        let visit = NewVisit {
            lead_id: LeadId("7".to_string()),
            visit_time: "2025-10-10T16:00:00+05:30".to_string(),
            notes: None,
        };

        let body = client(&base_url, 2, &log).schedule_visit(&visit).await.expect("visit scheduled");

        assert_eq!(body["visit_id"], "v-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(log.entries().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_transient_error() {
        let state = StubState { failures_before_success: usize::MAX, ..StubState::default() };
        let calls = Arc::clone(&state.visit_calls);
        let base_url = spawn_stub(state).await;
        let log = InMemoryActionLog::default();
        let visit = NewVisit {
            lead_id: LeadId("7".to_string()),
            visit_time: "2025-10-10T16:00:00+05:30".to_string(),
            notes: None,
        };

        let error = client(&base_url, 1, &log).schedule_visit(&visit).await.expect_err("exhausted");

        assert!(matches!(error, CrmError::Transient { status: 503, attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].error.as_deref(), Some(error.to_string().as_str()));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried_and_carry_detail() {
        let base_url = spawn_stub(StubState::default()).await;
        let log = InMemoryActionLog::default();
        let update = StatusUpdate { status: LeadStatus::Won, notes: None };

        let error = client(&base_url, 2, &log)
            .update_lead_status(&LeadId("404".to_string()), &update)
            .await
            .expect_err("missing lead");

        assert_eq!(
            error.to_string(),
            format!("404 Client Error: Not Found for url: {base_url}/leads/404/status | Detail: Lead not found")
        );
        assert_eq!(log.entries()[0].entities, json!({"status": "WON", "notes": null}));
    }

    #[tokio::test]
    async fn unlisted_statuses_are_sent_exactly_once() {
        for lead_id in ["404", "501"] {
            let state = StubState::default();
            let calls = Arc::clone(&state.status_calls);
            let base_url = spawn_stub(state).await;
            let log = InMemoryActionLog::default();
            let update = StatusUpdate { status: LeadStatus::Lost, notes: None };

            let error = client(&base_url, 2, &log)
                .update_lead_status(&LeadId(lead_id.to_string()), &update)
                .await
                .expect_err("http error");

            let expected_status = lead_id.parse::<u16>().expect("status");
            assert!(
                matches!(error, CrmError::Http { status, .. } if status == expected_status),
                "{error:?}"
            );
            assert_eq!(calls.load(Ordering::SeqCst), 1, "lead {lead_id} was retried");
            let entries = log.entries();
            assert_eq!(entries.len(), 1);
            assert!(!entries[0].success);
        }
    }

    #[tokio::test]
    async fn non_json_success_body_is_a_parse_error() {
        let base_url = spawn_stub(StubState::default()).await;
        let log = InMemoryActionLog::default();
        let crm = client(&base_url, 0, &log);

        let error = crm.post(ActionKind::LeadCreate, "/broken", &json!({})).await.expect_err("parse");

        assert_eq!(error.kind(), "parse");
        assert_eq!(log.entries().len(), 1);
    }

    #[tokio::test]
    async fn refused_connections_are_transport_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let log = InMemoryActionLog::default();

        let error = client(&format!("http://{addr}/crm"), 1, &log)
            .create_lead(&rohan())
            .await
            .expect_err("refused");

        assert!(matches!(error, CrmError::Transport { connect: true, .. }));
        assert!(error.is_retryable());
        assert_eq!(log.entries().len(), 1);
    }

    #[tokio::test]
    async fn reject_logs_without_dispatching() {
        let log = InMemoryActionLog::default();
        let crm = client("http://127.0.0.1:9/crm", 2, &log);

        let error = crm
            .reject(
                ActionKind::LeadCreate,
                json!({"name": "R2D2", "phone": "", "city": "Delhi", "source": null}),
                vec!["Missing required field: phone".to_string(), "Invalid name".to_string()],
            )
            .await;

        assert_eq!(
            error.to_string(),
            "Validation errors: ['Missing required field: phone', 'Invalid name']"
        );
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entities["name"], "R2D2");
        assert_eq!(entries[0].error.as_deref(), Some(error.to_string().as_str()));
    }
}
