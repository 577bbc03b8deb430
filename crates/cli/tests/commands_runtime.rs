use std::env;
use std::sync::{mpsc, Mutex, OnceLock};

use crmbot_cli::commands::{config, doctor};
use serde_json::Value;

#[test]
fn config_reports_sources_and_redacts_api_key() {
    with_env(
        &[
            ("CRMBOT_LLM_API_KEY", "gsk_supersecret123"),
            ("CRMBOT_CRM_BASE_URL", "http://crm.test/crm"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0, "expected config to load");

            assert!(result
                .output
                .contains("- crm.base_url = http://crm.test/crm (source: env (CRMBOT_CRM_BASE_URL))"));
            assert!(result.output.contains("- llm.api_key = gsk-*** (source: env (CRMBOT_LLM_API_KEY))"));
            assert!(result.output.contains("- agent.timezone = Asia/Kolkata (source: default)"));
            assert!(!result.output.contains("supersecret"));
        },
    );
}

#[test]
fn config_falls_back_to_groq_api_key() {
    with_env(&[("GROQ_API_KEY", "gsk_fromgroq")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0, "expected config to load");
        assert!(result.output.contains("- llm.api_key = gsk-*** (source: env (GROQ_API_KEY))"));
    });
}

#[test]
fn config_returns_validation_failure_without_api_key() {
    with_env(&[], || {
        let result = config::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_skips_runtime_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation:"));
        assert!(result.output.contains("- [skip] action_log_writable:"));
        assert!(result.output.contains("- [skip] crm_reachability:"));
    });
}

#[test]
fn doctor_reports_unreachable_crm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("logs/crm_log.jsonl");
    let log_path = log_path.to_string_lossy().into_owned();

    with_env(
        &[
            ("CRMBOT_LLM_API_KEY", "gsk_test"),
            ("CRMBOT_CRM_BASE_URL", "http://127.0.0.1:9/crm"),
            ("CRMBOT_CRM_LOG_PATH", &log_path),
        ],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 1);

            let report = parse_payload(&result.output);
            assert_eq!(report["overall_status"], "fail");
            assert_eq!(check_status(&report, "config_validation"), "pass");
            assert_eq!(check_status(&report, "action_log_writable"), "pass");
            assert_eq!(check_status(&report, "crm_reachability"), "fail");
        },
    );
}

#[test]
fn doctor_passes_against_a_live_crm() {
    let base_url = spawn_crm_stub();
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("crm_log.jsonl").to_string_lossy().into_owned();

    with_env(
        &[
            ("CRMBOT_LLM_API_KEY", "gsk_test"),
            ("CRMBOT_CRM_BASE_URL", &base_url),
            ("CRMBOT_CRM_LOG_PATH", &log_path),
        ],
        || {
            let result = doctor::run(true);
            let report = parse_payload(&result.output);
            assert_eq!(result.exit_code, 0, "unexpected report: {report}");
            assert_eq!(report["overall_status"], "pass");
            assert_eq!(check_status(&report, "crm_reachability"), "pass");
        },
    );
}

/// Serves 404 for everything, which is enough to prove the host answers.
fn spawn_crm_stub() -> String {
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("stub runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("addr");
            sender.send(format!("http://{addr}/crm")).expect("send address");
            let _ = axum::serve(listener, axum::Router::new()).await;
        });
    });
    receiver.recv().expect("stub address")
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "GROQ_API_KEY",
        "CRMBOT_CRM_BASE_URL",
        "CRMBOT_CRM_RETRIES",
        "CRMBOT_CRM_BACKOFF_FACTOR_SECS",
        "CRMBOT_CRM_REQUEST_TIMEOUT_SECS",
        "CRMBOT_CRM_LOG_PATH",
        "CRMBOT_LLM_PROVIDER",
        "CRMBOT_LLM_API_KEY",
        "CRMBOT_LLM_BASE_URL",
        "CRMBOT_LLM_MODEL",
        "CRMBOT_LLM_TIMEOUT_SECS",
        "CRMBOT_LLM_MAX_RETRIES",
        "CRMBOT_SERVER_BIND_ADDRESS",
        "CRMBOT_SERVER_PORT",
        "CRMBOT_SERVER_ALLOWED_ORIGINS",
        "CRMBOT_AGENT_TIMEZONE",
        "CRMBOT_AGENT_MAX_TOOL_STEPS",
        "CRMBOT_AGENT_SESSION_TTL_SECS",
        "CRMBOT_AGENT_MAX_HISTORY_TURNS",
        "CRMBOT_LOGGING_LEVEL",
        "CRMBOT_LOGGING_FORMAT",
        "CRMBOT_LOG_LEVEL",
        "CRMBOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
