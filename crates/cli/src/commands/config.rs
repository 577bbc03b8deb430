use std::env;
use std::fs;
use std::path::Path;

use crmbot_core::config::{discover_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = discover_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let field = |key, env_key, value: String| Field { key, env_key, value };
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        field("crm.base_url", "CRMBOT_CRM_BASE_URL", config.crm.base_url.clone()),
        field("crm.retries", "CRMBOT_CRM_RETRIES", config.crm.retries.to_string()),
        field(
            "crm.backoff_factor_secs",
            "CRMBOT_CRM_BACKOFF_FACTOR_SECS",
            config.crm.backoff_factor_secs.to_string(),
        ),
        field(
            "crm.request_timeout_secs",
            "CRMBOT_CRM_REQUEST_TIMEOUT_SECS",
            config.crm.request_timeout_secs.to_string(),
        ),
        field("crm.log_path", "CRMBOT_CRM_LOG_PATH", config.crm.log_path.display().to_string()),
        field("llm.provider", "CRMBOT_LLM_PROVIDER", config.llm.provider.as_str().to_string()),
        field("llm.model", "CRMBOT_LLM_MODEL", config.llm.model.clone()),
        field("llm.base_url", "CRMBOT_LLM_BASE_URL", config.llm.effective_base_url()),
        field("llm.api_key", "CRMBOT_LLM_API_KEY", api_key),
        field("llm.timeout_secs", "CRMBOT_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        field("llm.max_retries", "CRMBOT_LLM_MAX_RETRIES", config.llm.max_retries.to_string()),
        field("server.bind_address", "CRMBOT_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        field("server.port", "CRMBOT_SERVER_PORT", config.server.port.to_string()),
        field(
            "server.allowed_origins",
            "CRMBOT_SERVER_ALLOWED_ORIGINS",
            config.server.allowed_origins.join(","),
        ),
        field("agent.timezone", "CRMBOT_AGENT_TIMEZONE", config.agent.timezone.clone()),
        field(
            "agent.max_tool_steps",
            "CRMBOT_AGENT_MAX_TOOL_STEPS",
            config.agent.max_tool_steps.to_string(),
        ),
        field(
            "agent.session_ttl_secs",
            "CRMBOT_AGENT_SESSION_TTL_SECS",
            config.agent.session_ttl_secs.to_string(),
        ),
        field(
            "agent.max_history_turns",
            "CRMBOT_AGENT_MAX_HISTORY_TURNS",
            config.agent.max_history_turns.to_string(),
        ),
        field("logging.level", "CRMBOT_LOGGING_LEVEL", config.logging.level.clone()),
        field("logging.format", "CRMBOT_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }
    if key_path == "llm.api_key" && env::var_os("GROQ_API_KEY").is_some() {
        return "env (GROQ_API_KEY)".to_string();
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once(['-', '_']) {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
