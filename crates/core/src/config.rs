use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["crmbot.toml", "config/crmbot.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub crm: CrmConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub base_url: String,
    pub retries: u32,
    pub backoff_factor_secs: f64,
    pub request_timeout_secs: u64,
    pub log_path: PathBuf,
}

impl CrmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.backoff_factor_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub timezone: String,
    pub max_tool_steps: u32,
    pub session_ttl_secs: u64,
    pub max_history_turns: usize,
}

impl AgentConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone.trim().parse::<Tz>().map_err(|_| {
            ConfigError::Validation(format!(
                "agent.timezone `{}` is not a valid IANA timezone (e.g. Asia/Kolkata)",
                self.timezone
            ))
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Groq,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub crm_base_url: Option<String>,
    pub crm_log_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crm: CrmConfig {
                base_url: "http://127.0.0.1:8001/crm".to_string(),
                retries: 2,
                backoff_factor_secs: 1.0,
                request_timeout_secs: 5,
                log_path: PathBuf::from("logs/crm_log.jsonl"),
            },
            llm: LlmConfig {
                provider: LlmProvider::Groq,
                api_key: None,
                base_url: None,
                model: "llama-3.1-8b-instant".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                allowed_origins: vec!["*".to_string()],
            },
            agent: AgentConfig {
                timezone: "Asia/Kolkata".to_string(),
                max_tool_steps: 8,
                session_ttl_secs: 1800,
                max_history_turns: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected groq|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = discover_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(crm) = patch.crm {
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(retries) = crm.retries {
                self.crm.retries = retries;
            }
            if let Some(backoff_factor_secs) = crm.backoff_factor_secs {
                self.crm.backoff_factor_secs = backoff_factor_secs;
            }
            if let Some(request_timeout_secs) = crm.request_timeout_secs {
                self.crm.request_timeout_secs = request_timeout_secs;
            }
            if let Some(log_path) = crm.log_path {
                self.crm.log_path = log_path;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(allowed_origins) = server.allowed_origins {
                self.server.allowed_origins = allowed_origins;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(timezone) = agent.timezone {
                self.agent.timezone = timezone;
            }
            if let Some(max_tool_steps) = agent.max_tool_steps {
                self.agent.max_tool_steps = max_tool_steps;
            }
            if let Some(session_ttl_secs) = agent.session_ttl_secs {
                self.agent.session_ttl_secs = session_ttl_secs;
            }
            if let Some(max_history_turns) = agent.max_history_turns {
                self.agent.max_history_turns = max_history_turns;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CRMBOT_CRM_BASE_URL") {
            self.crm.base_url = value;
        }
        if let Some(value) = read_env("CRMBOT_CRM_RETRIES") {
            self.crm.retries = parse_u32("CRMBOT_CRM_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_CRM_BACKOFF_FACTOR_SECS") {
            self.crm.backoff_factor_secs = parse_f64("CRMBOT_CRM_BACKOFF_FACTOR_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_CRM_REQUEST_TIMEOUT_SECS") {
            self.crm.request_timeout_secs = parse_u64("CRMBOT_CRM_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_CRM_LOG_PATH") {
            self.crm.log_path = PathBuf::from(value);
        }

        if let Some(value) = read_env("CRMBOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CRMBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        } else if self.llm.api_key.is_none() && self.llm.provider == LlmProvider::Groq {
            if let Some(value) = read_env("GROQ_API_KEY") {
                self.llm.api_key = Some(secret_value(value));
            }
        }
        if let Some(value) = read_env("CRMBOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CRMBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CRMBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CRMBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CRMBOT_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CRMBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CRMBOT_SERVER_PORT") {
            self.server.port = parse_u16("CRMBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_SERVER_ALLOWED_ORIGINS") {
            self.server.allowed_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = read_env("CRMBOT_AGENT_TIMEZONE") {
            self.agent.timezone = value;
        }
        if let Some(value) = read_env("CRMBOT_AGENT_MAX_TOOL_STEPS") {
            self.agent.max_tool_steps = parse_u32("CRMBOT_AGENT_MAX_TOOL_STEPS", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_AGENT_SESSION_TTL_SECS") {
            self.agent.session_ttl_secs = parse_u64("CRMBOT_AGENT_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CRMBOT_AGENT_MAX_HISTORY_TURNS") {
            self.agent.max_history_turns =
                parse_u32("CRMBOT_AGENT_MAX_HISTORY_TURNS", &value)? as usize;
        }

        let log_level = read_env("CRMBOT_LOGGING_LEVEL").or_else(|| read_env("CRMBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CRMBOT_LOGGING_FORMAT").or_else(|| read_env("CRMBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = base_url;
        }
        if let Some(log_path) = overrides.crm_log_path {
            self.crm.log_path = log_path;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(api_key));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_crm(&self.crm)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_agent(&self.agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Explicit path when it exists, otherwise the first existing default
/// location.
pub fn discover_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || !matches!(chars.peek(), Some('{')) {
            output.push(ch);
            continue;
        }

        chars.next();
        let mut key = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => key.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }

        let value =
            env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
        output.push_str(&value);
    }

    Ok(output)
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
    }
}

fn validate_timeout(field: &str, timeout_secs: u64) -> Result<(), ConfigError> {
    if (1..=300).contains(&timeout_secs) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must be in range 1..=300")))
    }
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    validate_http_url("crm.base_url", &crm.base_url)?;

    if crm.retries > 10 {
        return Err(ConfigError::Validation("crm.retries must be at most 10".to_string()));
    }
    if !crm.backoff_factor_secs.is_finite() || crm.backoff_factor_secs < 0.0 {
        return Err(ConfigError::Validation(
            "crm.backoff_factor_secs must be a finite number >= 0".to_string(),
        ));
    }
    validate_timeout("crm.request_timeout_secs", crm.request_timeout_secs)?;

    if crm.log_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("crm.log_path must not be empty".to_string()));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    validate_timeout("llm.timeout_secs", llm.timeout_secs)?;
    validate_http_url("llm.base_url", &llm.effective_base_url())?;

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    if llm.max_retries > 10 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 10".to_string()));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            let hint = if llm.provider == LlmProvider::Groq {
                " (set CRMBOT_LLM_API_KEY or GROQ_API_KEY)"
            } else {
                " (set CRMBOT_LLM_API_KEY)"
            };
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required for the {} provider{hint}",
                llm.provider.as_str()
            )));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    agent.tz()?;

    if agent.max_tool_steps == 0 {
        return Err(ConfigError::Validation(
            "agent.max_tool_steps must be greater than zero".to_string(),
        ));
    }
    if agent.session_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.session_ttl_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    crm: Option<CrmPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    agent: Option<AgentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    base_url: Option<String>,
    retries: Option<u32>,
    backoff_factor_secs: Option<f64>,
    request_timeout_secs: Option<u64>,
    log_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    timezone: Option<String>,
    max_tool_steps: Option<u32>,
    session_ttl_secs: Option<u64>,
    max_history_turns: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
