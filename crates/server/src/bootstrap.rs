use std::sync::Arc;

use crmbot_agent::{AgentRuntime, LlmError, OpenAiCompatibleClient, SystemClock, ToolRegistry};
use crmbot_core::action_log::JsonlActionLog;
use crmbot_core::config::{AppConfig, ConfigError};
use crmbot_crm::{CrmClient, CrmError};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub action_log: Arc<JsonlActionLog>,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("crm client setup failed: {0}")]
    Crm(#[source] CrmError),
    #[error("language model client setup failed: {0}")]
    Llm(#[source] LlmError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");
    let action_log = Arc::new(JsonlActionLog::new(config.crm.log_path.clone()));
    let crm = CrmClient::from_config(&config.crm, action_log.clone()).map_err(BootstrapError::Crm)?;
    info!(
        event_name = "system.bootstrap.crm_configured",
        correlation_id = "bootstrap",
        base_url = %config.crm.base_url,
        action_log = %config.crm.log_path.display(),
        "crm client configured"
    );

    let llm = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    info!(
        event_name = "system.bootstrap.llm_configured",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        endpoint = %llm.endpoint(),
        "language model client configured"
    );

    let timezone = config.agent.tz()?;
    let tools = ToolRegistry::crm(crm, timezone, Arc::new(SystemClock));
    let runtime = AgentRuntime::new(Arc::new(llm), tools, &config.agent)?;

    Ok(Application { config, action_log, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use crmbot_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn config(dir: &std::path::Path) -> AppConfig {
        AppConfig::load(LoadOptions {
            config_path: Some(dir.join("absent.toml")),
            require_file: false,
            overrides: ConfigOverrides {
                crm_log_path: Some(dir.join("crm_log.jsonl")),
                llm_api_key: Some("gsk-test".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("config")
    }

    #[tokio::test]
    async fn bootstrap_wires_runtime_with_crm_tools() {
        let dir = tempfile::tempdir().expect("tempdir");

        let app = bootstrap_with_config(config(dir.path())).await.expect("bootstrap");

        assert_eq!(app.runtime.tools().len(), 3);
        assert_eq!(app.action_log.path(), dir.path().join("crm_log.jsonl"));
    }

    #[tokio::test]
    async fn bootstrap_rejects_an_unknown_timezone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.agent.timezone = "Mars/Olympus".to_string();

        let error = bootstrap_with_config(config).await.err().expect("error");

        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("agent.timezone"), "{error}");
    }
}
