use std::time::Duration;

use crmbot_core::action_log::JsonlActionLog;
use crmbot_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

use crate::commands::CommandResult;

const CRM_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_action_log(&config));
            checks.push(check_crm_reachability(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["action_log_writable", "crm_reachability"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_action_log(config: &AppConfig) -> DoctorCheck {
    let log = JsonlActionLog::new(config.crm.log_path.clone());
    match log.check_writable() {
        Ok(()) => DoctorCheck {
            name: "action_log_writable",
            status: CheckStatus::Pass,
            details: format!("`{}` is writable", log.path().display()),
        },
        Err(error) => DoctorCheck {
            name: "action_log_writable",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

/// Any HTTP response counts as reachable; only transport failures fail.
fn check_crm_reachability(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "crm_reachability",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let base_url = config.crm.base_url.clone();
    let result = runtime.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(CRM_PROBE_TIMEOUT)
            .build()
            .map_err(|error| format!("failed to build http client: {error}"))?;
        let response = client
            .get(&base_url)
            .send()
            .await
            .map_err(|error| format!("crm service unreachable at `{base_url}`: {error}"))?;
        Ok::<u16, String>(response.status().as_u16())
    });

    match result {
        Ok(status) => DoctorCheck {
            name: "crm_reachability",
            status: CheckStatus::Pass,
            details: format!("`{}` answered with HTTP {status}", config.crm.base_url),
        },
        Err(error) => {
            DoctorCheck { name: "crm_reachability", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
