use reqwest::StatusCode;
use thiserror::Error;

/// Every way a CRM operation can fail. Tool adapters surface the `Display`
/// text to the model, so the wording is part of the contract.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CrmError {
    #[error("Validation errors: {}", render_list(.0))]
    Validation(Vec<String>),
    #[error("max retries exceeded for url: {url} (too many {status} error responses)")]
    Transient { status: u16, attempts: u32, url: String },
    #[error("{}", render_http(.status, .url, .detail))]
    Http { status: u16, url: String, detail: Option<String> },
    #[error("{message}")]
    Transport { message: String, connect: bool },
    #[error("{0}")]
    Parse(String),
}

impl CrmError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transient { .. } => "transient",
            Self::Http { .. } => "http",
            Self::Transport { .. } => "transport",
            Self::Parse(_) => "parse",
        }
    }

    /// True when the same request could succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Transport { connect, .. } => *connect,
            Self::Validation(_) | Self::Http { .. } | Self::Parse(_) => false,
        }
    }
}

fn render_list(messages: &[String]) -> String {
    let quoted = messages
        .iter()
        .map(|message| {
            if message.contains('\'') && !message.contains('"') {
                format!("\"{message}\"")
            } else {
                format!("'{}'", message.replace('\'', "\\'"))
            }
        })
        .collect::<Vec<_>>();
    format!("[{}]", quoted.join(", "))
}

fn render_http(status: &u16, url: &str, detail: &Option<String>) -> String {
    let status = *status;
    let class = if status >= 500 { "Server Error" } else { "Client Error" };
    let reason =
        StatusCode::from_u16(status).ok().and_then(|code| code.canonical_reason()).unwrap_or("");
    let mut rendered = format!("{status} {class}: {reason} for url: {url}");
    if let Some(detail) = detail {
        rendered.push_str(" | Detail: ");
        rendered.push_str(detail);
    }
    rendered
}
