//! Model provider contracts and the failure taxonomy shared by the router and the gateway.
//!
//! Both backends are invoked the same way, `chat(config, system_prompt, user_message)`, and
//! report failures as [`ProviderError`]. [`classify`] turns a failure into the
//! user-facing [`FailureClassification`].

mod ollama;
mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiCompatClient;

use crate::config::ConfigSnapshot;

/// Persona sent as the `system` message on every model call.
pub const SYSTEM_PROMPT: &str = "You are 'Strategist', an advanced repository analysis AI for the RepoRecon system. \
Your persona is technical, concise, and tactical. You speak like a senior engineer or ops commander. \
You analyze code, architecture, and git history. \
Do not hallucinate files if you don't know them, but you can infer standard project structures. \
Keep responses short and high-density. Avoid fluff.";

/// Vendor error code the OpenAI-compatible APIs use for an exhausted billing quota.
pub const INSUFFICIENT_QUOTA: &str = "insufficient_quota";

/// A backend that answers one chat turn.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Short name for logs ("ollama", "openai-compatible", ...).
    fn name(&self) -> &str;

    async fn chat(
        &self,
        config: &ConfigSnapshot,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Upstream answered with a non-success status. `code`/`message` come from a
    /// `{"error": {"code", "message"}}` body when one could be parsed.
    #[error("upstream returned HTTP {status}")]
    Status {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    #[error("request timed out")]
    Timeout,
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("{0} is not configured")]
    MissingCredential(&'static str),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

/// Why a provider call failed, in terms a user can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClassification {
    /// HTTP 401: the credential was rejected.
    Unauthorized { message: Option<String> },
    /// HTTP 429. `quota_exhausted` is set when the vendor reported `insufficient_quota`.
    RateLimited {
        quota_exhausted: bool,
        message: Option<String>,
    },
    Timeout,
    Unreachable,
    Unknown {
        status: Option<u16>,
        message: Option<String>,
    },
}

/// Map a provider failure to its classification.
pub fn classify(err: &ProviderError) -> FailureClassification {
    match err {
        ProviderError::Status {
            status: 401,
            message,
            ..
        } => FailureClassification::Unauthorized {
            message: message.clone(),
        },
        ProviderError::Status {
            status: 429,
            code,
            message,
        } => FailureClassification::RateLimited {
            quota_exhausted: code
                .as_deref()
                .map(|c| c.trim().eq_ignore_ascii_case(INSUFFICIENT_QUOTA))
                .unwrap_or(false),
            message: message.clone(),
        },
        ProviderError::Status {
            status, message, ..
        } => FailureClassification::Unknown {
            status: Some(*status),
            message: message.clone(),
        },
        ProviderError::Timeout => FailureClassification::Timeout,
        ProviderError::Unreachable(_) => FailureClassification::Unreachable,
        ProviderError::MissingCredential(_) | ProviderError::InvalidResponse(_) => {
            FailureClassification::Unknown {
                status: None,
                message: Some(err.to_string()),
            }
        }
    }
}

impl FailureClassification {
    /// HTTP status the gateway answers with when an explicitly chosen provider fails.
    pub fn http_status(&self) -> u16 {
        match self {
            FailureClassification::Timeout => 504,
            FailureClassification::Unknown { status: None, .. } => 500,
            _ => 502,
        }
    }

    /// Full message for an error response.
    pub fn detail(&self) -> String {
        let with_upstream = |base: &str, upstream: &Option<String>| match upstream
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            Some(m) => format!("{} {}", base, m),
            None => base.to_string(),
        };
        match self {
            FailureClassification::Unauthorized { message } => with_upstream(
                "Model API rejected credentials (401). Check LLM_API_KEY.",
                message,
            ),
            FailureClassification::RateLimited {
                quota_exhausted: true,
                message,
            } => with_upstream(
                "Model API quota exceeded (429 insufficient_quota). Check billing/quota for LLM_API_KEY.",
                message,
            ),
            FailureClassification::RateLimited { message, .. } => {
                with_upstream("Model API rate limit reached (429). Retry shortly.", message)
            }
            FailureClassification::Timeout => "Model provider timed out".to_string(),
            FailureClassification::Unreachable => "Model provider is unreachable".to_string(),
            FailureClassification::Unknown {
                status: Some(status),
                ..
            } => format!("Model API request failed ({}).", status),
            FailureClassification::Unknown { status: None, .. } => {
                "Model provider request failed.".to_string()
            }
        }
    }

    /// Short phrase for the remote half of an `auto` fallback reason.
    pub fn summary(&self) -> String {
        match self {
            FailureClassification::Unauthorized { .. } => "API key rejected (401)".to_string(),
            FailureClassification::RateLimited {
                quota_exhausted: true,
                ..
            } => "API quota exhausted (429 insufficient_quota)".to_string(),
            FailureClassification::RateLimited { .. } => "API rate limited (429)".to_string(),
            FailureClassification::Timeout => "API timed out".to_string(),
            FailureClassification::Unreachable => "API provider unreachable".to_string(),
            FailureClassification::Unknown {
                status: Some(status),
                ..
            } => format!("API failed ({})", status),
            FailureClassification::Unknown { status: None, .. } => "API failed (unknown)".to_string(),
        }
    }
}

/// Parse `{"error": {"code": ..., "message": ...}}`. Codes may be strings or numbers.
pub(crate) fn parse_vendor_error(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };
    let Some(error) = value.get("error") else {
        return (None, None);
    };
    let code = error.get("code").and_then(|c| match c {
        serde_json::Value::String(s) => Some(s.trim().to_lowercase()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let message = match error {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        _ => error
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.trim().to_string()),
    }
    .filter(|m| !m.is_empty());
    (code.filter(|c| !c.is_empty()), message)
}
