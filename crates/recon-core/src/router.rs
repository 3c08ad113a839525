//! ProviderRouter: resolves which backend answers a chat message and how failures cascade.
//!
//! An explicitly requested provider (or a concrete configured default) is called once and
//! its failure is returned classified. `auto` walks a fixed chain,
//! local → remote (only with a credential) → deterministic fallback text, and always
//! produces a reply. Every provider is invoked at most once per call.

use crate::config::{ConfigSnapshot, ProviderMode};
use crate::providers::{classify, FailureClassification, ModelClient, SYSTEM_PROMPT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MOCK_SNIPPET_CHARS: usize = 180;

/// Which backend produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderUsed {
    Local,
    Remote,
    Mock,
    Fallback,
}

/// A successful routing outcome. `failure` is set on `auto` fallbacks whose remote
/// attempt failed, so callers can still see why.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub provider_used: ProviderUsed,
    pub failure: Option<FailureClassification>,
}

impl ChatReply {
    fn new(text: String, provider_used: ProviderUsed) -> Self {
        Self {
            text,
            provider_used,
            failure: None,
        }
    }
}

/// States of the `auto` chain.
enum Step {
    TryLocal,
    TryRemote,
    Fallback {
        reason: String,
        failure: Option<FailureClassification>,
    },
    Done(ChatReply),
}

pub struct ProviderRouter {
    local: Arc<dyn ModelClient>,
    remote: Arc<dyn ModelClient>,
}

impl ProviderRouter {
    pub fn new(local: Arc<dyn ModelClient>, remote: Arc<dyn ModelClient>) -> Self {
        Self { local, remote }
    }

    /// A requested concrete mode wins; `auto` defers to a concrete configured default.
    pub fn resolve(requested: ProviderMode, config: &ConfigSnapshot) -> ProviderMode {
        match requested {
            ProviderMode::Auto => config.ai_provider,
            concrete => concrete,
        }
    }

    /// Route one chat message. Only non-`auto` routes return `Err`.
    pub async fn route(
        &self,
        config: &ConfigSnapshot,
        message: &str,
        requested: ProviderMode,
    ) -> Result<ChatReply, FailureClassification> {
        let effective = Self::resolve(requested, config);
        tracing::debug!(
            target: "recon::router",
            requested = %requested,
            effective = %effective,
            "routing chat message"
        );

        match effective {
            ProviderMode::Local => self
                .call(self.local.as_ref(), config, message)
                .await
                .map(|text| ChatReply::new(text, ProviderUsed::Local)),
            ProviderMode::Remote => self
                .call(self.remote.as_ref(), config, message)
                .await
                .map(|text| ChatReply::new(text, ProviderUsed::Remote)),
            ProviderMode::Mock => Ok(ChatReply::new(mock_reply(config, message), ProviderUsed::Mock)),
            ProviderMode::Auto => Ok(self.route_auto(config, message).await),
        }
    }

    async fn call(
        &self,
        client: &dyn ModelClient,
        config: &ConfigSnapshot,
        message: &str,
    ) -> Result<String, FailureClassification> {
        client
            .chat(config, SYSTEM_PROMPT, message)
            .await
            .map_err(|err| {
                let classification = classify(&err);
                tracing::warn!(
                    target: "recon::router",
                    provider = client.name(),
                    error = %err,
                    "explicitly selected provider failed"
                );
                classification
            })
    }

    async fn route_auto(&self, config: &ConfigSnapshot, message: &str) -> ChatReply {
        let mut step = Step::TryLocal;
        loop {
            step = match step {
                Step::TryLocal => match self.local.chat(config, SYSTEM_PROMPT, message).await {
                    Ok(text) => Step::Done(ChatReply::new(text, ProviderUsed::Local)),
                    Err(err) => {
                        tracing::info!(
                            target: "recon::router",
                            provider = self.local.name(),
                            error = %err,
                            "local model failed in auto mode"
                        );
                        if config.has_remote_credential() {
                            Step::TryRemote
                        } else {
                            Step::Fallback {
                                reason: "local model unreachable and remote credential missing (LLM_API_KEY missing)"
                                    .to_string(),
                                failure: None,
                            }
                        }
                    }
                },
                Step::TryRemote => match self.remote.chat(config, SYSTEM_PROMPT, message).await {
                    Ok(text) => Step::Done(ChatReply::new(text, ProviderUsed::Remote)),
                    Err(err) => {
                        let classification = classify(&err);
                        tracing::warn!(
                            target: "recon::router",
                            provider = self.remote.name(),
                            error = %err,
                            "remote model failed in auto mode"
                        );
                        Step::Fallback {
                            reason: format!("local model unreachable and {}", classification.summary()),
                            failure: Some(classification),
                        }
                    }
                },
                Step::Fallback { reason, failure } => Step::Done(ChatReply {
                    text: fallback_reply(config, message, &reason),
                    provider_used: ProviderUsed::Fallback,
                    failure,
                }),
                Step::Done(reply) => return reply,
            };
        }
    }
}

fn asks_for_status(message: &str) -> bool {
    message.to_lowercase().contains("status")
}

/// Canned operational summary built from the snapshot.
pub fn status_summary(config: &ConfigSnapshot) -> String {
    let github = if config.github_repo.trim().is_empty() {
        "not configured".to_string()
    } else {
        format!("tracking {}", config.github_repo.trim())
    };
    format!(
        "System Status: Online. GitHub: {}. Default provider: {}.",
        github, config.ai_provider
    )
}

fn fallback_reply(config: &ConfigSnapshot, message: &str, reason: &str) -> String {
    let mut text = format!(
        "AI provider unavailable ({}).\n\nConfigure either a local model server or an API key-based provider.",
        reason
    );
    if asks_for_status(message) {
        text.push_str("\n\n");
        text.push_str(&status_summary(config));
    } else {
        text.push_str("\n\nI can only answer basic status prompts until a model provider is configured.");
    }
    text
}

/// Deterministic reply for `mock` mode. No network.
pub fn mock_reply(config: &ConfigSnapshot, message: &str) -> String {
    let normalised = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let snippet: String = normalised.chars().take(MOCK_SNIPPET_CHARS).collect();
    let mut text = format!(
        "Mock provider response (no external model call).\n\nReceived: {}\n\nThis confirms terminal -> backend -> provider routing is working.",
        snippet
    );
    if asks_for_status(message) {
        text.push_str("\n\n");
        text.push_str(&status_summary(config));
    }
    text
}
