//! Remote OpenAI-compatible chat completions endpoint (OpenAI, OpenRouter, ...).

use super::{parse_vendor_error, ModelClient, ProviderError};
use crate::config::ConfigSnapshot;
use serde::{Deserialize, Serialize};

const TEMPERATURE: f32 = 0.2;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessageResponse>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Calls `{LLM_API_BASE_URL}/chat/completions` with bearer `LLM_API_KEY`.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn chat(
        &self,
        config: &ConfigSnapshot,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError> {
        let key = config.remote_api_key();
        if key.is_empty() {
            return Err(ProviderError::MissingCredential("LLM_API_KEY"));
        }
        let base = config
            .llm_api_base_url
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .trim_end_matches('/');
        let model = config
            .llm_api_model
            .trim()
            .trim_matches(|c| c == '\'' || c == '"');
        let url = format!("{}/chat/completions", base);

        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            temperature: TEMPERATURE,
        };

        tracing::debug!(target: "recon::providers", model = %model, "dispatching to remote model API");

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .timeout(config.model_timeout())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message) = parse_vendor_error(&text);
            tracing::warn!(
                target: "recon::providers",
                status = status.as_u16(),
                code = code.as_deref().unwrap_or(""),
                "remote model API returned an error"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no content returned from API model".to_string()))
    }
}
