//! Local model server speaking the Ollama `/api/chat` protocol.

use super::{parse_vendor_error, ModelClient, ProviderError};
use crate::config::ConfigSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Calls `{OLLAMA_HOST}/api/chat` with `OLLAMA_MODEL`, non-streaming.
#[derive(Debug, Clone, Default)]
pub struct OllamaClient {
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(
        &self,
        config: &ConfigSnapshot,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", config.ollama_host.trim_end_matches('/'));
        let body = ChatRequest {
            model: &config.ollama_model,
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
            stream: false,
        };

        tracing::debug!(
            target: "recon::providers",
            model = %config.ollama_model,
            "dispatching to local model server"
        );

        let response = self
            .client
            .post(&url)
            .timeout(config.model_timeout())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message) = parse_vendor_error(&text);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no content returned from Ollama".to_string()))
    }
}
