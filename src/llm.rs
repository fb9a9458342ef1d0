//! Hosted chat-completion client.
//!
//! Defines the [`LlmClient`] trait and [`OpenAiCompatibleClient`], which
//! speaks the OpenAI `POST {base_url}/chat/completions` protocol. Groq,
//! OpenAI, and most self-hosted gateways accept it unchanged.
//!
//! Construction is a local binding: it checks the configuration shape and
//! builds an HTTP client, but never contacts the service. Bad credentials or
//! unknown model names surface on the first [`LlmClient::chat`] call.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::models::ChatMessage;

/// A conversational language model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier requests are sent to.
    fn model_name(&self) -> &str;

    /// Produce the assistant's reply to `messages`.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Everything [`OpenAiCompatibleClient`] needs, already resolved.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl LlmSettings {
    /// Resolve settings from config, reading the credential from the
    /// environment variable named by `api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow!(
                "{} environment variable not set (required by llm provider '{}')",
                config.api_key_env,
                config.provider
            )
        })?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.resolved_base_url()?,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("model", &self.settings.model)
            .field("base_url", &self.settings.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        if settings.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if settings.api_key.trim().is_empty() {
            bail!("llm api key must not be empty");
        }
        if settings.base_url.trim().is_empty() {
            bail!("llm base url must not be empty");
        }

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream: false,
        };
        let url = self.endpoint();

        let mut last_err = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.settings.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let text = response.text().await?;
                        return parse_chat_response(&text);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Chat completion failed after retries")))
    }
}

/// Extract the first choice's message content.
fn parse_chat_response(text: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(text).context("Invalid chat completion response")?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Invalid chat completion response: no choices"))?;
    Ok(choice.message.content.unwrap_or_default())
}

/// Build the client described by `config`.
///
/// # Errors
///
/// Returns an error for an unknown provider, a missing credential variable,
/// or an empty model name. No request is made.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "groq" | "openai" | "openai-compatible" => {
            let settings = LlmSettings::from_config(config)?;
            let client = OpenAiCompatibleClient::new(settings)?;
            info!(provider = %config.provider, model = %client.model_name(), "llm client ready");
            Ok(Box::new(client))
        }
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LlmSettings {
        LlmSettings {
            model: "llama3-8b-8192".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.groq.com/openai/v1/".to_string(),
            temperature: 0.1,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
            max_retries: 0,
        }
    }

    #[test]
    fn test_new_does_not_touch_network() {
        let client = OpenAiCompatibleClient::new(settings()).unwrap();
        assert_eq!(client.model_name(), "llama3-8b-8192");
        assert_eq!(
            client.endpoint(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_new_rejects_empty_model() {
        let mut s = settings();
        s.model = "  ".to_string();
        assert!(OpenAiCompatibleClient::new(s).is_err());
    }

    #[test]
    fn test_new_rejects_empty_key() {
        let mut s = settings();
        s.api_key = String::new();
        assert!(OpenAiCompatibleClient::new(s).is_err());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = OpenAiCompatibleClient::new(settings()).unwrap();
        assert!(!format!("{:?}", client).contains("test-key"));
    }

    #[test]
    fn test_missing_key_env() {
        let config = LlmConfig {
            api_key_env: "ICHAT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        let err = create_client(&config).err().unwrap();
        assert!(err.to_string().contains("ICHAT_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_request_serializes_roles_lowercase() {
        let messages = vec![ChatMessage::system("ctx"), ChatMessage::user("hi")];
        let req = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.0,
            max_tokens: 8,
            stream: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_parse_response() {
        let text = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"The sky is blue."},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_chat_response(text).unwrap(), "The sky is blue.");
    }

    #[test]
    fn test_parse_response_without_choices() {
        assert!(parse_chat_response(r#"{"choices":[]}"#).is_err());
        assert!(parse_chat_response("not json").is_err());
    }

    #[test]
    fn test_parse_response_null_content() {
        let text = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_chat_response(text).unwrap(), "");
    }
}
