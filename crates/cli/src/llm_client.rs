//! Concrete `Completion` implementation (spec §6: LLM provider wire
//! protocols are an external collaborator, out of scope for the core
//! crate). `aegish-llm` defines the abstract interface; this is the
//! minimal OpenAI-chat-completions-shaped client the binary needs to
//! actually talk to a provider.

use aegish_llm::{Completion, CompletionError, CompletionResponse, Message, Role};
use async_trait::async_trait;
use std::time::Duration;

/// Maps a provider name (the prefix of a `provider/model` id, per
/// `ConfigSnapshot::candidate_models`) to its chat-completions endpoint and
/// the environment variable holding its API key.
fn provider_endpoint(provider: &str) -> Option<(&'static str, &'static str)> {
    match provider {
        "openai" => Some(("https://api.openai.com/v1/chat/completions", "OPENAI_API_KEY")),
        "anthropic" => Some((
            "https://api.anthropic.com/v1/chat/completions",
            "ANTHROPIC_API_KEY",
        )),
        _ => None,
    }
}

pub struct HttpCompletion {
    client: reqwest::Client,
}

impl HttpCompletion {
    pub fn new() -> Self {
        HttpCompletion {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Completion for HttpCompletion {
    async fn completion(
        &self,
        model_id: &str,
        messages: &[Message],
        timeout: Duration,
    ) -> Result<CompletionResponse, CompletionError> {
        let (provider, model) = model_id
            .split_once('/')
            .ok_or_else(|| CompletionError::Fatal(format!("malformed model id: {model_id}")))?;

        let (endpoint, key_var) = provider_endpoint(provider)
            .ok_or_else(|| CompletionError::Fatal(format!("unknown provider: {provider}")))?;

        let api_key = std::env::var(key_var)
            .map_err(|_| CompletionError::Fatal(format!("{key_var} is not set")))?;

        let body = serde_json::json!({
            "model": model,
            "temperature": 0.0,
            "messages": messages.iter().map(|m| serde_json::json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                },
                "content": m.content,
            })).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout
                } else {
                    CompletionError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                CompletionError::Transient(format!("{status}: {text}"))
            } else {
                CompletionError::Fatal(format!("{status}: {text}"))
            });
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Fatal(format!("malformed response body: {e}")))?;

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CompletionError::Fatal("response missing message content".to_string()))?
            .to_string();

        Ok(CompletionResponse { text })
    }
}
