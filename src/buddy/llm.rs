//! External LLM adapter contract (§4.4 "LLM adapter interface"). The
//! concrete provider is out of scope for the orchestration core (§1); this
//! module defines the narrow trait the Brain talks to, plus one real,
//! runnable implementation backed by `reqwest` for a generic chat-completions
//! style HTTP endpoint, grounded on the teacher's own `reqwest`-based
//! provider clients under `src/fae_llm/providers/`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// A constructed (or attempted) chat session. Kept generic over the
/// provider so the Brain never has to know which backend is in use.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one turn and await a reply. Never propagates an error to the
    /// caller — a provider failure is represented as `LlmOutcome::Failed`
    /// so the Brain can substitute the configured apology string instead
    /// of aborting the event (§7 "transient I/O error").
    async fn send(&self, text: &str) -> LlmOutcome;
}

pub enum LlmOutcome {
    Reply(String),
    /// A validation/shape error reported by the provider (bad request,
    /// content filtered, etc.) — distinguished from `ProviderError` only
    /// for logging; the user-facing apology may coincide.
    ValidationError(String),
    /// A generic/transient provider error (network failure, 5xx, timeout).
    ProviderError(String),
}

/// Raised when constructing a session fails. `Configuration` is fatal and
/// aborts Brain/Orchestrator construction (§4.3, §4.4); `Transient` leaves
/// the Brain's session handle unset so it degrades to the "not available"
/// apology rather than failing the whole process.
#[derive(Debug)]
pub enum SessionInitError {
    Configuration(String),
    Transient(String),
}

impl std::fmt::Display for SessionInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionInitError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            SessionInitError::Transient(msg) => write!(f, "transient error: {msg}"),
        }
    }
}

/// A generic chat-completions-style HTTP client. Any OpenAI-compatible
/// endpoint (including most self-hosted and third-party LLM gateways)
/// fits this shape; the base URL and API key are read from configuration
/// and environment respectively (§5.4).
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
    system_instruction: String,
    temperature: f64,
}

impl HttpLlmClient {
    pub fn new(
        base_url: String,
        api_key: String,
        model_id: String,
        system_instruction: String,
        temperature: f64,
    ) -> Self {
        HttpLlmClient {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model_id,
            system_instruction,
            temperature,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn send(&self, text: &str) -> LlmOutcome {
        let body = json!({
            "model": self.model_id,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": self.system_instruction},
                {"role": "user", "content": text},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => return LlmOutcome::ProviderError(err.to_string()),
        };

        if !response.status().is_success() {
            let status = response.status();
            return if status.is_client_error() {
                LlmOutcome::ValidationError(format!("provider rejected request: {status}"))
            } else {
                LlmOutcome::ProviderError(format!("provider returned {status}"))
            };
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(parsed) => match parsed.choices.into_iter().next() {
                Some(choice) => LlmOutcome::Reply(choice.message.content),
                None => LlmOutcome::ProviderError("empty choices array".into()),
            },
            Err(err) => LlmOutcome::ProviderError(format!("malformed response: {err}")),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A hand-rolled fake used by Brain tests instead of mocking HTTP from
    /// within this crate's own test suite (§5.5).
    pub struct FakeLlmClient {
        pub reply: Mutex<String>,
    }

    impl FakeLlmClient {
        pub fn new(reply: impl Into<String>) -> Self {
            FakeLlmClient {
                reply: Mutex::new(reply.into()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FakeLlmClient {
        async fn send(&self, _text: &str) -> LlmOutcome {
            LlmOutcome::Reply(self.reply.lock().unwrap().clone())
        }
    }
}
