//! LLM providers and orchestration
//!
//! Every upstream speaks the OpenAI-compatible `/chat/completions` API.
//! [`ProviderClient`] talks to one of them and owns its retry policy;
//! [`LlmService`] walks the priority-ordered providers until one answers.

pub mod conversation;
mod http_utils;
/// Single-upstream client with per-provider retries
pub mod provider;
/// Priority-ordered fallback across providers
pub mod service;

pub use provider::ProviderClient;
pub use service::LlmService;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Generic reply shown to users when no text could be generated.
pub const UNAVAILABLE_MESSAGE: &str =
    "🔮 The oracle is temporarily unavailable. Please try again in a minute.";

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Upstream answered 503, usually while the model is cold-starting
    #[error("[{provider}] upstream busy (HTTP 503)")]
    UpstreamBusy {
        /// Provider name
        provider: String,
    },
    /// Rate limit exceeded (429), optionally with a wait time
    #[error("[{provider}] rate limit exceeded (HTTP 429){}", format_wait(.wait_secs))]
    RateLimited {
        /// Provider name
        provider: String,
        /// Retry-After duration in seconds, if provided by the server
        wait_secs: Option<u64>,
    },
    /// Timeout or connection failure
    #[error("[{provider}] network error: {message}")]
    TransientNetwork {
        /// Provider name
        provider: String,
        /// Underlying transport error
        message: String,
    },
    /// Non-retryable HTTP status
    #[error("[{provider}] HTTP {status}: {body}")]
    HardUpstream {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },
    /// A provider spent its whole retry budget on retryable failures
    #[error("[{provider}] all {attempts} attempts exhausted: {cause}")]
    ProviderExhausted {
        /// Provider name
        provider: String,
        /// Number of attempts made
        attempts: u32,
        /// The last retryable failure
        #[source]
        cause: Box<LlmError>,
    },
    /// Every configured provider failed
    #[error("all LLM providers failed{}", format_failures(.failures))]
    AllProvidersFailed {
        /// One entry per attempted provider, in attempt order
        failures: Vec<ProviderFailure>,
    },
    /// HTTP 200 but the body lacks `choices[0].message.content`
    #[error("unexpected response shape from {provider}: {detail}")]
    ResponseShape {
        /// Provider name
        provider: String,
        /// What was missing or malformed
        detail: String,
    },
    /// The HTTP client could not be built or the request could not be formed
    #[error("[{provider}] transport error: {message}")]
    Transport {
        /// Provider name
        provider: String,
        /// Underlying error
        message: String,
    },
}

impl LlmError {
    /// Returns true for the kinds a provider retries internally.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamBusy { .. } | Self::RateLimited { .. } | Self::TransientNetwork { .. }
        )
    }

    /// Name of the provider the error came from, if it is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::UpstreamBusy { provider }
            | Self::RateLimited { provider, .. }
            | Self::TransientNetwork { provider, .. }
            | Self::HardUpstream { provider, .. }
            | Self::ProviderExhausted { provider, .. }
            | Self::ResponseShape { provider, .. }
            | Self::Transport { provider, .. } => Some(provider),
            Self::AllProvidersFailed { .. } => None,
        }
    }

    /// Text that is safe to show to a bot user.
    ///
    /// Internal details (status codes, bodies, provider names) never leak
    /// into the chat.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        UNAVAILABLE_MESSAGE
    }
}

fn format_wait(wait_secs: &Option<u64>) -> String {
    wait_secs.map_or_else(String::new, |secs| format!(", retry after {secs}s"))
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return " (no providers configured)".to_string();
    }
    failures
        .iter()
        .map(|f| format!("\n  • {f}"))
        .collect::<String>()
}

/// Summary of one provider's failure inside a fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// Provider name
    pub provider: String,
    /// Human-readable failure description
    pub summary: String,
}

impl ProviderFailure {
    /// Summarise `error` raised by `provider`
    #[must_use]
    pub fn new(provider: &str, error: &LlmError) -> Self {
        Self {
            provider: provider.to_string(),
            summary: error.to_string(),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
}

/// A message in an LLM conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Text content of the message
    pub content: String,
}

impl Message {
    /// Create a new system message
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }

    /// Create a new user message
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    /// Create a new assistant message
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// Sampling parameters shared by every provider in a fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChatParams {
    /// Sampling temperature
    pub temperature: f32,
    /// Output token limit
    pub max_tokens: u32,
    /// Additional body fields passed through to the upstream API
    pub extra: Map<String, Value>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            extra: Map::new(),
        }
    }
}

impl ChatParams {
    /// Override the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the output token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Add a provider-specific body field (e.g. `top_p`)
    #[must_use]
    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// One chat-completion request, independent of the provider serving it
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Ordered conversation
    pub messages: Vec<Message>,
    /// Sampling temperature
    pub temperature: f32,
    /// Output token limit
    pub max_tokens: u32,
    /// Additional body fields
    pub extra_params: Map<String, Value>,
}

impl ChatRequest {
    /// Build a request from a conversation and sampling parameters
    #[must_use]
    pub fn new(messages: Vec<Message>, params: &ChatParams) -> Self {
        Self {
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            extra_params: params.extra.clone(),
        }
    }

    /// Minimal request used for health checks
    #[must_use]
    pub fn ping() -> Self {
        Self::new(
            vec![Message::user("ping")],
            &ChatParams::default()
                .with_temperature(0.0)
                .with_max_tokens(1),
        )
    }

    /// Serialize into an OpenAI-compatible request body for `model`.
    ///
    /// Extra parameters never override `model`, `messages`, `temperature`
    /// or `max_tokens`.
    #[must_use]
    pub fn to_body(&self, model: &str) -> Value {
        let mut body = json!({
            "model": model,
            "messages": self.messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(obj) = body.as_object_mut() {
            for (key, value) in &self.extra_params {
                obj.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        body
    }
}

/// Successful chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    /// Text of `choices[0].message.content`
    pub text: String,
    /// Full response body as returned by the upstream
    pub raw_response: Value,
    /// Name of the provider that answered
    pub provider: String,
    /// Attempts that provider needed
    pub attempts: u32,
}

/// Interface for all LLM providers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Display name, also used for `preferred_provider` matching
    fn name(&self) -> String;

    /// Generate a chat completion, applying the provider's own retry policy
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResult, LlmError>;

    /// Cheap reachability check used by health checks
    ///
    /// Default implementation sends a [`ChatRequest::ping`] through
    /// [`LlmProvider::chat_completion`].
    async fn probe(&self) -> Result<(), LlmError> {
        self.chat_completion(&ChatRequest::ping()).await.map(|_| ())
    }

    /// Release network resources. Must be idempotent.
    async fn close(&self) {}
}
