//! One upstream, one transport, one retry policy.
//!
//! Each attempt is classified into an [`AttemptOutcome`] and the retry loop
//! only ever looks at that classification, never at raw `reqwest` errors.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::http_utils::{self, CHAT_CONTENT_PATH};
use super::{ChatRequest, ChatResult, LlmError, LlmProvider};
use crate::config::ProviderConfig;

/// Upper bound for a server-supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Failure kinds that are worth another attempt
#[derive(Debug, Clone, PartialEq, Eq)]
enum RetryKind {
    /// 503, model still loading
    UpstreamBusy,
    /// 429 with an optional server hint
    RateLimited { wait_secs: Option<u64> },
    /// Timeout or connection failure
    Network(String),
}

impl RetryKind {
    fn delay(&self, config: &ProviderConfig) -> Duration {
        match self {
            Self::UpstreamBusy => config.retry_delay(),
            Self::RateLimited {
                wait_secs: Some(secs),
            } => Duration::from_secs(*secs).min(MAX_RETRY_AFTER),
            Self::RateLimited { wait_secs: None } => config.rate_limit_delay(),
            Self::Network(_) => config.network_retry_delay(),
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::UpstreamBusy => "busy_503",
            Self::RateLimited { .. } => "rate_limited_429",
            Self::Network(_) => "network_error",
        }
    }

    fn into_error(self, provider: &str) -> LlmError {
        let provider = provider.to_string();
        match self {
            Self::UpstreamBusy => LlmError::UpstreamBusy { provider },
            Self::RateLimited { wait_secs } => LlmError::RateLimited {
                provider,
                wait_secs,
            },
            Self::Network(message) => LlmError::TransientNetwork { provider, message },
        }
    }
}

/// Result of a single HTTP exchange
#[derive(Debug)]
enum AttemptOutcome {
    Success { text: String, raw: Value },
    Retryable(RetryKind),
    Hard(LlmError),
}

/// Chat-completion client for one OpenAI-compatible upstream
///
/// The HTTP transport is opened on first use and shared by every concurrent
/// caller; [`ProviderClient::close`] drops it and the next call reopens it.
pub struct ProviderClient {
    config: ProviderConfig,
    http: Mutex<Option<HttpClient>>,
}

impl ProviderClient {
    /// Create a new provider client. No connection is opened yet.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: Mutex::new(None),
        }
    }

    /// Configuration this client was built from
    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Whether the HTTP transport is currently open
    pub async fn is_open(&self) -> bool {
        self.http.lock().await.is_some()
    }

    async fn transport(&self) -> Result<HttpClient, LlmError> {
        let mut guard = self.http.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = http_utils::create_http_client(
            self.config.connect_timeout(),
            self.config.read_timeout(),
        )
        .map_err(|e| LlmError::Transport {
            provider: self.config.name().to_string(),
            message: e.to_string(),
        })?;

        debug!(
            provider = self.config.name(),
            connect_timeout_ms = self.config.connect_timeout().as_millis(),
            read_timeout_ms = self.config.read_timeout().as_millis(),
            "Opened HTTP transport"
        );
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn attempt(&self, client: &HttpClient, body: &Value) -> AttemptOutcome {
        let provider = self.config.name();

        let response = match client
            .post(self.config.chat_completions_url())
            .bearer_auth(self.config.api_key())
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return AttemptOutcome::Hard(LlmError::Transport {
                    provider: provider.to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => return AttemptOutcome::Retryable(RetryKind::Network(e.to_string())),
        };

        let status = response.status();

        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(raw) => match http_utils::extract_text_content(&raw, CHAT_CONTENT_PATH, provider)
                {
                    Ok(text) => AttemptOutcome::Success { text, raw },
                    Err(e) => AttemptOutcome::Hard(e),
                },
                Err(e) if e.is_decode() => AttemptOutcome::Hard(LlmError::ResponseShape {
                    provider: provider.to_string(),
                    detail: format!("invalid JSON body: {e}"),
                }),
                // Body read interrupted (timeout, reset)
                Err(e) => AttemptOutcome::Retryable(RetryKind::Network(e.to_string())),
            };
        }

        match status {
            StatusCode::SERVICE_UNAVAILABLE => AttemptOutcome::Retryable(RetryKind::UpstreamBusy),
            StatusCode::TOO_MANY_REQUESTS => AttemptOutcome::Retryable(RetryKind::RateLimited {
                wait_secs: http_utils::parse_retry_after(response.headers()),
            }),
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                AttemptOutcome::Hard(LlmError::HardUpstream {
                    provider: provider.to_string(),
                    status: status.as_u16(),
                    body: http_utils::clean_error_body(&error_text),
                })
            }
        }
    }
}

#[async_trait]
impl LlmProvider for ProviderClient {
    fn name(&self) -> String {
        self.config.name().to_string()
    }

    /// Chat completion with the provider's retry policy
    ///
    /// 503, 429 and network failures are retried up to
    /// `max_retry_attempts` times with the matching delay; any other
    /// failure returns immediately.
    ///
    /// # Errors
    ///
    /// `LlmError::ProviderExhausted` once the budget is spent, or the hard
    /// failure of the attempt that stopped the loop.
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResult, LlmError> {
        let provider = self.config.name();
        let max_attempts = self.config.max_retry_attempts();
        let client = self.transport().await?;
        let body = request.to_body(self.config.model());

        let mut last_failure: Option<RetryKind> = None;

        for attempt in 1..=max_attempts {
            let start = Instant::now();
            let outcome = self.attempt(&client, &body).await;
            let elapsed_ms = start.elapsed().as_millis();

            match outcome {
                AttemptOutcome::Success { text, raw } => {
                    info!(
                        provider,
                        model = self.config.model(),
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        outcome = "success",
                        "LLM attempt succeeded"
                    );
                    return Ok(ChatResult {
                        text,
                        raw_response: raw,
                        provider: provider.to_string(),
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Hard(error) => {
                    warn!(
                        provider,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        outcome = "hard_failure",
                        error = %error,
                        "LLM attempt failed, not retrying"
                    );
                    return Err(error);
                }
                AttemptOutcome::Retryable(kind) => {
                    warn!(
                        provider,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        outcome = kind.label(),
                        detail = ?kind,
                        "LLM attempt failed"
                    );

                    if attempt < max_attempts {
                        let backoff = kind.delay(&self.config);
                        info!(
                            provider,
                            backoff_ms = backoff.as_millis(),
                            next_attempt = attempt + 1,
                            max_attempts,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_failure = Some(kind);
                }
            }
        }

        let cause = match last_failure {
            Some(kind) => kind.into_error(provider),
            // max_retry_attempts is at least 1, so this is never reached
            None => LlmError::Transport {
                provider: provider.to_string(),
                message: "no attempts were made".to_string(),
            },
        };

        Err(LlmError::ProviderExhausted {
            provider: provider.to_string(),
            attempts: max_attempts,
            cause: Box::new(cause),
        })
    }

    /// One ping attempt without retries
    async fn probe(&self) -> Result<(), LlmError> {
        let client = self.transport().await?;
        let body = ChatRequest::ping().to_body(self.config.model());
        let start = Instant::now();

        let result = match self.attempt(&client, &body).await {
            AttemptOutcome::Success { .. } => Ok(()),
            AttemptOutcome::Retryable(kind) => Err(kind.into_error(self.config.name())),
            AttemptOutcome::Hard(error) => Err(error),
        };

        debug!(
            provider = self.config.name(),
            elapsed_ms = start.elapsed().as_millis(),
            healthy = result.is_ok(),
            "Health probe finished"
        );
        result
    }

    async fn close(&self) {
        if self.http.lock().await.take().is_some() {
            debug!(provider = self.config.name(), "HTTP transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Result<ProviderConfig, crate::config::ProviderConfigError> {
        Ok(ProviderConfig::new("Featherless", "key", "https://api.featherless.ai/v1", "m")?
            .with_retry_delay(Duration::from_secs(30))
            .with_rate_limit_delay(Duration::from_secs(5))
            .with_network_retry_delay(Duration::from_secs(2)))
    }

    #[test]
    fn test_retry_delays_per_kind() -> Result<(), crate::config::ProviderConfigError> {
        let config = config()?;

        assert_eq!(RetryKind::UpstreamBusy.delay(&config), Duration::from_secs(30));
        assert_eq!(
            RetryKind::RateLimited { wait_secs: None }.delay(&config),
            Duration::from_secs(5)
        );
        assert_eq!(
            RetryKind::RateLimited { wait_secs: Some(3) }.delay(&config),
            Duration::from_secs(3)
        );
        assert_eq!(
            RetryKind::RateLimited {
                wait_secs: Some(3600)
            }
            .delay(&config),
            MAX_RETRY_AFTER
        );
        assert_eq!(
            RetryKind::RateLimited {
                wait_secs: Some(u64::MAX)
            }
            .delay(&config),
            MAX_RETRY_AFTER
        );
        assert_eq!(
            RetryKind::Network("reset".into()).delay(&config),
            Duration::from_secs(2)
        );
        Ok(())
    }

    #[test]
    fn test_retry_kind_maps_to_error() {
        let err = RetryKind::RateLimited { wait_secs: Some(4) }.into_error("OpenAI");
        assert!(matches!(
            err,
            LlmError::RateLimited { ref provider, wait_secs: Some(4) } if provider == "OpenAI"
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_close_before_use_is_noop() -> Result<(), crate::config::ProviderConfigError> {
        let client = ProviderClient::new(config()?);
        assert!(!client.is_open().await);

        client.close().await;
        client.close().await;

        assert!(!client.is_open().await);
        Ok(())
    }
}
