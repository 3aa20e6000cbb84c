//! Multi-provider LLM service with deterministic fallback.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::conversation::build_conversation;
use super::http_utils::{extract_text_content, CHAT_CONTENT_PATH};
use super::{
    ChatParams, ChatRequest, ChatResult, LlmError, LlmProvider, Message, ProviderClient,
    ProviderFailure,
};
use crate::config::ProviderConfig;

/// Unified entry point for every LLM request the bot makes
///
/// Build it once in the composition root and share it behind an `Arc`.
/// Providers are tried one at a time in priority order; the first success
/// wins and the chain is never walked twice for one call.
pub struct LlmService {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl LlmService {
    /// Create the service from priority-ordered configs.
    ///
    /// Disabled providers are skipped and never constructed.
    #[must_use]
    pub fn new(configs: &[ProviderConfig]) -> Self {
        let providers = configs
            .iter()
            .filter(|config| config.enabled())
            .map(|config| {
                info!(
                    provider = config.name(),
                    model = config.model(),
                    read_timeout_secs = config.read_timeout().as_secs(),
                    max_attempts = config.max_retry_attempts(),
                    "Registered LLM provider"
                );
                Arc::new(ProviderClient::new(config.clone())) as Arc<dyn LlmProvider>
            })
            .collect();

        Self::from_providers(providers)
    }

    /// Create the service from ready-made providers, kept in the given order
    ///
    /// Names identify providers in `preferred_provider` and in
    /// [`LlmService::health_check`], so a provider whose name repeats an
    /// earlier one (case-insensitive) is dropped.
    #[must_use]
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        let mut unique: Vec<Arc<dyn LlmProvider>> = Vec::with_capacity(providers.len());
        for provider in providers {
            let name = provider.name();
            if unique.iter().any(|p| p.name().eq_ignore_ascii_case(&name)) {
                error!(provider = %name, "Duplicate LLM provider name, ignoring it");
                continue;
            }
            unique.push(provider);
        }

        let service = Self { providers: unique };
        if service.providers.is_empty() {
            error!("No LLM provider is configured, every request will fail");
        } else {
            info!(
                order = %service.provider_names().join(" → "),
                "LLM providers (priority)"
            );
        }
        service
    }

    /// Provider names in configured priority order
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Returns true if no provider is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn attempt_order(&self, preferred: Option<&str>) -> Vec<&Arc<dyn LlmProvider>> {
        let mut order: Vec<&Arc<dyn LlmProvider>> = self.providers.iter().collect();

        if let Some(preferred) = preferred {
            match order
                .iter()
                .position(|p| p.name().eq_ignore_ascii_case(preferred))
            {
                Some(index) => {
                    let provider = order.remove(index);
                    order.insert(0, provider);
                }
                None => debug!(
                    preferred,
                    "Preferred provider is not configured, using default order"
                ),
            }
        }

        order
    }

    /// Perform a chat completion with automatic fallback
    ///
    /// If `preferred_provider` names a configured provider (case-insensitive)
    /// it is tried first; the others keep their relative order.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::AllProvidersFailed` with one entry per attempted
    /// provider, in attempt order, when nobody produced a result.
    #[instrument(
        skip_all,
        fields(request_id = %Uuid::new_v4(), messages = messages.len(), preferred = ?preferred_provider)
    )]
    pub async fn chat_completion(
        &self,
        messages: Vec<Message>,
        params: &ChatParams,
        preferred_provider: Option<&str>,
    ) -> Result<ChatResult, LlmError> {
        let request = ChatRequest::new(messages, params);
        let mut failures = Vec::new();

        for provider in self.attempt_order(preferred_provider) {
            let name = provider.name();
            match provider.chat_completion(&request).await {
                Ok(result) => {
                    if !failures.is_empty() {
                        info!(
                            provider = %name,
                            failed_before = failures.len(),
                            "LLM fallback provider succeeded"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        provider = %name,
                        error = %e,
                        "LLM provider failed, switching to the next one"
                    );
                    failures.push(ProviderFailure::new(&name, &e));
                }
            }
        }

        error!(attempted = failures.len(), "All LLM providers failed");
        Err(LlmError::AllProvidersFailed { failures })
    }

    /// Text in, text out
    ///
    /// Sends `[system, user]` and returns `choices[0].message.content`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::AllProvidersFailed` if no provider answered, or
    /// `LlmError::ResponseShape` if the answer lacks the expected content.
    pub async fn chat(
        &self,
        user_message: &str,
        system_prompt: &str,
        params: &ChatParams,
    ) -> Result<String, LlmError> {
        let messages = build_conversation(system_prompt, &[], user_message);
        let result = self.chat_completion(messages, params, None).await?;

        extract_text_content(&result.raw_response, CHAT_CONTENT_PATH, &result.provider).map_err(
            |e| {
                error!(provider = %result.provider, error = %e, "Unexpected LLM response format");
                e
            },
        )
    }

    /// Probe every provider independently
    ///
    /// Diagnostics only; the result never influences routing.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let probes = self.providers.iter().map(|provider| async move {
            let name = provider.name();
            let healthy = match provider.probe().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(provider = %name, error = %e, "LLM provider health check failed");
                    false
                }
            };
            (name, healthy)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Close every provider's transport. Safe to call more than once.
    pub async fn close(&self) {
        for provider in &self.providers {
            provider.close().await;
        }
        info!("All LLM clients closed");
    }
}
