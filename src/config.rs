//! Configuration and settings management
//!
//! Loads provider credentials and tuning from config files and environment
//! variables, and resolves them once into validated [`ProviderConfig`]s.

use config::{Config, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Connect timeout applied to every provider unless overridden
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Fallback wait after a 429 without a `Retry-After` header
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);
/// Wait after a timeout or connection failure
pub const DEFAULT_NETWORK_RETRY_DELAY: Duration = Duration::from_secs(5);
/// API keys shorter than this are reported as suspicious
const MIN_API_KEY_LEN: usize = 20;

/// Built-in defaults for a known upstream
#[derive(Debug, Clone, Copy)]
pub struct ProviderPreset {
    /// Lower-case identifier used in env keys and `LLM_PROVIDERS`
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Default API base URL (without `/chat/completions`)
    pub base_url: &'static str,
    /// Default model identifier
    pub model: &'static str,
    /// Default read timeout in seconds
    pub read_timeout_secs: u64,
    /// Default retry budget
    pub max_retries: u32,
    /// Default pause between 503 retries, in seconds
    pub retry_delay_secs: f64,
}

/// Known providers in default priority order
pub const PROVIDER_PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        id: "featherless",
        name: "Featherless",
        base_url: "https://api.featherless.ai/v1",
        model: "zai-org/GLM-4.7-Flash",
        // Cold starts of large models regularly take minutes
        read_timeout_secs: 120,
        max_retries: 3,
        retry_delay_secs: 30.0,
    },
    ProviderPreset {
        id: "perplexity",
        name: "Perplexity",
        base_url: "https://api.perplexity.ai",
        model: "sonar-pro",
        read_timeout_secs: 60,
        max_retries: 2,
        retry_delay_secs: 5.0,
    },
    ProviderPreset {
        id: "openai",
        name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        model: "gpt-4o-mini",
        read_timeout_secs: 60,
        max_retries: 2,
        retry_delay_secs: 5.0,
    },
];

/// Errors raised while building a [`ProviderConfig`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderConfigError {
    /// Provider name is empty
    #[error("provider name must not be empty")]
    EmptyName,
    /// Base URL is not an absolute http(s) URL
    #[error("{provider}: base URL '{url}' must be an absolute http:// or https:// URL")]
    InvalidBaseUrl {
        /// Provider name
        provider: String,
        /// Offending URL
        url: String,
    },
}

/// Canonical, validated configuration of one upstream
///
/// Immutable once built; construct with [`ProviderConfig::new`] and the
/// `with_*` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_retry_attempts: u32,
    retry_delay: Duration,
    rate_limit_delay: Duration,
    network_retry_delay: Duration,
    enabled: bool,
}

impl ProviderConfig {
    /// Create a provider config with default timeouts and retry budget.
    ///
    /// The provider is enabled iff `api_key` is non-empty. Trailing slashes
    /// are stripped from `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderConfigError` if the name is empty or the URL is not http(s).
    pub fn new(
        name: &str,
        api_key: &str,
        base_url: &str,
        model: &str,
    ) -> Result<Self, ProviderConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProviderConfigError::EmptyName);
        }

        let base_url = base_url.trim().trim_end_matches('/');
        let valid = Url::parse(base_url)
            .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
            .unwrap_or(false);
        if !valid {
            return Err(ProviderConfigError::InvalidBaseUrl {
                provider: name.to_string(),
                url: base_url.to_string(),
            });
        }

        let api_key = api_key.trim();
        Ok(Self {
            name: name.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            model: model.trim().to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(60),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            network_retry_delay: DEFAULT_NETWORK_RETRY_DELAY,
            enabled: !api_key.is_empty(),
        })
    }

    /// Set connect and read timeouts
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Set the retry budget. At least one attempt is always made.
    #[must_use]
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    /// Set the pause between 503 retries
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the wait after a 429 that carries no `Retry-After`
    #[must_use]
    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Set the wait after a timeout or connection failure
    #[must_use]
    pub fn with_network_retry_delay(mut self, delay: Duration) -> Self {
        self.network_retry_delay = delay;
        self
    }

    /// Force the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bearer credential
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// API base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full chat-completions endpoint
    #[must_use]
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// TCP/TLS connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Per-read timeout
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Maximum attempts before the provider is exhausted
    #[must_use]
    pub const fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    /// Pause between 503 retries
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Default wait after a 429
    #[must_use]
    pub const fn rate_limit_delay(&self) -> Duration {
        self.rate_limit_delay
    }

    /// Wait after a network failure
    #[must_use]
    pub const fn network_retry_delay(&self) -> Duration {
        self.network_retry_delay
    }

    /// Whether the provider takes part in the fallback chain
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Raw per-provider values as found in config sources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    /// Preset this entry overrides
    pub preset: &'static str,
    /// API key; empty or missing disables the provider
    pub api_key: Option<String>,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Read timeout override, seconds
    pub timeout_secs: Option<u64>,
    /// Retry budget override
    pub max_retries: Option<u32>,
    /// 503 retry delay override, seconds
    pub retry_delay_secs: Option<f64>,
}

/// Flat view of every key we read. Field names match the snake-cased env vars.
#[derive(Debug, Deserialize, Default)]
struct RawSettings {
    featherless_api_key: Option<String>,
    featherless_base_url: Option<String>,
    /// Legacy name of `featherless_base_url`
    featherless_endpoint: Option<String>,
    featherless_model: Option<String>,
    featherless_timeout: Option<u64>,
    featherless_max_retries: Option<u32>,
    featherless_retry_delay: Option<f64>,

    perplexity_api_key: Option<String>,
    perplexity_base_url: Option<String>,
    perplexity_model: Option<String>,
    perplexity_timeout: Option<u64>,
    perplexity_max_retries: Option<u32>,
    perplexity_retry_delay: Option<f64>,

    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    openai_model: Option<String>,
    openai_timeout: Option<u64>,
    openai_max_retries: Option<u32>,
    openai_retry_delay: Option<f64>,

    llm_connect_timeout_secs: Option<u64>,
    llm_providers: Option<String>,
}

/// Application settings loaded from config files and environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// One entry per preset, in [`PROVIDER_PRESETS`] order
    pub providers: Vec<ProviderSettings>,
    /// Connect timeout for every provider, seconds
    pub connect_timeout_secs: u64,
    /// Optional comma-separated priority override (`LLM_PROVIDERS`)
    pub provider_priority: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mysticbot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            // Eg.. `APP__OPENAI_MODEL=gpt-4o ./target/app` would set `openai_model`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain env vars; Environment::default() lowercases the keys
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        Self::from_config(&s)
    }

    /// Build settings from an already assembled [`Config`].
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a value has the wrong type.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = config.clone().try_deserialize()?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSettings) -> Self {
        // The canonical key wins over the legacy alias
        let featherless_base_url = non_empty(raw.featherless_base_url)
            .or_else(|| non_empty(raw.featherless_endpoint));

        let providers = vec![
            ProviderSettings {
                preset: "featherless",
                api_key: non_empty(raw.featherless_api_key),
                base_url: featherless_base_url,
                model: non_empty(raw.featherless_model),
                timeout_secs: raw.featherless_timeout,
                max_retries: raw.featherless_max_retries,
                retry_delay_secs: raw.featherless_retry_delay,
            },
            ProviderSettings {
                preset: "perplexity",
                api_key: non_empty(raw.perplexity_api_key),
                base_url: non_empty(raw.perplexity_base_url),
                model: non_empty(raw.perplexity_model),
                timeout_secs: raw.perplexity_timeout,
                max_retries: raw.perplexity_max_retries,
                retry_delay_secs: raw.perplexity_retry_delay,
            },
            ProviderSettings {
                preset: "openai",
                api_key: non_empty(raw.openai_api_key),
                base_url: non_empty(raw.openai_base_url),
                model: non_empty(raw.openai_model),
                timeout_secs: raw.openai_timeout,
                max_retries: raw.openai_max_retries,
                retry_delay_secs: raw.openai_retry_delay,
            },
        ];

        Self {
            providers,
            connect_timeout_secs: raw
                .llm_connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            provider_priority: non_empty(raw.llm_providers),
        }
    }

    /// Preset ids in effective priority order.
    ///
    /// Providers listed in `LLM_PROVIDERS` come first, in the listed order;
    /// the rest keep their default relative order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` for an unknown provider name.
    pub fn priority_order(&self) -> Result<Vec<&'static str>, ConfigError> {
        let mut order: Vec<&'static str> = Vec::with_capacity(PROVIDER_PRESETS.len());

        if let Some(list) = &self.provider_priority {
            for token in list
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|token| !token.is_empty())
            {
                let preset = PROVIDER_PRESETS
                    .iter()
                    .find(|p| p.id.eq_ignore_ascii_case(token))
                    .ok_or_else(|| {
                        ConfigError::Message(format!("LLM_PROVIDERS: unknown provider '{token}'"))
                    })?;
                if !order.contains(&preset.id) {
                    order.push(preset.id);
                }
            }
        }

        for preset in PROVIDER_PRESETS {
            if !order.contains(&preset.id) {
                order.push(preset.id);
            }
        }

        Ok(order)
    }

    /// Resolve every known provider into a validated [`ProviderConfig`],
    /// in priority order. Providers without an API key are included with
    /// `enabled = false`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for an unknown priority entry, an invalid base
    /// URL or a retry delay that is negative, NaN or out of range.
    pub fn provider_configs(&self) -> Result<Vec<ProviderConfig>, ConfigError> {
        let connect_timeout = Duration::from_secs(self.connect_timeout_secs);

        self.priority_order()?
            .into_iter()
            .map(|id| {
                let preset = preset(id)?;
                let raw = self.provider_settings(id);

                let config = ProviderConfig::new(
                    preset.name,
                    raw.and_then(|r| r.api_key.as_deref()).unwrap_or_default(),
                    raw.and_then(|r| r.base_url.as_deref())
                        .unwrap_or(preset.base_url),
                    raw.and_then(|r| r.model.as_deref()).unwrap_or(preset.model),
                )
                .map_err(|e| ConfigError::Message(e.to_string()))?;

                let read_timeout = raw
                    .and_then(|r| r.timeout_secs)
                    .unwrap_or(preset.read_timeout_secs);
                let retry_delay = match raw.and_then(|r| r.retry_delay_secs) {
                    Some(secs) => Duration::try_from_secs_f64(secs).map_err(|e| {
                        ConfigError::Message(format!(
                            "{}_RETRY_DELAY={secs}: {e}",
                            preset.id.to_uppercase()
                        ))
                    })?,
                    None => Duration::from_secs_f64(preset.retry_delay_secs),
                };

                Ok(config
                    .with_timeouts(connect_timeout, Duration::from_secs(read_timeout))
                    .with_max_retry_attempts(
                        raw.and_then(|r| r.max_retries)
                            .unwrap_or(preset.max_retries),
                    )
                    .with_retry_delay(retry_delay))
            })
            .collect()
    }

    /// Ids of providers that have credentials, in priority order
    #[must_use]
    pub fn llm_providers_order(&self) -> Vec<&'static str> {
        self.priority_order()
            .unwrap_or_else(|_| PROVIDER_PRESETS.iter().map(|p| p.id).collect())
            .into_iter()
            .filter(|id| {
                self.provider_settings(id)
                    .is_some_and(|p| p.api_key.is_some())
            })
            .collect()
    }

    /// Suspicious but non-fatal configuration values
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for raw in &self.providers {
            let Some(key) = &raw.api_key else {
                continue;
            };
            let env_prefix = raw.preset.to_uppercase();

            if key.len() < MIN_API_KEY_LEN {
                warnings.push(format!("{env_prefix}_API_KEY looks too short"));
            }

            if raw.preset == "featherless" {
                if let Some(url) = &raw.base_url {
                    if !url.trim_end_matches('/').ends_with("/v1") {
                        warnings.push(format!(
                            "FEATHERLESS_BASE_URL='{url}' does not end with /v1 \
                             (expected e.g. https://api.featherless.ai/v1)"
                        ));
                    }
                }
                if let Some(model) = &raw.model {
                    if !model.contains('/') {
                        warnings.push(format!(
                            "FEATHERLESS_MODEL='{model}' is not in HuggingFace owner/name format \
                             (e.g. zai-org/GLM-4.7-Flash)"
                        ));
                    }
                }
            }
        }

        warnings
    }

    fn provider_settings(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.preset == id)
    }
}

fn preset(id: &str) -> Result<&'static ProviderPreset, ConfigError> {
    PROVIDER_PRESETS
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| ConfigError::Message(format!("unknown provider preset '{id}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value)?;
        }
        Settings::from_config(&builder.build()?)
    }

    const LONG_KEY: &str = "fl-0123456789abcdefghijklmnop";

    #[test]
    fn test_no_keys_disables_everything() -> Result<(), ConfigError> {
        let settings = settings_from(&[])?;
        let configs = settings.provider_configs()?;

        assert_eq!(configs.len(), 3);
        assert!(configs.iter().all(|c| !c.enabled()));
        assert!(settings.llm_providers_order().is_empty());
        assert!(settings.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn test_presets_apply_defaults() -> Result<(), ConfigError> {
        let settings = settings_from(&[
            ("featherless_api_key", LONG_KEY),
            ("openai_api_key", "sk-0123456789abcdefghijkl"),
        ])?;
        let configs = settings.provider_configs()?;

        let names: Vec<&str> = configs.iter().map(ProviderConfig::name).collect();
        assert_eq!(names, vec!["Featherless", "Perplexity", "OpenAI"]);

        let featherless = &configs[0];
        assert!(featherless.enabled());
        assert_eq!(featherless.base_url(), "https://api.featherless.ai/v1");
        assert_eq!(featherless.model(), "zai-org/GLM-4.7-Flash");
        assert_eq!(featherless.read_timeout(), Duration::from_secs(120));
        assert_eq!(featherless.connect_timeout(), Duration::from_secs(10));
        assert_eq!(featherless.max_retry_attempts(), 3);
        assert_eq!(featherless.retry_delay(), Duration::from_secs(30));

        assert!(!configs[1].enabled());
        assert_eq!(configs[2].max_retry_attempts(), 2);
        assert_eq!(settings.llm_providers_order(), vec!["featherless", "openai"]);
        Ok(())
    }

    #[test]
    fn test_legacy_endpoint_alias() -> Result<(), ConfigError> {
        let legacy = settings_from(&[
            ("featherless_api_key", LONG_KEY),
            ("featherless_endpoint", "https://legacy.example.com/v1/"),
        ])?;
        assert_eq!(
            legacy.provider_configs()?[0].base_url(),
            "https://legacy.example.com/v1"
        );

        let both = settings_from(&[
            ("featherless_api_key", LONG_KEY),
            ("featherless_endpoint", "https://legacy.example.com/v1"),
            ("featherless_base_url", "https://canonical.example.com/v1"),
        ])?;
        assert_eq!(
            both.provider_configs()?[0].chat_completions_url(),
            "https://canonical.example.com/v1/chat/completions"
        );
        Ok(())
    }

    #[test]
    fn test_priority_override() -> Result<(), ConfigError> {
        let settings = settings_from(&[("llm_providers", "OpenAI, featherless")])?;
        assert_eq!(
            settings.priority_order()?,
            vec!["openai", "featherless", "perplexity"]
        );

        let unknown = settings_from(&[("llm_providers", "openai,gigachat")])?;
        assert!(unknown.priority_order().is_err());
        assert!(unknown.provider_configs().is_err());
        Ok(())
    }

    #[test]
    fn test_numeric_overrides() -> Result<(), ConfigError> {
        let settings = settings_from(&[
            ("perplexity_api_key", "pplx-0123456789abcdefghijkl"),
            ("perplexity_timeout", "15"),
            ("perplexity_max_retries", "0"),
            ("perplexity_retry_delay", "0.5"),
            ("llm_connect_timeout_secs", "3"),
        ])?;
        let perplexity = &settings.provider_configs()?[1];

        assert_eq!(perplexity.read_timeout(), Duration::from_secs(15));
        assert_eq!(perplexity.connect_timeout(), Duration::from_secs(3));
        assert_eq!(perplexity.max_retry_attempts(), 1);
        assert_eq!(perplexity.retry_delay(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn test_out_of_range_retry_delay_is_rejected() -> Result<(), ConfigError> {
        for value in ["1e30", "-1"] {
            let settings = settings_from(&[
                ("featherless_api_key", LONG_KEY),
                ("featherless_retry_delay", value),
            ])?;
            match settings.provider_configs() {
                Err(ConfigError::Message(msg)) => {
                    assert!(msg.starts_with("FEATHERLESS_RETRY_DELAY="), "{msg}");
                }
                other => panic!("expected a config error for {value}, got {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn test_invalid_base_url_is_rejected() -> Result<(), ConfigError> {
        let settings = settings_from(&[
            ("openai_api_key", "sk-0123456789abcdefghijkl"),
            ("openai_base_url", "api.openai.com/v1"),
        ])?;
        assert!(settings.provider_configs().is_err());

        assert_eq!(
            ProviderConfig::new("  ", "k", "https://x.test", "m"),
            Err(ProviderConfigError::EmptyName)
        );
        Ok(())
    }

    #[test]
    fn test_warnings() -> Result<(), ConfigError> {
        let settings = settings_from(&[
            ("featherless_api_key", "short"),
            ("featherless_base_url", "https://api.featherless.ai"),
            ("featherless_model", "glm-4"),
        ])?;
        let warnings = settings.warnings();

        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("FEATHERLESS_API_KEY"));
        assert!(warnings[1].contains("/v1"));
        assert!(warnings[2].contains("HuggingFace"));
        Ok(())
    }
}
