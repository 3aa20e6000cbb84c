#![deny(missing_docs)]
//! `MysticBot` LLM layer.
//!
//! Multi-provider chat-completion client used by the bot's consultation
//! modules, plus the configuration and logging it needs at startup.

/// Configuration management.
pub mod config;
/// LLM providers, retries and fallback orchestration.
pub mod llm;
/// Logging setup with secret redaction.
pub mod logging;
