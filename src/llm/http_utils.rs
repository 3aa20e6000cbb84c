//! HTTP utilities for LLM providers
//!
//! Transport construction and response inspection shared by every
//! OpenAI-compatible provider.

use crate::llm::LlmError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;

/// Path of the generated text inside a chat-completion body
pub const CHAT_CONTENT_PATH: &[&str] = &["choices", "0", "message", "content"];

/// Error bodies longer than this are truncated before logging.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client with separate connect and read timeouts.
///
/// The read timeout bounds each wait for response bytes, so a model that
/// is slow to start streaming still fails instead of hanging forever.
///
/// # Errors
///
/// Returns the `reqwest` error if the TLS backend cannot be initialised.
pub fn create_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<HttpClient, reqwest::Error> {
    HttpClient::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
}

/// Makes an upstream error body safe to carry in an error message.
///
/// HTML error pages from Nginx/proxies are replaced with a marker and long
/// bodies are cut at a char boundary.
#[must_use]
pub fn clean_error_body(error_text: &str) -> String {
    let trimmed = error_text.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        return "(server returned HTML error page)".to_string();
    }

    if error_text.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = error_text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{truncated}... (truncated)")
    } else {
        error_text.to_string()
    }
}

/// Reads a `Retry-After` hint expressed in delta-seconds.
///
/// Fractional values are rounded up and values beyond `u64` saturate.
/// HTTP-date values are ignored and the caller falls back to its default
/// delay.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs.ceil()).map_or(u64::MAX, |d| d.as_secs()))
}

/// Extracts text content from a JSON response by navigating a path.
///
/// # Example
/// ```ignore
/// let content = extract_text_content(&response, CHAT_CONTENT_PATH, "OpenAI")?;
/// ```
///
/// # Errors
///
/// Returns `LlmError::ResponseShape` if the path is invalid or the target is not a string.
pub fn extract_text_content(
    response: &Value,
    path: &[&str],
    provider: &str,
) -> Result<String, LlmError> {
    let shape_error = |detail: String| LlmError::ResponseShape {
        provider: provider.to_string(),
        detail,
    };
    let mut current = response;

    for segment in path {
        // Try to parse as index first
        if let Ok(index) = segment.parse::<usize>() {
            current = current
                .get(index)
                .ok_or_else(|| shape_error(format!("missing index {index}")))?;
        } else {
            current = current
                .get(*segment)
                .ok_or_else(|| shape_error(format!("missing key {segment}")))?;
        }
    }

    current
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| shape_error(format!("expected string at path, got: {current}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn headers_with_retry_after(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(parse_retry_after(&headers_with_retry_after("7")), Some(7));
        assert_eq!(parse_retry_after(&headers_with_retry_after(" 0 ")), Some(0));
        assert_eq!(parse_retry_after(&headers_with_retry_after("1.5")), Some(2));
        assert_eq!(
            parse_retry_after(&headers_with_retry_after("Wed, 21 Oct 2015 07:28:00 GMT")),
            None
        );
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_retry_after_out_of_range_saturates() {
        assert_eq!(
            parse_retry_after(&headers_with_retry_after("1e30")),
            Some(u64::MAX)
        );
        assert_eq!(
            parse_retry_after(&headers_with_retry_after("18446744073709551616")),
            Some(u64::MAX)
        );
        assert_eq!(parse_retry_after(&headers_with_retry_after("NaN")), None);
        assert_eq!(parse_retry_after(&headers_with_retry_after("-3")), None);
    }

    #[test]
    fn test_clean_error_body() {
        assert_eq!(clean_error_body("bad request"), "bad request");
        assert_eq!(
            clean_error_body("  <!DOCTYPE html><p>502</p>"),
            "(server returned HTML error page)"
        );

        let long = "я".repeat(600);
        let cleaned = clean_error_body(&long);
        assert!(cleaned.ends_with("... (truncated)"));
        assert_eq!(cleaned.chars().filter(|c| *c == 'я').count(), 500);
    }

    #[test]
    fn test_extract_text_content() -> Result<(), LlmError> {
        let body = json!({"id": "x", "choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(extract_text_content(&body, CHAT_CONTENT_PATH, "A")?, "hello");

        let empty = json!({"choices": []});
        let err = extract_text_content(&empty, CHAT_CONTENT_PATH, "A");
        assert!(matches!(err, Err(LlmError::ResponseShape { ref detail, .. }) if detail == "missing index 0"));

        let null_content = json!({"choices": [{"message": {"content": null}}]});
        assert!(extract_text_content(&null_content, CHAT_CONTENT_PATH, "A").is_err());
        Ok(())
    }
}
