//! Logging setup
//!
//! Every formatted line passes through [`RedactionPatterns`] before it
//! reaches stderr, so API keys never end up in the logs.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    bearer: Regex,
    env_key: Regex,
    openai_key: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bearer: Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+")?,
            env_key: Regex::new(r"((?:FEATHERLESS|PERPLEXITY|OPENAI)_API_KEY=)[^\s&]+")?,
            openai_key: Regex::new(r"\b(sk|pplx|rc)-[A-Za-z0-9_-]{8,}")?,
        })
    }

    /// Mask every secret found in `input`
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let output = self.bearer.replace_all(input, "${1}[MASKED]");
        let output = self.env_key.replace_all(&output, "${1}[MASKED]");
        let output = self.openai_key.replace_all(&output, "${1}-[MASKED]");
        output.into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`),
/// redacting writer on stderr.
///
/// # Errors
///
/// Returns an error if the redaction patterns fail to compile.
pub fn init_logging() -> Result<(), regex::Error> {
    let patterns = Arc::new(RedactionPatterns::new()?);
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
    Ok(())
}
