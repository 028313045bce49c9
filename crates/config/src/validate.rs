//! Configuration validation.
//!
//! Checks a loaded [`MediarelayConfig`] for values that would make the relay
//! misbehave at runtime and reports them as diagnostics.

use crate::schema::MediarelayConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "delivery.api_url"
    pub path: &'static str,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

/// Validate a loaded configuration.
pub fn validate(config: &MediarelayConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let api_url = config.delivery.api_url.trim();
    if api_url.is_empty() {
        result.push(Severity::Error, "delivery.api_url", "must not be empty");
    } else {
        match url::Url::parse(api_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {},
            Ok(url) => result.push(
                Severity::Error,
                "delivery.api_url",
                format!("unsupported scheme `{}`, expected http or https", url.scheme()),
            ),
            Err(e) => result.push(
                Severity::Error,
                "delivery.api_url",
                format!("not a valid URL: {e}"),
            ),
        }
    }

    if config.delivery.timeout_secs == 0 {
        result.push(Severity::Error, "delivery.timeout_secs", "must be at least 1");
    }

    if config.session.reconnect_delay_secs == 0 {
        result.push(
            Severity::Error,
            "session.reconnect_delay_secs",
            "must be at least 1",
        );
    }

    if config.session.request_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "session.request_timeout_secs",
            "must be at least 1",
        );
    }

    if config.pipeline.dedupe_redelivered && config.pipeline.dedupe_capacity == 0 {
        result.push(
            Severity::Warning,
            "pipeline.dedupe_capacity",
            "is 0, re-delivered messages will not be suppressed",
        );
    }

    result
}
