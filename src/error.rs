use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds surfaced by the pipeline. Region and unit level kinds are
/// recovered locally; only `Fatal` aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("translation failed: {0}")]
    Translation(String),
    #[error("no font available for script {0}")]
    FontUnavailable(String),
    #[error("render skipped: {0}")]
    RenderSkipped(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ErrorKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Fatal(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Recognition(_) => "recognition_error",
            ErrorKind::Translation(_) => "translation_error",
            ErrorKind::FontUnavailable(_) => "font_unavailable",
            ErrorKind::RenderSkipped(_) => "render_skipped",
            ErrorKind::UnsupportedFormat(_) => "unsupported_format",
            ErrorKind::Fatal(_) => "fatal_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, throttling, 5xx. Retried with backoff.
    Transient,
    /// Anything a retry cannot fix. Goes straight to the next tier.
    Permanent,
}

/// Error reported by a translation engine call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub class: ErrorClass,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl EngineError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::transient(format!("timed out after {}ms", after.as_millis()))
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            EngineError::transient(err.to_string())
        } else {
            EngineError::permanent(err.to_string())
        }
    }
}
