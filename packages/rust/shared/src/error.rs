//! Error types for PageWatch.
//!
//! Library crates use [`PageWatchError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PageWatch operations.
#[derive(Debug, thiserror::Error)]
pub enum PageWatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network failure during content retrieval (retryable).
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// Content permanently unavailable (HTTP 4xx, missing snapshot, etc.).
    /// Not retried; resolved into a Failed run.
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    /// HTML parsing or facet extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error. Handlers must not acknowledge a
    /// message on this variant: nothing durable changed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A run's absolute deadline has passed.
    #[error("run timed out: deadline {deadline} exceeded")]
    RunTimeout { deadline: chrono::DateTime<chrono::Utc> },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed message, invalid version, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PageWatchError>;

impl PageWatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a failed message delivery should be retried (bounded) rather
    /// than converted into a terminal Failed run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PageWatchError::config("missing data dir");
        assert_eq!(err.to_string(), "config error: missing data dir");

        let err = PageWatchError::validation("version must be positive");
        assert!(err.to_string().contains("version must be positive"));
    }

    #[test]
    fn transient_classification() {
        assert!(PageWatchError::TransientFetch("connect refused".into()).is_transient());
        assert!(PageWatchError::Storage("disk full".into()).is_transient());
        assert!(!PageWatchError::ContentUnavailable("HTTP 404".into()).is_transient());
        assert!(!PageWatchError::parse("no body").is_transient());
    }
}
