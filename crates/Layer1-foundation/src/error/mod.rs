//! Error types for Toolgate
//!
//! All errors are managed centrally here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Toolgate error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Cache
    // ========================================================================
    /// Expected signal: the entry was not cached and computing it was forbidden.
    #[error("Cache miss in offline-only mode for key={key_prefix}… (cache={})", .cache_dir.display())]
    OfflineMiss {
        key_prefix: String,
        cache_dir: PathBuf,
    },

    // ========================================================================
    // Storage / locking
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("File locking unavailable: {0}")]
    LockUnavailable(String),

    // ========================================================================
    // Wrapped tool calls
    // ========================================================================
    #[error("Call to {function} failed: {source}")]
    Call {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    // ========================================================================
    // General
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is the offline-only cache miss signal
    pub fn is_offline_miss(&self) -> bool {
        matches!(self, Error::OfflineMiss { .. })
    }

    /// Whether a retry layer may try the call again.
    ///
    /// Only failures of the wrapped function itself qualify; cache and
    /// limiter errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Call { .. })
    }

    /// Build an offline-only miss for a key, keeping only a short key prefix
    pub fn offline_miss(key: &str, cache_dir: impl Into<PathBuf>) -> Self {
        Error::OfflineMiss {
            key_prefix: key.chars().take(10).collect(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Wrap an error raised by a tool function
    pub fn call(function: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Call {
            function: function.into(),
            source,
        }
    }

    /// The source error of a failed tool call, if this is one
    pub fn call_source(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Call { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ============================================================================
// Additional From conversions
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_miss_message() {
        let err = Error::offline_miss("0123456789abcdef", "/tmp/cache/chembl");
        assert!(err.is_offline_miss());
        let msg = err.to_string();
        assert!(msg.contains("Cache miss in offline-only mode"));
        assert!(msg.contains("key=0123456789…"));
        assert!(msg.contains("/tmp/cache/chembl"));
    }

    #[test]
    fn test_only_call_errors_are_retryable() {
        let call = Error::call("mod::search", anyhow::anyhow!("503"));
        assert!(call.is_retryable());
        assert_eq!(call.call_source().map(|e| e.to_string()), Some("503".into()));

        assert!(!Error::Storage("disk".into()).is_retryable());
        assert!(!Error::offline_miss("k", "/d").is_retryable());
    }
}
