//! Error types shared across the crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ThrottlrError>;

#[derive(Debug, Error)]
pub enum ThrottlrError {
    /// Invalid construction-time configuration. Fails fast, never recovered.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("a throttler named '{0}' is already registered")]
    DuplicateThrottler(String),

    #[error("no throttler registered under the name '{0}'")]
    UnknownThrottler(String),

    /// A rule's key regex failed to compile.
    #[error("invalid rule pattern '{pattern}': {source}")]
    RulePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Remote store failure. The decide path recovers from these via the
    /// local cache; they only surface through explicit store calls.
    #[error("store error: {0}")]
    Store(String),

    #[error("malformed window payload: {0}")]
    MalformedWindow(#[from] serde_json::Error),

    #[error("window payload is empty")]
    EmptyWindowPayload,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for ThrottlrError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlrError::Store(err.to_string())
    }
}
