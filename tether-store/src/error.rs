//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error.
    #[error("Pool error: {0}")]
    Pool(String),

    /// Command error.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error.
    #[error("Operation timed out")]
    Timeout,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Value could not be converted from its stored text.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// A scan page could not be fetched.
    #[error("Scan error: {0}")]
    Scan(String),

    /// Simulated outage of an in-process store.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout | Self::Pool(_) | Self::Unavailable(_)
        ) || matches!(self, Self::Redis(e) if e.is_io_error() || e.is_timeout())
    }

    /// Check if this error indicates connection loss.
    ///
    /// A pooled connection that produced such an error is discarded
    /// instead of being returned to the pool.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            Self::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            _ => false,
        }
    }
}

impl<E> From<bb8::RunError<E>> for StoreError
where
    E: std::error::Error + 'static,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::TimedOut => Self::Timeout,
            bb8::RunError::User(e) => Self::Pool(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A stored value that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot decode {kind} from {raw:?}: {reason}")]
pub struct ConvertError {
    /// What the converter was trying to produce.
    pub kind: &'static str,
    /// The text found in the store.
    pub raw: String,
    /// Why decoding failed.
    pub reason: String,
}

impl ConvertError {
    /// Create a new decode error.
    pub fn new(kind: &'static str, raw: &str, reason: impl ToString) -> Self {
        Self {
            kind,
            raw: raw.to_string(),
            reason: reason.to_string(),
        }
    }
}
