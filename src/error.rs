//! Error kinds shared across the crate.
//!
//! Library layers return these typed errors; the CLI and configuration
//! loading work with `anyhow` and simply render them.

use thiserror::Error;

/// Failures of a single outbound call, after classification.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Timeouts, rate limits, overloaded or unreachable upstream. Retried.
    #[error("Transient upstream failure: {0}")]
    TransientUpstream(String),

    /// The upstream rejected the request itself. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The reply arrived but is missing required fields.
    #[error("{0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Check if another attempt could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::TransientUpstream(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(format!("Invalid response: {err}"))
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::TransientUpstream(err.to_string())
        }
    }
}

/// Failures while routing a function call to its handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown function called ({0})")]
    UnknownFunction(String),

    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("Function {function} failed: {reason}")]
    Handler { function: String, reason: String },
}

/// Failures of the retrieval index. The `Display` text is the message shown
/// to the user.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Query issued before the store was opened or populated.
    #[error("Index is not opened, load documents first")]
    NotOpened,

    #[error("Folder {0} does not exist")]
    MissingFolder(String),

    #[error("Invalid search pattern {0}")]
    InvalidPattern(String),

    #[error("No documents found at {0} or ingested before")]
    NothingNew(String),

    #[error("No pages found")]
    NoPages,

    #[error("{0}")]
    InvalidUrl(String),

    #[error("Can not reach web page {0}")]
    Unreachable(String),

    #[error(
        "Collection {collection} was built with embedding model {stored}, configured model is {configured}"
    )]
    EmbeddingMismatch {
        collection: String,
        stored: String,
        configured: String,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Temperature is out of range [0, 1]: {0}")]
    TemperatureOutOfRange(f32),

    #[error("Model {0} is not available")]
    UnknownModel(String),
}

/// Failures while driving a conversation turn.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Turn is already complete")]
    TurnFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(GatewayError::TransientUpstream("503".into()).is_transient());
        assert!(!GatewayError::InvalidRequest("400".into()).is_transient());
        assert!(!GatewayError::InvalidResponse("Invalid response".into()).is_transient());
    }

    #[test]
    fn test_index_messages() {
        assert_eq!(
            IndexError::NothingNew("/tmp/docs".into()).to_string(),
            "No documents found at /tmp/docs or ingested before"
        );
        assert_eq!(
            IndexError::InvalidPattern("notes.md".into()).to_string(),
            "Invalid search pattern notes.md"
        );
    }
}
