//! Feed Errors
//!
//! Error taxonomy for the ingestion pipeline. None of these is fatal to the
//! host process: decode errors skip a frame, transport errors end a session
//! and are retried by the supervisor, and cancellation ends the supervisor.

use thiserror::Error;

/// Errors raised while ingesting the feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// A frame could not be decoded; the frame is skipped
    #[error("Decode error: {0}")]
    Decode(String),

    /// Connection refused, reset, timed out, or the body read failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("Server returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// The feed was stopped
    #[error("Feed cancelled")]
    Cancelled,
}

impl FeedError {
    /// Whether this error is the result of a stop request
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error ends the current session
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            FeedError::Decode("bad json".into()).to_string(),
            "Decode error: bad json"
        );
        assert_eq!(
            FeedError::Status {
                status: 503,
                body: "busy".into()
            }
            .to_string(),
            "Server returned HTTP 503: busy"
        );
        assert_eq!(FeedError::Cancelled.to_string(), "Feed cancelled");
    }

    #[test]
    fn test_error_classification() {
        assert!(FeedError::Cancelled.is_cancelled());
        assert!(!FeedError::Transport("reset".into()).is_cancelled());
        assert!(!FeedError::Decode("x".into()).is_session_fatal());
        assert!(FeedError::Transport("reset".into()).is_session_fatal());
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(FeedError::from(err), FeedError::Decode(_)));
    }
}
