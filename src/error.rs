//! Error types for the backend connection layer
//!
//! Transport-level failures end a writer session and surface on the affected
//! requests; error frames returned by a backend are responses, not errors,
//! and never appear here.
use thiserror::Error;

/// Errors delivered to requests by the connection machinery.
///
/// `Clone` because the same value is stored in the request's response slot
/// and propagated up the writer loop that ends the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The session ended before the request could be sent, or while its
    /// response was still outstanding.
    #[error("backend conn reset")]
    Reset,

    /// A read-only request was marked broken by its session and rejected
    /// without being sent.
    #[error("request is broken")]
    RequestBroken,

    /// The handshake expected a reply frame and the stream ended instead.
    #[error("resp frame is required")]
    RespRequired,

    /// Transport or codec failure while talking to the backend.
    #[error("backend conn failure, {0}")]
    Failure(String),
}

impl BackendError {
    pub fn failure<S: Into<String>>(message: S) -> Self {
        BackendError::Failure(message.into())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        assert_eq!(BackendError::Reset.to_string(), "backend conn reset");
        assert_eq!(BackendError::RequestBroken.to_string(), "request is broken");
        assert_eq!(
            BackendError::failure("connection refused").to_string(),
            "backend conn failure, connection refused"
        );
    }

    #[test]
    fn test_backend_error_clone_eq() {
        let err = BackendError::failure("timed out");
        assert_eq!(err.clone(), err);
        assert_ne!(err, BackendError::Reset);
    }
}
