//! Handler failure types.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the domain collaborator behind a task handler.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// The referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation was refused by a domain rule.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The backing service could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Why a handler produced no result.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The `data` object has the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The domain collaborator refused.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// The handler ran past its deadline.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
    /// The handler panicked.
    #[error("handler panicked")]
    Panicked,
}

impl HandlerError {
    /// Short label used as a metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Domain(_) => "domain",
            Self::Timeout(_) => "timeout",
            Self::Panicked => "panic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_is_transparent() {
        let err = HandlerError::from(DomainError::NotFound("task 7".into()));
        assert_eq!(err.to_string(), "not found: task 7");
        assert_eq!(err.kind(), "domain");
    }

    #[test]
    fn timeout_message_includes_duration() {
        let err = HandlerError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "handler timed out after 10s");
        assert_eq!(err.kind(), "timeout");
    }
}
