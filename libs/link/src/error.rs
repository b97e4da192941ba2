//! Link-level errors
//!
//! Transport and codec faults pass through unchanged. Negotiation failures
//! name the level and the required categories that were not installed.

use crate::category::Category;
use crate::protocol::NegotiationLevel;
use codec::CodecError;
use network::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A required category was not installed at `level`
    #[error("Negotiation failed at {level} level, required categories not installed: {}", join_categories(.missing))]
    NegotiationFailed {
        level: NegotiationLevel,
        missing: Vec<Category>,
    },

    /// A reply arrived, but not the one the exchange was waiting for
    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReplyType { expected: String, actual: String },

    /// Internal-consistency fault, e.g. a handler of the wrong concrete type
    #[error("Internal link error: {message}")]
    Internal { message: String },

    #[error("Link is already connected")]
    AlreadyConnected,

    #[error("Link is not connected")]
    NotConnected,

    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: String, timeout_ms: u64 },
}

fn join_categories(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|category| category.name())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

impl LinkError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn unexpected_reply(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedReplyType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Form returned from a transport message handler
    pub fn into_transport(self) -> TransportError {
        match self {
            LinkError::Transport(error) => error,
            LinkError::Codec(error) => error.into(),
            LinkError::UnexpectedReplyType { expected, actual } => {
                CodecError::UnexpectedReplyType { expected, actual }.into()
            }
            other => TransportError::handler(other.to_string()),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            LinkError::Transport(error) => error.category(),
            LinkError::Codec(error) => error.category(),
            LinkError::NegotiationFailed { .. } => "negotiation",
            LinkError::UnexpectedReplyType { .. } => "protocol",
            LinkError::Internal { .. } => "internal",
            LinkError::AlreadyConnected => "already_connected",
            LinkError::NotConnected => "not_connected",
            LinkError::Timeout { .. } => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_failure_names_missing() {
        let error = LinkError::NegotiationFailed {
            level: NegotiationLevel::Coplayer,
            missing: vec![Category::GameCyclePlay, Category::TiltControl],
        };
        let text = error.to_string();
        assert!(text.contains("Coplayer"));
        assert!(text.contains("GameCyclePlay, TiltControl"));
        assert_eq!(error.category(), "negotiation");
    }

    #[test]
    fn test_into_transport_keeps_protocol_faults_typed() {
        let error = LinkError::unexpected_reply("SetVersionsReply", "ShutDown@Link").into_transport();
        assert!(matches!(
            error,
            TransportError::Codec(CodecError::UnexpectedReplyType { .. })
        ));
        assert!(matches!(
            LinkError::internal("bad cast").into_transport(),
            TransportError::Handler { .. }
        ));
    }
}
