//! Transport Error Types
//!
//! Connection, framing, integrity and protocol faults raised by the socket
//! transport, plus the aggregate used to replay receive-task faults on the
//! task that is waiting on the link.

use codec::CodecError;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Timeout, refusal, mid-session socket error or failed send
    #[error("Connection error: {message} ({address}:{port})")]
    Connection {
        message: String,
        address: String,
        port: u16,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// `connect()` called while a connection exists
    #[error("Transport is already connected")]
    AlreadyConnected,

    /// Operation requires a connection
    #[error("Transport is not connected")]
    NotConnected,

    /// Expected end of stream during an intentional disconnect; never a failure
    #[error("Socket closing: {message}")]
    SocketClosing { message: String },

    /// Framing or integrity fault while encoding/decoding
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Well-formed message that makes no sense at this point of the exchange
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// One or more faults captured on the receive task
    #[error("Socket transport failed with {} error(s): {}", .errors.len(), join_errors(.errors))]
    SocketTransport { errors: Vec<TransportError> },

    /// Registered message handler rejected a message
    #[error("Message handler error: {message}")]
    Handler { message: String },

    /// Invalid transport configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

fn join_errors(errors: &[TransportError]) -> String {
    errors
        .iter()
        .map(|error| error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self::Connection {
            message: message.into(),
            address: address.into(),
            port,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            address: address.into(),
            port,
            source: Some(Box::new(source)),
        }
    }

    pub fn socket_closing(message: impl Into<String>) -> Self {
        Self::SocketClosing {
            message: message.into(),
        }
    }

    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Expected teardown signal rather than a real fault
    pub fn is_socket_closing(&self) -> bool {
        matches!(self, TransportError::SocketClosing { .. })
    }

    /// Header or amount checksum mismatch
    pub fn is_integrity_fault(&self) -> bool {
        matches!(self, TransportError::Codec(error) if error.is_integrity_fault())
    }

    /// Errors wrapped by an aggregate, or the error itself
    pub fn flatten(&self) -> Vec<&TransportError> {
        match self {
            TransportError::SocketTransport { errors } => {
                errors.iter().flat_map(|error| error.flatten()).collect()
            }
            other => vec![other],
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Connection { .. } => "connection",
            TransportError::AlreadyConnected => "already_connected",
            TransportError::NotConnected => "not_connected",
            TransportError::SocketClosing { .. } => "socket_closing",
            TransportError::Codec(error) => error.category(),
            TransportError::InvalidMessage { .. } => "invalid_message",
            TransportError::SocketTransport { .. } => "socket_transport",
            TransportError::Handler { .. } => "handler",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Io { .. } => "io",
        }
    }
}

// Custom Clone implementation since Box<dyn Error> doesn't implement Clone
impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            TransportError::Connection {
                message,
                address,
                port,
                source,
            } => TransportError::Connection {
                // Source errors are not cloneable, so keep their text
                message: match source {
                    Some(source) => format!("{message}: {source}"),
                    None => message.clone(),
                },
                address: address.clone(),
                port: *port,
                source: None,
            },
            TransportError::AlreadyConnected => TransportError::AlreadyConnected,
            TransportError::NotConnected => TransportError::NotConnected,
            TransportError::SocketClosing { message } => TransportError::SocketClosing {
                message: message.clone(),
            },
            TransportError::Codec(error) => TransportError::Codec(error.clone()),
            TransportError::InvalidMessage { reason } => TransportError::InvalidMessage {
                reason: reason.clone(),
            },
            TransportError::SocketTransport { errors } => TransportError::SocketTransport {
                errors: errors.clone(),
            },
            TransportError::Handler { message } => TransportError::Handler {
                message: message.clone(),
            },
            TransportError::Configuration { message, field } => TransportError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            TransportError::Io { message, source } => TransportError::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), message.as_str()),
            },
        }
    }
}

/// Convert standard I/O errors to transport errors
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}
