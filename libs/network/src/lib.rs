//! Network Infrastructure
//!
//! Socket transport for the foundation link: connection lifecycle, framed
//! send, the asynchronous receive task and the exception monitor that
//! surfaces receive-task faults to whoever is waiting on the link.

pub mod error;
pub mod monitor;
pub mod transports;

pub use error::{Result, TransportError};
pub use monitor::ExceptionMonitor;
pub use transports::{
    MessageHandler, MessageSink, SocketTransport, TransportConfig, TransportListener, TransportMode,
};

// Constants for configuration
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
