//! Socket Transport Layer
//!
//! Turns the codec's framing into `connect / send / receive / disconnect`
//! over TCP. The transport itself never interprets application payloads: it
//! hands them, in arrival order, to a registered [`MessageHandler`] and
//! accepts outbound messages through [`MessageSink`].

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use codec::BinaryMessage;

pub mod listener;
pub mod tcp;

pub use listener::TransportListener;
pub use tcp::{SocketTransport, TransportConfig, TransportMode};

/// Receive seam: consumes `Application` payloads
///
/// Invoked on the transport's receive task, at most once per message and
/// strictly in arrival order. Returning an error is fatal to the connection.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, payload: Bytes) -> Result<()>;
}

/// Send seam: frames and writes an application message
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, message: BinaryMessage) -> Result<()>;
}
