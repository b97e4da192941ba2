//! TCP Socket Transport
//!
//! One transport owns one TCP connection to the foundation (client mode) or
//! to a game (host mode, produced by [`TransportListener`]).
//!
//! ## Receive Path
//!
//! A single receive task per connection reads one header, validates its CRC,
//! reads the body to completion and dispatches it before the next header
//! read starts. Only one message is ever being decoded, so application
//! messages reach the handler strictly in the order they were framed.
//!
//! ## Disconnect Races
//!
//! `prepare_to_disconnect()` marks the connection as going away. A 0-byte
//! read or socket error seen while that mark (or the stop signal sent by
//! `disconnect()`) is set is an expected [`TransportError::SocketClosing`]
//! and is swallowed. Without it, the same 0-byte read means the peer dropped
//! us and is posted to the [`ExceptionMonitor`] as a connection fault.
//!
//! [`TransportListener`]: super::TransportListener

use super::{MessageHandler, MessageSink};
use crate::error::{Result, TransportError};
use crate::monitor::ExceptionMonitor;
use async_trait::async_trait;
use bytes::Bytes;
use codec::{
    connect_message, frame_application, BinaryMessage, BodyType, MessageType, ProtocolVersion,
    Segment, TransportBody, TransportHeaderSegment, HEADER_SIZE,
};
use nix::errno::Errno;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Socket transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Foundation host name or address (client mode)
    pub host: String,
    /// Foundation port (client mode)
    pub port: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Local transport protocol version
    pub version: ProtocolVersion,
    /// Maximum accepted `PacketLength - 12`
    pub max_message_size: usize,
    /// Sleep between retries of a transiently failed read or write
    pub transient_retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9300,
            connect_timeout: Duration::from_secs(5),
            version: ProtocolVersion::new(1, 0),
            max_message_size: 16 * 1024 * 1024, // 16MB
            transient_retry_delay: Duration::from_millis(5),
        }
    }
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::configuration("host must not be empty", Some("host")));
        }
        if self.connect_timeout.is_zero() {
            return Err(TransportError::configuration(
                "connect timeout must be positive",
                Some("connect_timeout"),
            ));
        }
        if self.max_message_size == 0 {
            return Err(TransportError::configuration(
                "max message size must be positive",
                Some("max_message_size"),
            ));
        }
        Ok(())
    }
}

/// Which side of the handshake this transport plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Game side: sends `ConnectionRequested`, expects `ConnectionAccepted`
    Client,
    /// Foundation side: answers `ConnectionRequested`
    Host,
}

/// Live connection, guarded by the connection lock
struct Connection {
    id: u64,
    writer: OwnedWriteHalf,
    stop: watch::Sender<bool>,
}

struct Shared {
    config: TransportConfig,
    mode: TransportMode,
    span: Mutex<Span>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    monitor: ExceptionMonitor,
    connected: AtomicBool,
    disconnecting: AtomicBool,
    next_connection_id: AtomicU64,
    peer_version: watch::Sender<Option<ProtocolVersion>>,
    peer_addr: Mutex<Option<SocketAddr>>,
}

/// Framed TCP transport with an asynchronous receive task
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SocketTransport {
    shared: Arc<Shared>,
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("mode", &self.shared.mode)
            .field("host", &self.shared.config.host)
            .field("port", &self.shared.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SocketTransport {
    /// Create a game-side transport; nothing happens until `connect()`
    pub fn client(config: TransportConfig) -> Self {
        Self::with_mode(config, TransportMode::Client)
    }

    fn with_mode(config: TransportConfig, mode: TransportMode) -> Self {
        let span = info_span!("transport", host = %config.host, port = config.port, mode = ?mode);
        let (peer_version, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                config,
                mode,
                span: Mutex::new(span),
                connection: tokio::sync::Mutex::new(None),
                handler: RwLock::new(None),
                monitor: ExceptionMonitor::new(),
                connected: AtomicBool::new(false),
                disconnecting: AtomicBool::new(false),
                next_connection_id: AtomicU64::new(0),
                peer_version,
                peer_addr: Mutex::new(None),
            }),
        }
    }

    /// Host-mode transport over an accepted stream, receive task running
    pub(crate) async fn accepted(
        stream: TcpStream,
        peer: SocketAddr,
        mut config: TransportConfig,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Self {
        config.host = peer.ip().to_string();
        config.port = peer.port();
        let transport = Self::with_mode(config, TransportMode::Host);
        *transport.shared.handler.write() = handler;
        *transport.shared.peer_addr.lock() = Some(peer);

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();

        let mut guard = transport.shared.connection.lock().await;
        *guard = Some(Shared::start_receiving(&transport.shared, reader, writer));
        transport.shared.connected.store(true, Ordering::SeqCst);
        drop(guard);

        transport
    }

    /// Emit every log line of this transport and its receive task in `span`
    pub fn with_span(self, span: Span) -> Self {
        *self.shared.span.lock() = span;
        self
    }

    pub fn span(&self) -> Span {
        self.shared.span.lock().clone()
    }

    /// Register the consumer of `Application` payloads, replacing any other
    pub fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.shared.handler.write() = Some(handler);
    }

    pub fn clear_message_handler(&self) {
        *self.shared.handler.write() = None;
    }

    /// Open the connection and request the transport handshake
    ///
    /// Returns once the `ConnectionRequested` message has been written. The
    /// `ConnectionAccepted` reply is processed by the receive task; a version
    /// mismatch surfaces through the exception monitor.
    pub async fn connect(&self) -> Result<()> {
        let span = self.span();
        self.connect_client().instrument(span).await
    }

    async fn connect_client(&self) -> Result<()> {
        let shared = &self.shared;
        let config = &shared.config;
        if shared.mode == TransportMode::Host {
            return Err(TransportError::configuration(
                "host-mode transports are connected by the listener",
                Some("mode"),
            ));
        }
        config.validate()?;

        let mut guard = shared.connection.lock().await;
        if guard.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let address = self.resolve_ipv4().await?;
        info!(%address, "Connecting to foundation");

        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::connection_with_source(
                    "failed to connect",
                    &config.host,
                    config.port,
                    e,
                ))
            }
            Err(_) => {
                return Err(TransportError::connection_with_source(
                    format!("connect timed out after {}ms", config.connect_timeout.as_millis()),
                    &config.host,
                    config.port,
                    io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                ))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, mut writer) = stream.into_split();

        let request = connect_message(BodyType::ConnectionRequested, config.version)?.to_bytes()?;
        write_fully(&mut writer, &request, config.transient_retry_delay)
            .await
            .map_err(|e| {
                TransportError::connection_with_source(
                    "failed to send connection request",
                    &config.host,
                    config.port,
                    e,
                )
            })?;

        *shared.peer_addr.lock() = Some(address);
        *guard = Some(Shared::start_receiving(shared, reader, writer));
        shared.connected.store(true, Ordering::SeqCst);

        info!(%address, version = %config.version, "Connected, transport handshake requested");
        Ok(())
    }

    async fn resolve_ipv4(&self) -> Result<SocketAddr> {
        let config = &self.shared.config;
        let mut addresses = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                TransportError::connection_with_source(
                    "address resolution failed",
                    &config.host,
                    config.port,
                    e,
                )
            })?;
        addresses
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| TransportError::connection("no IPv4 address for host", &config.host, config.port))
    }

    /// Frame `message` as `Application` and write it under the connection lock
    pub async fn send_message(&self, message: BinaryMessage) -> Result<()> {
        let framed = frame_application(message)?;
        let bytes = framed.to_bytes()?;
        let span = self.span();
        async {
            self.shared.write_frame(&bytes).await?;
            debug!(bytes = bytes.len(), "Sent application message");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Mark the connection as going away so teardown reads are not faults
    pub fn prepare_to_disconnect(&self) {
        self.shared.disconnecting.store(true, Ordering::SeqCst);
        debug!(parent: &self.span(), "Preparing to disconnect");
    }

    /// Close the socket and stop the receive task
    ///
    /// Safe to call from a message handler and when already disconnected.
    /// A new `connect()` is possible afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        let span = self.span();
        let shared = &self.shared;
        async {
            shared.disconnecting.store(true, Ordering::SeqCst);
            {
                let mut guard = shared.connection.lock().await;
                if let Some(mut connection) = guard.take() {
                    connection.stop.send_replace(true);
                    if let Err(e) = connection.writer.shutdown().await {
                        debug!(error = %e, "Socket shutdown reported an error");
                    }
                    info!(connection = connection.id, "Transport disconnected");
                }
                shared.connected.store(false, Ordering::SeqCst);
            }
            shared.peer_version.send_replace(None);
            shared.disconnecting.store(false, Ordering::SeqCst);
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_disconnecting(&self) -> bool {
        self.shared.disconnecting.load(Ordering::SeqCst)
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.shared.peer_version.borrow().is_some()
    }

    /// Version announced by the peer during the handshake
    pub fn peer_version(&self) -> Option<ProtocolVersion> {
        *self.shared.peer_version.borrow()
    }

    /// Wait for the handshake, or replay the fault that prevented it
    pub async fn wait_for_handshake(&self) -> Result<ProtocolVersion> {
        let mut versions = self.shared.peer_version.subscribe();
        loop {
            if let Some(version) = *versions.borrow_and_update() {
                return Ok(version);
            }
            tokio::select! {
                changed = versions.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::NotConnected);
                    }
                }
                _ = self.shared.monitor.wait() => {
                    return Err(self.shared.monitor.take().unwrap_or(TransportError::NotConnected));
                }
            }
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.shared.peer_addr.lock()
    }

    pub fn local_version(&self) -> ProtocolVersion {
        self.shared.config.version
    }

    pub fn mode(&self) -> TransportMode {
        self.shared.mode
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn exception_monitor(&self) -> &ExceptionMonitor {
        &self.shared.monitor
    }
}

#[async_trait]
impl MessageSink for SocketTransport {
    async fn send_message(&self, message: BinaryMessage) -> Result<()> {
        SocketTransport::send_message(self, message).await
    }
}

impl Shared {
    /// Spawn the receive task for a freshly split stream
    ///
    /// Callers hold the connection lock so a fault raised immediately by the
    /// task cannot tear down before the connection has been stored.
    fn start_receiving(shared: &Arc<Shared>, reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Connection {
        let id = shared.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop, stop_rx) = watch::channel(false);
        let task_shared = Arc::clone(shared);
        let span = shared.span.lock().clone();
        tokio::spawn(task_shared.receive_loop(reader, stop_rx, id).instrument(span));
        Connection { id, writer, stop }
    }

    async fn receive_loop(self: Arc<Self>, mut reader: OwnedReadHalf, stop: watch::Receiver<bool>, id: u64) {
        debug!(connection = id, "Receive task started");
        let mut stop_signal = stop.clone();
        loop {
            let frame = tokio::select! {
                biased;
                _ = stopped(&mut stop_signal) => {
                    debug!(connection = id, "Receive task stopped");
                    return;
                }
                frame = self.read_frame(&mut reader, &stop) => frame,
            };

            // Dispatch is never cancelled: a message is either fully handled or not read
            let result = match frame {
                Ok((header, body)) => self.dispatch(header, body).await,
                Err(e) => Err(e),
            };

            if let Err(error) = result {
                self.on_receive_fault(error, id).await;
                return;
            }
        }
    }

    fn is_closing(&self, stop: &watch::Receiver<bool>) -> bool {
        self.disconnecting.load(Ordering::SeqCst) || *stop.borrow()
    }

    /// Classify an end of stream
    fn closed_error(&self, stop: &watch::Receiver<bool>, what: &str) -> TransportError {
        if self.is_closing(stop) {
            TransportError::socket_closing(what)
        } else {
            TransportError::connection(what, &self.config.host, self.config.port)
        }
    }

    /// Classify a socket error on the receive path
    fn read_error(&self, stop: &watch::Receiver<bool>, error: io::Error) -> TransportError {
        if self.is_closing(stop) {
            TransportError::socket_closing(format!("socket closed during disconnect: {error}"))
        } else {
            TransportError::connection_with_source("receive failed", &self.config.host, self.config.port, error)
        }
    }

    async fn read_frame(
        &self,
        reader: &mut OwnedReadHalf,
        stop: &watch::Receiver<bool>,
    ) -> Result<(TransportHeaderSegment, Bytes)> {
        let retry = self.config.transient_retry_delay;

        let mut header_bytes = [0u8; HEADER_SIZE];
        let filled = read_fully(reader, &mut header_bytes, retry)
            .await
            .map_err(|e| self.read_error(stop, e))?;
        if filled == 0 {
            return Err(self.closed_error(stop, "connection closed by peer"));
        }
        if filled < HEADER_SIZE {
            return Err(self.closed_error(stop, "connection closed inside a message header"));
        }

        let mut header = TransportHeaderSegment::default();
        header.read(&header_bytes, 0)?;

        let body_len = header.body_len()?;
        if body_len > self.config.max_message_size {
            return Err(TransportError::invalid_message(format!(
                "message body of {body_len} bytes exceeds maximum {}",
                self.config.max_message_size
            )));
        }

        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            let filled = read_fully(reader, &mut body, retry)
                .await
                .map_err(|e| self.read_error(stop, e))?;
            if filled < body_len {
                return Err(self.closed_error(stop, "connection closed inside a message body"));
            }
        }

        debug!(message_type = ?header.message_type, bytes = body_len, "Received message");
        Ok((header, Bytes::from(body)))
    }

    async fn dispatch(&self, header: TransportHeaderSegment, body: Bytes) -> Result<()> {
        match header.message_type {
            MessageType::Transport => self.handle_transport(&body).await,
            MessageType::Application => {
                let handler = self.handler.read().clone();
                match handler {
                    Some(handler) => handler.handle_message(body).await,
                    None => {
                        warn!(bytes = body.len(), "No message handler registered, dropping application message");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn handle_transport(&self, body: &[u8]) -> Result<()> {
        let local = self.config.version;
        match (self.mode, TransportBody::decode(body)?) {
            (TransportMode::Client, TransportBody::ConnectionAccepted(peer)) => {
                if !local.is_compatible_with(&peer) {
                    return Err(TransportError::invalid_message(format!(
                        "peer transport version {peer} is incompatible with local version {local}"
                    )));
                }
                self.peer_version.send_replace(Some(peer));
                info!(peer_version = %peer, "Transport handshake complete");
            }
            (TransportMode::Host, TransportBody::ConnectionRequested(peer)) => {
                self.peer_version.send_replace(Some(peer));
                let reply = connect_message(BodyType::ConnectionAccepted, local)?.to_bytes()?;
                self.write_frame(&reply).await?;
                info!(peer_version = %peer, "Transport handshake accepted");
            }
            (_, TransportBody::TransportInformation(information)) => {
                debug!(bytes = information.len(), "Ignoring transport information");
            }
            (mode, other) => {
                return Err(TransportError::invalid_message(format!(
                    "{:?} is not expected by a {mode:?} transport",
                    other.body_type()
                )));
            }
        }
        Ok(())
    }

    /// Write a complete frame under the connection lock
    async fn write_frame(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.connection.lock().await;
        let result = match guard.as_mut() {
            Some(connection) => {
                write_fully(&mut connection.writer, bytes, self.config.transient_retry_delay).await
            }
            None => return Err(TransportError::NotConnected),
        };

        if let Err(e) = result {
            if let Some(mut dead) = guard.take() {
                dead.stop.send_replace(true);
                let _ = dead.writer.shutdown().await;
            }
            self.connected.store(false, Ordering::SeqCst);
            error!(error = %e, "Send failed, transport closed");
            return Err(TransportError::connection_with_source(
                "send failed",
                &self.config.host,
                self.config.port,
                e,
            ));
        }
        Ok(())
    }

    async fn on_receive_fault(&self, error: TransportError, id: u64) {
        {
            let mut guard = self.connection.lock().await;
            if guard.as_ref().map(|connection| connection.id) == Some(id) {
                if let Some(mut dead) = guard.take() {
                    let _ = dead.writer.shutdown().await;
                }
                self.connected.store(false, Ordering::SeqCst);
                self.peer_version.send_replace(None);
            }
        }

        if error.is_socket_closing() {
            debug!(connection = id, reason = %error, "Receive task ended by disconnect");
            return;
        }

        error!(
            connection = id,
            category = error.category(),
            error = %error,
            "Receive task failed, transport closed"
        );
        self.monitor.post(error);
    }
}

/// Resolve once the stop flag is set or its sender is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Buffer-full conditions that are retried rather than surfaced
pub(crate) fn is_transient(error: &io::Error) -> bool {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => true,
        _ => error
            .raw_os_error()
            .map(Errno::from_raw)
            .is_some_and(|errno| matches!(errno, Errno::EAGAIN | Errno::EINPROGRESS | Errno::ENOBUFS)),
    }
}

/// Write all of `bytes`, retrying transient failures from the unwritten offset
async fn write_fully(writer: &mut OwnedWriteHalf, bytes: &[u8], retry_delay: Duration) -> io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]).await {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes"));
            }
            Ok(n) => written += n,
            Err(e) if is_transient(&e) => {
                debug!(error = %e, written, "Transient send failure, retrying");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush().await
}

/// Fill `buffer`, retrying transient failures; returns bytes read before EOF
async fn read_fully(reader: &mut OwnedReadHalf, buffer: &mut [u8], retry_delay: Duration) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if is_transient(&e) => {
                debug!(error = %e, filled, "Transient receive failure, retrying");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
