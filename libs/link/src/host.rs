//! # Host Session
//!
//! Foundation side of one accepted game connection. The session waits for
//! the game's `Open`, then negotiates the link level and every level of the
//! announced role one after another. Category requests from the game are
//! answered by a [`CategoryResponder`] directly on the receive task.

use crate::category::{Category, SupportedVersions};
use crate::controller::{LinkController, NegotiationOutcome};
use crate::error::{LinkError, LinkResult};
use crate::link::DEFAULT_REPLY_TIMEOUT;
use crate::protocol::{CategoryMessageKind, LinkMessage, NegotiationLevel};
use crate::role::Role;
use async_trait::async_trait;
use bytes::Bytes;
use network::{MessageHandler, SocketTransport, TransportError, TransportListener};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn, Instrument};

/// Answers category requests from the game
pub trait CategoryResponder: Send + Sync {
    /// `None` leaves the request unanswered
    fn respond(&self, level: NegotiationLevel, category: Category, payload: Bytes) -> Option<Bytes>;
}

/// Replies with the request payload
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoResponder;

impl CategoryResponder for EchoResponder {
    fn respond(&self, _level: NegotiationLevel, _category: Category, payload: Bytes) -> Option<Bytes> {
        Some(payload)
    }
}

#[derive(Clone)]
pub struct HostOptions {
    pub supported: SupportedVersions,
    pub responder: Arc<dyn CategoryResponder>,
    pub reply_timeout: Duration,
    /// Bound on the wait for the game's `Open`
    pub open_timeout: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            supported: SupportedVersions::default(),
            responder: Arc::new(EchoResponder),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            open_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for HostOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostOptions")
            .field("supported", &self.supported)
            .field("reply_timeout", &self.reply_timeout)
            .field("open_timeout", &self.open_timeout)
            .finish()
    }
}

impl HostOptions {
    pub fn with_supported(mut self, supported: SupportedVersions) -> Self {
        self.supported = supported;
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn CategoryResponder>) -> Self {
        self.responder = responder;
        self
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }
}

struct HostMessageHandler {
    open: Mutex<Option<oneshot::Sender<Role>>>,
    replies: mpsc::UnboundedSender<LinkMessage>,
    inbound: mpsc::UnboundedSender<LinkMessage>,
    responder: Arc<dyn CategoryResponder>,
    transport: OnceLock<SocketTransport>,
}

#[async_trait]
impl MessageHandler for HostMessageHandler {
    async fn handle_message(&self, payload: Bytes) -> Result<(), TransportError> {
        let message = LinkMessage::decode(&payload)?;
        debug!(message = %message.describe(), "Game message received");

        match message {
            LinkMessage::Open { role } => match self.open.lock().take() {
                Some(open) => {
                    let _ = open.send(role);
                }
                None => warn!(%role, "Ignoring repeated Open"),
            },
            reply @ (LinkMessage::GetVersionsReply { .. } | LinkMessage::SetVersionsReply { .. }) => {
                if self.replies.send(reply).is_err() {
                    warn!("Dropping negotiation reply, session closed");
                }
            }
            LinkMessage::Category {
                level,
                category,
                kind: CategoryMessageKind::Request,
                payload,
            } => {
                let transport = self
                    .transport
                    .get()
                    .ok_or_else(|| TransportError::handler("request arrived before the session was set up"))?;
                let Some(answer) = self.responder.respond(level, category, payload) else {
                    debug!(%level, %category, "Request left unanswered");
                    return Ok(());
                };
                let reply = LinkMessage::Category {
                    level,
                    category,
                    kind: CategoryMessageKind::Reply,
                    payload: answer,
                };
                transport.send_message(reply.encode()?).await?;
            }
            other => {
                if self.inbound.send(other).is_err() {
                    debug!("Dropping inbound message, session closed");
                }
            }
        }
        Ok(())
    }
}

/// One accepted game connection
pub struct HostSession {
    transport: SocketTransport,
    role: Role,
    options: HostOptions,
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkMessage>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkMessage>>,
}

impl fmt::Debug for HostSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSession")
            .field("role", &self.role)
            .field("transport", &self.transport)
            .finish()
    }
}

impl HostSession {
    /// Accept one game and wait for its `Open`
    pub async fn accept(listener: &TransportListener, options: HostOptions) -> LinkResult<Self> {
        let (open_tx, open_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(HostMessageHandler {
            open: Mutex::new(Some(open_tx)),
            replies: reply_tx,
            inbound: inbound_tx,
            responder: Arc::clone(&options.responder),
            transport: OnceLock::new(),
        });

        let transport = listener.accept_with_handler(handler.clone()).await?;
        let _ = handler.transport.set(transport.clone());

        let span = transport.span();
        let role = match Self::wait_for_open(&transport, open_rx, options.open_timeout)
            .instrument(span)
            .await
        {
            Ok(role) => role,
            Err(e) => {
                Self::close_transport(&transport).await;
                return Err(e);
            }
        };
        info!(parent: &transport.span(), %role, "Game opened the link");

        Ok(Self {
            transport,
            role,
            options,
            replies: tokio::sync::Mutex::new(reply_rx),
            inbound: tokio::sync::Mutex::new(inbound_rx),
        })
    }

    async fn wait_for_open(
        transport: &SocketTransport,
        open: oneshot::Receiver<Role>,
        open_timeout: Duration,
    ) -> LinkResult<Role> {
        let monitor = transport.exception_monitor();
        tokio::select! {
            opened = tokio::time::timeout(open_timeout, open) => match opened {
                Ok(Ok(role)) => Ok(role),
                Ok(Err(_)) => Err(LinkError::NotConnected),
                Err(_) => Err(LinkError::timeout("Open", open_timeout.as_millis() as u64)),
            },
            _ = monitor.wait() => Err(monitor.take().map(LinkError::from).unwrap_or(LinkError::NotConnected)),
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn transport(&self) -> &SocketTransport {
        &self.transport
    }

    /// Negotiate one level; concurrent calls run one after another
    pub async fn negotiate_level(&self, level: NegotiationLevel) -> LinkResult<NegotiationOutcome> {
        let controller = LinkController::for_supported(level, &self.options.supported)
            .with_reply_timeout(self.options.reply_timeout);
        self.negotiate_with(&controller).await
    }

    /// Negotiate with caller-chosen requests
    pub async fn negotiate_with(&self, controller: &LinkController) -> LinkResult<NegotiationOutcome> {
        let mut replies = self.replies.lock().await;
        controller
            .negotiate(&self.transport, &mut replies)
            .instrument(self.transport.span())
            .await
    }

    /// Negotiate the link level, then each level of the role
    ///
    /// Stops after the first level the game rejects.
    pub async fn negotiate_role(&self) -> LinkResult<Vec<NegotiationOutcome>> {
        let mut outcomes = Vec::new();
        let levels = std::iter::once(NegotiationLevel::Link).chain(self.role.levels());
        for level in levels {
            let outcome = self.negotiate_level(level).await?;
            let accepted = outcome.accepted;
            outcomes.push(outcome);
            if !accepted {
                warn!(parent: &self.transport.span(), %level, "Game rejected the negotiated versions");
                break;
            }
        }
        Ok(outcomes)
    }

    /// Send a category event to the game
    pub async fn send_event(
        &self,
        level: NegotiationLevel,
        category: Category,
        transactional: bool,
        payload: impl Into<Bytes>,
    ) -> LinkResult<()> {
        let kind = if transactional {
            CategoryMessageKind::TransactionalEvent
        } else {
            CategoryMessageKind::NonTransactionalEvent
        };
        self.send(LinkMessage::Category {
            level,
            category,
            kind,
            payload: payload.into(),
        })
        .await
    }

    /// Tell the game the session is over
    pub async fn shut_down(&self) -> LinkResult<()> {
        info!(parent: &self.transport.span(), "Shutting the link down");
        self.send(LinkMessage::ShutDown).await
    }

    /// Next game message that is not part of a negotiation or a request
    pub async fn next_inbound(&self) -> Option<LinkMessage> {
        self.inbound.lock().await.recv().await
    }

    pub async fn close(&self) {
        Self::close_transport(&self.transport).await;
    }

    async fn send(&self, message: LinkMessage) -> LinkResult<()> {
        self.transport.send_message(message.encode()?).await?;
        Ok(())
    }

    async fn close_transport(transport: &SocketTransport) {
        transport.prepare_to_disconnect();
        if let Err(e) = transport.disconnect().await {
            warn!(parent: &transport.span(), error = %e, "Host transport disconnect reported an error");
        }
        transport.clear_message_handler();
    }
}
