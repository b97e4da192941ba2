//! # Link State Machine
//!
//! A [`Link`] is the game side of one foundation session. `connect()` opens
//! the transport, announces the role with `Open` and then waits while the
//! foundation drives the negotiations: first the common `Link` level, then
//! every level of the role. Negotiation messages are processed on the
//! transport's receive task; `connect()` only observes the state channel and
//! the exception monitor.
//!
//! ```text
//! Disconnected -> LinkConnecting -> LinkNegotiated -> RoleConnecting -> RoleConnected
//!                         \______________ ShutDown (any time) _______________/
//! ```
//!
//! Typed categories are stored before the state advances, so a reader woken
//! by the state channel always finds them.
//!
//! Once `connect()` has returned, a watcher task keeps observing the monitor.
//! A later transport fault tears the link down to `Disconnected` and raises
//! [`LinkEvent::TransportFailed`].

use crate::api_manager::ApiManager;
use crate::category::{Category, SupportedVersions};
use crate::error::{LinkError, LinkResult};
use crate::events::{EventCallback, EventPublisher, LinkEvent, LoggingEventCallback};
use crate::handlers::{CategoryFactory, ChannelContext, DefaultCategoryFactory, InstalledCategories, ReplyRouter};
use crate::protocol::{CategoryMessageKind, LinkMessage, NegotiationLevel};
use crate::role::*;
use async_trait::async_trait;
use bytes::Bytes;
use network::{MessageHandler, MessageSink, SocketTransport, TransportError};
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Disconnected,
    LinkConnecting,
    LinkNegotiated,
    RoleConnecting,
    RoleConnected,
    ShutDown,
}

/// How a successful `connect()` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Every level of the role is negotiated
    Connected,
    /// The foundation shut the session down first
    ShutDown,
}

/// Collaborators supplied by the application
#[derive(Clone)]
pub struct LinkOptions {
    pub supported: SupportedVersions,
    pub factory: Arc<dyn CategoryFactory>,
    pub transactional_events: Arc<dyn EventCallback>,
    pub non_transactional_events: Arc<dyn EventCallback>,
    /// Bound on a category request's reply
    pub reply_timeout: Duration,
    pub span: Option<Span>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            supported: SupportedVersions::default(),
            factory: Arc::new(DefaultCategoryFactory),
            transactional_events: Arc::new(LoggingEventCallback::transactional()),
            non_transactional_events: Arc::new(LoggingEventCallback::non_transactional()),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            span: None,
        }
    }
}

impl fmt::Debug for LinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkOptions")
            .field("supported", &self.supported)
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}

impl LinkOptions {
    pub fn with_supported(mut self, supported: SupportedVersions) -> Self {
        self.supported = supported;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn CategoryFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_event_callbacks(
        mut self,
        transactional: Arc<dyn EventCallback>,
        non_transactional: Arc<dyn EventCallback>,
    ) -> Self {
        self.transactional_events = transactional;
        self.non_transactional_events = non_transactional;
        self
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Negotiated categories of one inner link
#[derive(Debug, Clone)]
pub enum InnerLink {
    System(Arc<SystemCategories>),
    AscribedGame(Arc<AscribedGameCategories>),
    Tsm(Arc<TsmCategories>),
    App(Arc<AppCategories>),
}

/// Game side of a foundation session
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    role: Role,
    transport: SocketTransport,
    options: LinkOptions,
    span: Span,
    state: watch::Sender<LinkState>,
    negotiated: RwLock<HashMap<NegotiationLevel, Arc<dyn Any + Send + Sync>>>,
    installed: RwLock<HashMap<NegotiationLevel, BTreeSet<Category>>>,
    pending_levels: Mutex<BTreeSet<NegotiationLevel>>,
    failure: Mutex<Option<LinkError>>,
    replies: ReplyRouter,
    events: EventPublisher,
    interfaces: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    /// Bumped by every teardown; a fault watcher only acts on its own session
    session: AtomicU64,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl Link {
    pub fn new(role: Role, transport: SocketTransport, options: LinkOptions) -> Self {
        let span = options
            .span
            .clone()
            .unwrap_or_else(|| info_span!("link", role = %role));
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            inner: Arc::new(LinkInner {
                role,
                transport,
                options,
                span,
                state,
                negotiated: RwLock::new(HashMap::new()),
                installed: RwLock::new(HashMap::new()),
                pending_levels: Mutex::new(BTreeSet::new()),
                failure: Mutex::new(None),
                replies: ReplyRouter::new(),
                events: EventPublisher::new(),
                interfaces: RwLock::new(HashMap::new()),
                session: AtomicU64::new(0),
            }),
        }
    }

    /// Connect and wait until the role is negotiated or the session ends
    ///
    /// Bounded by the transport's exception monitor, not by a timer. On any
    /// error the transport is closed and the link is `Disconnected` again.
    pub async fn connect(&self) -> LinkResult<ConnectOutcome> {
        let span = self.inner.span.clone();
        self.connect_link().instrument(span).await
    }

    async fn connect_link(&self) -> LinkResult<ConnectOutcome> {
        let inner = &self.inner;
        inner.role.validate()?;
        let started = inner.state.send_if_modified(|state| {
            if *state == LinkState::Disconnected {
                *state = LinkState::LinkConnecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(LinkError::AlreadyConnected);
        }

        *inner.failure.lock() = None;
        inner.transport.exception_monitor().clear();

        match inner.run_connect().await {
            Ok(outcome) => {
                info!(?outcome, "Link connect finished");
                inner.watch_transport();
                Ok(outcome)
            }
            Err(e) => {
                error!(category = e.category(), error = %e, "Link connect failed");
                if let Err(teardown) = inner.teardown().await {
                    warn!(error = %teardown, "Transport teardown after failed connect reported an error");
                }
                Err(e)
            }
        }
    }

    /// Close the transport and forget every negotiated category
    pub async fn disconnect(&self) -> LinkResult<()> {
        let span = self.inner.span.clone();
        self.disconnect_link().instrument(span).await
    }

    async fn disconnect_link(&self) -> LinkResult<()> {
        self.inner.teardown().await?;
        info!("Link disconnected");
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Receive link events; replaces any earlier subscriber
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    pub fn role(&self) -> &Role {
        &self.inner.role
    }

    pub fn transport(&self) -> &SocketTransport {
        &self.inner.transport
    }

    /// Typed categories of a negotiated level
    pub fn categories<S: LevelCategorySet>(&self) -> Option<Arc<S>> {
        let typed = self.inner.negotiated.read().get(&S::LEVEL).cloned()?;
        typed.downcast::<S>().ok()
    }

    pub fn link_categories(&self) -> Option<Arc<LinkCategories>> {
        self.categories()
    }

    pub fn shell(&self) -> Option<Arc<ShellCategories>> {
        self.categories()
    }

    pub fn coplayer(&self) -> Option<Arc<CoplayerCategories>> {
        self.categories()
    }

    pub fn inner_link(&self, inner: InnerRole) -> Option<InnerLink> {
        Some(match inner {
            InnerRole::System => InnerLink::System(self.categories()?),
            InnerRole::AscribedGame => InnerLink::AscribedGame(self.categories()?),
            InnerRole::Tsm => InnerLink::Tsm(self.categories()?),
            InnerRole::App => InnerLink::App(self.categories()?),
        })
    }

    /// Categories installed at `level`, empty until it is negotiated
    pub fn installed_categories(&self, level: NegotiationLevel) -> Vec<Category> {
        self.inner
            .installed
            .read()
            .get(&level)
            .map(|categories| categories.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_inner_link_connected(&self, inner: InnerRole) -> bool {
        self.inner.role.inner_roles().contains(&inner)
            && self.inner.negotiated.read().contains_key(&inner.level())
    }

    /// Optional capability extension registered under its type
    pub fn get_interface<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let interface = self.inner.interfaces.read().get(&TypeId::of::<T>()).cloned()?;
        interface.downcast::<T>().ok()
    }

    /// Register a capability extension, replacing one of the same type
    pub fn register_interface<T: Any + Send + Sync>(&self, interface: Arc<T>) {
        self.inner.interfaces.write().insert(TypeId::of::<T>(), interface);
    }
}

/// Transport handler holding the link weakly
struct LinkMessageHandler {
    link: Weak<LinkInner>,
}

#[async_trait]
impl MessageHandler for LinkMessageHandler {
    async fn handle_message(&self, payload: Bytes) -> Result<(), TransportError> {
        let Some(link) = self.link.upgrade() else {
            return Ok(());
        };
        link.on_message(payload).await.map_err(LinkError::into_transport)
    }
}

impl LinkInner {
    async fn run_connect(self: &Arc<Self>) -> LinkResult<ConnectOutcome> {
        let mut states = self.state.subscribe();
        let monitor = self.transport.exception_monitor().clone();

        self.transport.set_message_handler(Arc::new(LinkMessageHandler {
            link: Arc::downgrade(self),
        }));
        self.transport.connect().await?;
        let version = self.transport.wait_for_handshake().await?;
        debug!(%version, "Transport handshake complete");

        self.send(LinkMessage::Open { role: self.role.clone() }).await?;
        info!(role = %self.role, "Link opened, awaiting negotiation");

        loop {
            if let Some(failure) = self.failure.lock().take() {
                return Err(failure);
            }
            let state = *states.borrow_and_update();
            match state {
                LinkState::RoleConnected => return Ok(ConnectOutcome::Connected),
                LinkState::ShutDown => return Ok(ConnectOutcome::ShutDown),
                LinkState::Disconnected => return Err(LinkError::NotConnected),
                _ => {}
            }
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return Err(LinkError::NotConnected);
                    }
                }
                _ = monitor.wait() => {
                    let fault = monitor.take().map(LinkError::from).unwrap_or(LinkError::NotConnected);
                    return Err(fault);
                }
            }
        }
    }

    /// Observe the monitor for the rest of the session
    ///
    /// Exits without acting once the link leaves `RoleConnected`/`ShutDown`
    /// or is dropped.
    fn watch_transport(self: &Arc<Self>) {
        let link = Arc::downgrade(self);
        let session = self.session.load(Ordering::SeqCst);
        let mut states = self.state.subscribe();
        let monitor = self.transport.exception_monitor().clone();

        let watcher = async move {
            loop {
                tokio::select! {
                    changed = states.changed() => {
                        let live = changed.is_ok()
                            && matches!(*states.borrow_and_update(), LinkState::RoleConnected | LinkState::ShutDown);
                        if !live {
                            debug!("Transport watcher stopped");
                            return;
                        }
                    }
                    _ = monitor.wait() => break,
                }
            }
            if let Some(link) = link.upgrade() {
                link.on_transport_fault(session).await;
            }
        };
        tokio::spawn(watcher.instrument(self.span.clone()));
    }

    async fn on_transport_fault(&self, session: u64) {
        if self.session.load(Ordering::SeqCst) != session {
            return;
        }
        let Some(fault) = self.transport.exception_monitor().take() else {
            return;
        };
        error!(category = fault.category(), error = %fault, "Transport failed, tearing the link down");
        if let Err(e) = self.teardown().await {
            warn!(error = %e, "Transport teardown after a fault reported an error");
        }
        self.events.publish(LinkEvent::TransportFailed);
    }

    async fn teardown(&self) -> Result<(), TransportError> {
        self.session.fetch_add(1, Ordering::SeqCst);
        self.transport.prepare_to_disconnect();
        let closed = self.transport.disconnect().await;
        self.transport.clear_message_handler();
        self.replies.clear();
        self.negotiated.write().clear();
        self.installed.write().clear();
        self.pending_levels.lock().clear();
        self.transport.exception_monitor().clear();
        self.state.send_replace(LinkState::Disconnected);
        closed
    }

    async fn send(&self, message: LinkMessage) -> LinkResult<()> {
        self.transport.send_message(message.encode()?).await?;
        Ok(())
    }

    async fn on_message(&self, payload: Bytes) -> LinkResult<()> {
        let message = LinkMessage::decode(&payload)?;
        debug!(message = %message.describe(), bytes = payload.len(), "Link message received");

        match message {
            LinkMessage::GetVersions { level, requests } => {
                self.check_level_order(level, "GetVersions")?;
                if level != NegotiationLevel::Link {
                    self.state.send_if_modified(|state| {
                        if *state == LinkState::LinkNegotiated {
                            *state = LinkState::RoleConnecting;
                            true
                        } else {
                            false
                        }
                    });
                }
                let offers = match self.manager(level) {
                    Some(manager) => manager.handle_get_versions(&requests),
                    None => {
                        warn!(%level, role = %self.role, "Versions requested for a level outside the role");
                        Vec::new()
                    }
                };
                self.send(LinkMessage::GetVersionsReply { level, offers }).await
            }
            LinkMessage::SetVersions { level, selections } => {
                self.check_level_order(level, "SetVersions")?;
                let Some(manager) = self.manager(level) else {
                    warn!(%level, role = %self.role, "Versions set for a level outside the role");
                    return self
                        .send(LinkMessage::SetVersionsReply { level, success: false })
                        .await;
                };
                let sink: Arc<dyn MessageSink> = Arc::new(self.transport.clone());
                let context = ChannelContext::new(sink, self.replies.clone(), self.options.reply_timeout);
                let outcome = manager.handle_set_versions(&selections, &context);

                let stored = outcome
                    .into_result()
                    .and_then(|installed| self.store_level(level, installed));
                let success = stored.is_ok();
                self.send(LinkMessage::SetVersionsReply { level, success }).await?;

                match stored {
                    Ok(()) => self.advance(level),
                    Err(e) => self.fail(e),
                }
                Ok(())
            }
            LinkMessage::Category {
                level,
                category,
                kind,
                payload,
            } => {
                self.on_category(level, category, kind, payload);
                Ok(())
            }
            LinkMessage::ShutDown => {
                info!("Foundation shut the link down");
                self.state.send_replace(LinkState::ShutDown);
                self.events.publish(LinkEvent::ShutDown);
                Ok(())
            }
            other @ (LinkMessage::Open { .. }
            | LinkMessage::GetVersionsReply { .. }
            | LinkMessage::SetVersionsReply { .. }) => {
                Err(LinkError::unexpected_reply("foundation request", other.describe()))
            }
        }
    }

    /// Role levels are negotiated only after the link level
    fn check_level_order(&self, level: NegotiationLevel, kind: &str) -> LinkResult<()> {
        if level == NegotiationLevel::Link || self.negotiated.read().contains_key(&NegotiationLevel::Link) {
            Ok(())
        } else {
            Err(LinkError::unexpected_reply(
                "Link level negotiation",
                format!("{kind}@{level}"),
            ))
        }
    }

    fn manager(&self, level: NegotiationLevel) -> Option<ApiManager> {
        if level != NegotiationLevel::Link && !self.role.levels().contains(&level) {
            return None;
        }
        Some(ApiManager::for_level(
            level,
            self.options.supported.clone(),
            Arc::clone(&self.options.factory),
        ))
    }

    fn store_level(&self, level: NegotiationLevel, mut installed: InstalledCategories) -> LinkResult<()> {
        let categories: BTreeSet<Category> = installed.categories().into_iter().collect();
        let typed = match level {
            NegotiationLevel::Link => extract::<LinkCategories>(&mut installed)?,
            NegotiationLevel::Shell => extract::<ShellCategories>(&mut installed)?,
            NegotiationLevel::Coplayer => extract::<CoplayerCategories>(&mut installed)?,
            NegotiationLevel::System => extract::<SystemCategories>(&mut installed)?,
            NegotiationLevel::AscribedGame => extract::<AscribedGameCategories>(&mut installed)?,
            NegotiationLevel::Tsm => extract::<TsmCategories>(&mut installed)?,
            NegotiationLevel::App => extract::<AppCategories>(&mut installed)?,
        };
        self.negotiated.write().insert(level, typed);
        self.installed.write().insert(level, categories);
        Ok(())
    }

    fn advance(&self, level: NegotiationLevel) {
        info!(%level, "Level negotiated");
        if level == NegotiationLevel::Link {
            *self.pending_levels.lock() = self.role.levels().into_iter().collect();
            self.state.send_if_modified(|state| {
                if *state == LinkState::LinkConnecting {
                    *state = LinkState::LinkNegotiated;
                    true
                } else {
                    false
                }
            });
        } else {
            self.pending_levels.lock().remove(&level);
        }

        if self.pending_levels.lock().is_empty() {
            self.state.send_if_modified(|state| match state {
                LinkState::LinkNegotiated | LinkState::RoleConnecting => {
                    *state = LinkState::RoleConnected;
                    true
                }
                _ => false,
            });
        }
        self.events.publish(LinkEvent::LevelNegotiated(level));
    }

    /// Record a negotiation failure and wake `connect()`
    fn fail(&self, error: LinkError) {
        warn!(category = error.category(), error = %error, "Negotiation failed");
        *self.failure.lock() = Some(error);
        self.state.send_modify(|_| {});
    }

    fn on_category(&self, level: NegotiationLevel, category: Category, kind: CategoryMessageKind, payload: Bytes) {
        let installed = self
            .installed
            .read()
            .get(&level)
            .is_some_and(|categories| categories.contains(&category));
        if !installed {
            warn!(%level, %category, ?kind, "Dropping message for uninstalled category");
            return;
        }

        match kind {
            CategoryMessageKind::Reply => {
                if !self.replies.resolve(level, category, payload) {
                    warn!(%level, %category, "Dropping reply without a pending request");
                }
            }
            CategoryMessageKind::TransactionalEvent => {
                self.options.transactional_events.on_event(level, category, payload)
            }
            CategoryMessageKind::NonTransactionalEvent | CategoryMessageKind::Notify => {
                self.options.non_transactional_events.on_event(level, category, payload)
            }
            CategoryMessageKind::Request => {
                warn!(%level, %category, "Dropping foundation request, no responder on the game side");
            }
        }
    }
}

fn extract<S: LevelCategorySet>(installed: &mut InstalledCategories) -> LinkResult<Arc<dyn Any + Send + Sync>> {
    Ok(Arc::new(S::from_installed(installed)?))
}
