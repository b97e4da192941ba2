//! # Category Handlers
//!
//! A handler is what a negotiation hands to the application: a typed object
//! bound to one category at its negotiated version. Every handler wraps a
//! [`CategoryChannel`], which frames category payloads as link messages and
//! pairs requests with their replies.
//!
//! Handlers are created by a [`CategoryFactory`] while a `SetVersions` is
//! being processed and collected in [`InstalledCategories`], from which a
//! level extracts the concrete types it exposes.

use crate::category::{Category, Version};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{CategoryMessageKind, LinkMessage, NegotiationLevel};
use bytes::Bytes;
use codec::{AmountSegment, BinaryMessage, MessageReader};
use network::MessageSink;
use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

type ReplyKey = (NegotiationLevel, Category);

/// Category requests waiting for their reply, one per (level, category)
#[derive(Clone, Default)]
pub struct ReplyRouter {
    pending: Arc<Mutex<HashMap<ReplyKey, oneshot::Sender<Bytes>>>>,
}

impl fmt::Debug for ReplyRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyRouter")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, level: NegotiationLevel, category: Category) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert((level, category), tx);
        rx
    }

    fn cancel(&self, level: NegotiationLevel, category: Category) {
        self.pending.lock().remove(&(level, category));
    }

    /// Complete the pending request; false if nobody was waiting
    pub fn resolve(&self, level: NegotiationLevel, category: Category, payload: Bytes) -> bool {
        let waiter = self.pending.lock().remove(&(level, category));
        match waiter {
            Some(waiter) => waiter.send(payload).is_ok(),
            None => false,
        }
    }

    /// Fail every pending request with `NotConnected`
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

/// What a negotiation needs to bind handlers to the wire
#[derive(Clone)]
pub struct ChannelContext {
    pub sink: Arc<dyn MessageSink>,
    pub replies: ReplyRouter,
    pub reply_timeout: Duration,
}

impl ChannelContext {
    pub fn new(sink: Arc<dyn MessageSink>, replies: ReplyRouter, reply_timeout: Duration) -> Self {
        Self {
            sink,
            replies,
            reply_timeout,
        }
    }

    pub fn channel(&self, level: NegotiationLevel, category: Category, version: Version) -> CategoryChannel {
        CategoryChannel {
            level,
            category,
            version,
            sink: Arc::clone(&self.sink),
            replies: self.replies.clone(),
            request_lock: Arc::new(tokio::sync::Mutex::new(())),
            reply_timeout: self.reply_timeout,
        }
    }
}

/// Wire binding of one negotiated category
#[derive(Clone)]
pub struct CategoryChannel {
    level: NegotiationLevel,
    category: Category,
    version: Version,
    sink: Arc<dyn MessageSink>,
    replies: ReplyRouter,
    request_lock: Arc<tokio::sync::Mutex<()>>,
    reply_timeout: Duration,
}

impl fmt::Debug for CategoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategoryChannel")
            .field("level", &self.level)
            .field("category", &self.category)
            .field("version", &self.version)
            .finish()
    }
}

impl CategoryChannel {
    pub fn level(&self) -> NegotiationLevel {
        self.level
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn version(&self) -> Version {
        self.version
    }

    async fn post(&self, kind: CategoryMessageKind, payload: Bytes) -> LinkResult<()> {
        let message = LinkMessage::Category {
            level: self.level,
            category: self.category,
            kind,
            payload,
        }
        .encode()?;
        self.sink.send_message(message).await?;
        Ok(())
    }

    /// Fire-and-forget notification
    pub async fn send(&self, payload: impl Into<Bytes>) -> LinkResult<()> {
        self.post(CategoryMessageKind::Notify, payload.into()).await
    }

    /// Send a request and wait for the category's reply
    ///
    /// Requests on one category are serialized. Must not be awaited from an
    /// event callback: those run on the receive task that delivers the reply.
    pub async fn request(&self, payload: impl Into<Bytes>) -> LinkResult<Bytes> {
        let _serialized = self.request_lock.lock().await;
        let reply = self.replies.register(self.level, self.category);

        if let Err(e) = self.post(CategoryMessageKind::Request, payload.into()).await {
            self.replies.cancel(self.level, self.category);
            return Err(e);
        }

        match tokio::time::timeout(self.reply_timeout, reply).await {
            Ok(Ok(payload)) => {
                debug!(level = %self.level, category = %self.category, bytes = payload.len(), "Category reply received");
                Ok(payload)
            }
            Ok(Err(_)) => Err(LinkError::NotConnected),
            Err(_) => {
                self.replies.cancel(self.level, self.category);
                Err(LinkError::timeout(
                    format!("{} reply", self.category),
                    self.reply_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Request carrying a CRC-protected amount, answered by another
    pub async fn request_amount(&self, amount: i64) -> LinkResult<i64> {
        let request = BinaryMessage::new().with(AmountSegment::new(amount)).to_bytes()?;
        let reply = self.request(request).await?;
        let mut reader = MessageReader::new(&reply);
        let answered = reader.read::<AmountSegment>()?;
        reader.expect_exhausted("amount reply")?;
        Ok(answered.value)
    }
}

/// Installed, typed category object
pub trait CategoryHandler: Any + Send + Sync + fmt::Debug {
    fn channel(&self) -> &CategoryChannel;

    fn category(&self) -> Category {
        self.channel().category()
    }

    fn version(&self) -> Version {
        self.channel().version()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

macro_rules! category_handler {
    ($(#[$doc:meta])* $name:ident => $category:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            channel: CategoryChannel,
        }

        impl $name {
            pub const CATEGORY: Category = Category::$category;

            pub fn new(channel: CategoryChannel) -> Self {
                Self { channel }
            }

            pub fn version(&self) -> Version {
                self.channel.version()
            }

            pub async fn send(&self, payload: impl Into<Bytes>) -> LinkResult<()> {
                self.channel.send(payload).await
            }

            pub async fn request(&self, payload: impl Into<Bytes>) -> LinkResult<Bytes> {
                self.channel.request(payload).await
            }
        }

        impl CategoryHandler for $name {
            fn channel(&self) -> &CategoryChannel {
                &self.channel
            }

            fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
                self
            }
        }
    };
}

category_handler!(
    /// Action requests raised by the foundation or the game
    ActionRequestCategory => ActionRequest
);
category_handler!(
    /// Link-wide control
    LinkControlCategory => LinkControl
);
category_handler!(
    /// Game-cycle play sequencing
    GameCyclePlayCategory => GameCyclePlay
);
category_handler!(
    /// Bet placement and credit movement
    GameCycleBettingCategory => GameCycleBetting
);
category_handler!(
    /// Persistent storage of critical game data
    CriticalDataStoreCategory => CriticalDataStore
);
category_handler!(TiltControlCategory => TiltControl);
category_handler!(ParcelCommunicationCategory => ParcelCommunication);
category_handler!(
    /// Language and locale selection
    CultureCategory => Culture
);
category_handler!(ShowControlCategory => ShowControl);
category_handler!(HistoryControlCategory => HistoryControl);
category_handler!(GameInformationCategory => GameInformation);
category_handler!(SystemEventsCategory => SystemEvents);
category_handler!(TsmControlCategory => TsmControl);
category_handler!(AppInformationCategory => AppInformation);

impl GameCycleBettingCategory {
    /// Commit a bet; the foundation answers with the resulting credit balance
    pub async fn commit_bet(&self, amount: i64) -> LinkResult<i64> {
        self.channel.request_amount(amount).await
    }
}

/// Builds the handler object for a selected category
pub trait CategoryFactory: Send + Sync {
    /// `None` declines the category; it is then not installed
    fn create(&self, channel: CategoryChannel) -> Option<Arc<dyn CategoryHandler>>;
}

/// Factory for the typed handlers above
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCategoryFactory;

impl CategoryFactory for DefaultCategoryFactory {
    fn create(&self, channel: CategoryChannel) -> Option<Arc<dyn CategoryHandler>> {
        let handler: Arc<dyn CategoryHandler> = match channel.category() {
            Category::ActionRequest => Arc::new(ActionRequestCategory::new(channel)),
            Category::LinkControl => Arc::new(LinkControlCategory::new(channel)),
            Category::GameCyclePlay => Arc::new(GameCyclePlayCategory::new(channel)),
            Category::GameCycleBetting => Arc::new(GameCycleBettingCategory::new(channel)),
            Category::CriticalDataStore => Arc::new(CriticalDataStoreCategory::new(channel)),
            Category::TiltControl => Arc::new(TiltControlCategory::new(channel)),
            Category::ParcelCommunication => Arc::new(ParcelCommunicationCategory::new(channel)),
            Category::Culture => Arc::new(CultureCategory::new(channel)),
            Category::ShowControl => Arc::new(ShowControlCategory::new(channel)),
            Category::HistoryControl => Arc::new(HistoryControlCategory::new(channel)),
            Category::GameInformation => Arc::new(GameInformationCategory::new(channel)),
            Category::SystemEvents => Arc::new(SystemEventsCategory::new(channel)),
            Category::TsmControl => Arc::new(TsmControlCategory::new(channel)),
            Category::AppInformation => Arc::new(AppInformationCategory::new(channel)),
        };
        Some(handler)
    }
}

/// Handlers installed by one successful `SetVersions`
#[derive(Debug, Default)]
pub struct InstalledCategories {
    handlers: BTreeMap<Category, Arc<dyn CategoryHandler>>,
}

impl InstalledCategories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; false if its category is already installed
    pub fn insert(&mut self, handler: Arc<dyn CategoryHandler>) -> bool {
        let category = handler.category();
        if self.handlers.contains_key(&category) {
            return false;
        }
        self.handlers.insert(category, handler);
        true
    }

    pub fn contains(&self, category: Category) -> bool {
        self.handlers.contains_key(&category)
    }

    pub fn categories(&self) -> Vec<Category> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Remove the handler for `category` as concrete type `T`
    ///
    /// Absent is `Ok(None)`. A handler of another type is an internal fault,
    /// not a negotiation failure.
    pub fn take<T: CategoryHandler>(&mut self, category: Category) -> LinkResult<Option<Arc<T>>> {
        let Some(handler) = self.handlers.remove(&category) else {
            return Ok(None);
        };
        handler.into_any().downcast::<T>().map(Some).map_err(|_| {
            LinkError::internal(format!(
                "handler installed for {category} is not a {}",
                type_name::<T>()
            ))
        })
    }
}
