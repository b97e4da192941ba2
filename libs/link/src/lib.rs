//! # Foundation Link
//!
//! Everything above the socket transport: the link wire messages, category
//! negotiation (API manager on the game side, controller on the foundation
//! side), the typed category handlers and the role state machine that
//! `Link::connect` drives.
//!
//! ## Negotiation
//!
//! Every level runs the same two exchanges, initiated by the foundation:
//!
//! 1. `GetVersions(ranges)` answered with offers for subscribed categories
//! 2. `SetVersions(selection)` answered with a single success flag
//!
//! The `Link` level is common to every role; the role's own levels follow.
//! An extension bin negotiates one level per inner link over the same
//! transport.

pub mod api_manager;
pub mod category;
pub mod controller;
pub mod error;
pub mod events;
pub mod handlers;
pub mod host;
pub mod link;
pub mod protocol;
pub mod role;

pub use api_manager::{ApiManager, SetVersionsOutcome};
pub use category::{
    Category, CategoryOffer, CategoryRange, CategorySubscription, CategoryVersion, SupportedVersions, Version,
};
pub use controller::{LinkController, NegotiationOutcome};
pub use error::{LinkError, LinkResult};
pub use events::{EventCallback, EventPublisher, LinkEvent, LoggingEventCallback};
pub use handlers::{
    ActionRequestCategory, AppInformationCategory, CategoryChannel, CategoryFactory, CategoryHandler,
    ChannelContext, CriticalDataStoreCategory, CultureCategory, DefaultCategoryFactory,
    GameCycleBettingCategory, GameCyclePlayCategory, GameInformationCategory, HistoryControlCategory,
    InstalledCategories, LinkControlCategory, ParcelCommunicationCategory, ReplyRouter,
    ShowControlCategory, SystemEventsCategory, TiltControlCategory, TsmControlCategory,
};
pub use host::{CategoryResponder, EchoResponder, HostOptions, HostSession};
pub use link::{ConnectOutcome, InnerLink, Link, LinkOptions, LinkState, DEFAULT_REPLY_TIMEOUT};
pub use protocol::{CategoryMessageKind, LinkHeaderSegment, LinkMessage, MessageKind, NegotiationLevel};
pub use role::{
    level_subscriptions, AppCategories, AscribedGameCategories, CoplayerCategories, InnerRole,
    LevelCategorySet, LinkCategories, Role, ShellCategories, SystemCategories, TsmCategories,
};
