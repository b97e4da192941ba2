//! Game/foundation sessions over loopback
//!
//! Each test binds a `TransportListener`, runs a `HostSession` on a spawned
//! task and drives a `Link` from the test body.

use bytes::Bytes;
use link::{
    Category, CategoryChannel, CategoryFactory, CategoryHandler, CategoryMessageKind, CategoryRange,
    ConnectOutcome, CultureCategory, DefaultCategoryFactory, EventCallback, HostOptions, HostSession,
    InnerLink, InnerRole, Link, LinkController, LinkError, LinkEvent, LinkMessage, LinkOptions,
    LinkState, NegotiationLevel, NegotiationOutcome, Role, Version,
};
use network::{SocketTransport, TransportConfig, TransportError, TransportListener};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);
const V1: Version = Version::new(1, 0);

async fn foundation() -> (TransportListener, SocketAddr) {
    let listener = TransportListener::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn game(addr: SocketAddr, role: Role, options: LinkOptions) -> Link {
    let transport = SocketTransport::client(TransportConfig::new("127.0.0.1", addr.port()));
    Link::new(role, transport, options)
}

/// Accept one game and negotiate its whole role
fn full_host(listener: TransportListener) -> JoinHandle<(HostSession, Vec<NegotiationOutcome>)> {
    tokio::spawn(async move {
        let session = HostSession::accept(&listener, HostOptions::default()).await.unwrap();
        let outcomes = session.negotiate_role().await.unwrap();
        (session, outcomes)
    })
}

async fn connect(link: &Link) -> Result<ConnectOutcome, LinkError> {
    tokio::time::timeout(WAIT, link.connect()).await.expect("connect hung")
}

struct EventCollector {
    tx: mpsc::UnboundedSender<(NegotiationLevel, Category, Bytes)>,
}

impl EventCallback for EventCollector {
    fn on_event(&self, level: NegotiationLevel, category: Category, payload: Bytes) {
        let _ = self.tx.send((level, category, payload));
    }
}

#[tokio::test]
async fn test_coplayer_connects_with_all_categories() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Coplayer { id: 2 }, LinkOptions::default());

    assert_eq!(connect(&link).await.unwrap(), ConnectOutcome::Connected);
    assert_eq!(link.state(), LinkState::RoleConnected);

    let (session, outcomes) = host.await.unwrap();
    assert_eq!(session.role(), &Role::Coplayer { id: 2 });
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.accepted));

    let common = link.link_categories().unwrap();
    assert_eq!(common.action_request.version(), V1);
    let coplayer = link.coplayer().unwrap();
    assert_eq!(coplayer.game_cycle_play.version(), V1);
    assert!(coplayer.culture.is_some());
    assert!(link.shell().is_none());

    link.disconnect().await.unwrap();
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(link.coplayer().is_none());
}

#[tokio::test]
async fn test_optional_category_left_out_still_connects() {
    let (listener, addr) = foundation().await;
    let host = tokio::spawn(async move {
        let session = HostSession::accept(&listener, HostOptions::default()).await.unwrap();
        session.negotiate_level(NegotiationLevel::Link).await.unwrap();
        let required_only = LinkController::new(
            NegotiationLevel::Shell,
            vec![
                CategoryRange::new(Category::GameInformation, V1, V1),
                CategoryRange::new(Category::CriticalDataStore, V1, V1),
                CategoryRange::new(Category::TiltControl, V1, V1),
            ],
        );
        let outcome = session.negotiate_with(&required_only).await.unwrap();
        (session, outcome)
    });

    let link = game(addr, Role::Shell, LinkOptions::default());
    assert_eq!(connect(&link).await.unwrap(), ConnectOutcome::Connected);

    let shell = link.shell().unwrap();
    assert!(shell.culture.is_none());
    assert!(shell.show_control.is_none());
    assert_eq!(shell.tilt_control.version(), V1);

    let (_session, outcome) = host.await.unwrap();
    assert!(outcome.accepted);
}

#[tokio::test]
async fn test_required_category_missing_fails_connect() {
    let (listener, addr) = foundation().await;
    let host = tokio::spawn(async move {
        let session = HostSession::accept(&listener, HostOptions::default()).await.unwrap();
        session.negotiate_level(NegotiationLevel::Link).await.unwrap();
        let nothing = LinkController::new(NegotiationLevel::Shell, Vec::new());
        let outcome = session.negotiate_with(&nothing).await.unwrap();
        (session, outcome)
    });

    let link = game(addr, Role::Shell, LinkOptions::default());
    match connect(&link).await {
        Err(LinkError::NegotiationFailed { level, missing }) => {
            assert_eq!(level, NegotiationLevel::Shell);
            assert_eq!(
                missing,
                vec![Category::GameInformation, Category::CriticalDataStore, Category::TiltControl]
            );
        }
        other => panic!("expected negotiation failure, got {other:?}"),
    }
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(link.link_categories().is_none());

    let (_session, outcome) = host.await.unwrap();
    assert!(!outcome.accepted);
}

#[tokio::test]
async fn test_shutdown_releases_blocked_connect() {
    let (listener, addr) = foundation().await;
    let host = tokio::spawn(async move {
        let session = HostSession::accept(&listener, HostOptions::default()).await.unwrap();
        session.negotiate_level(NegotiationLevel::Link).await.unwrap();
        session.shut_down().await.unwrap();
        session
    });

    let link = game(addr, Role::Coplayer { id: 0 }, LinkOptions::default());
    let mut events = link.subscribe_events();

    assert_eq!(connect(&link).await.unwrap(), ConnectOutcome::ShutDown);
    assert_eq!(link.state(), LinkState::ShutDown);
    assert!(link.link_categories().is_some());
    assert!(link.coplayer().is_none());

    assert_eq!(
        events.recv().await,
        Some(LinkEvent::LevelNegotiated(NegotiationLevel::Link))
    );
    assert_eq!(events.recv().await, Some(LinkEvent::ShutDown));

    let _session = host.await.unwrap();
    link.disconnect().await.unwrap();
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_extension_bin_negotiates_each_inner_link() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let role = Role::ExtensionBin(vec![InnerRole::System, InnerRole::Tsm]);
    let link = game(addr, role, LinkOptions::default());

    assert_eq!(connect(&link).await.unwrap(), ConnectOutcome::Connected);
    let (_session, outcomes) = host.await.unwrap();
    let levels: Vec<_> = outcomes.iter().map(|outcome| outcome.level).collect();
    assert_eq!(
        levels,
        vec![NegotiationLevel::Link, NegotiationLevel::System, NegotiationLevel::Tsm]
    );

    assert!(link.is_inner_link_connected(InnerRole::System));
    assert!(link.is_inner_link_connected(InnerRole::Tsm));
    assert!(!link.is_inner_link_connected(InnerRole::App));
    match link.inner_link(InnerRole::Tsm) {
        Some(InnerLink::Tsm(tsm)) => assert_eq!(tsm.tsm_control.version(), V1),
        other => panic!("expected Tsm categories, got {other:?}"),
    }
    assert!(link.inner_link(InnerRole::App).is_none());
}

#[tokio::test]
async fn test_category_request_answered_by_foundation() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Coplayer { id: 1 }, LinkOptions::default());
    connect(&link).await.unwrap();
    let (_session, _) = host.await.unwrap();

    let coplayer = link.coplayer().unwrap();
    let reply = coplayer.game_cycle_play.request(&b"start cycle"[..]).await.unwrap();
    assert_eq!(&reply[..], b"start cycle");
    assert_eq!(coplayer.game_cycle_betting.commit_bet(250).await.unwrap(), 250);
}

#[tokio::test]
async fn test_events_reach_callbacks_and_unknown_categories_drop() {
    let (transactional_tx, mut transactional) = mpsc::unbounded_channel();
    let (non_transactional_tx, mut non_transactional) = mpsc::unbounded_channel();
    let options = LinkOptions::default().with_event_callbacks(
        Arc::new(EventCollector { tx: transactional_tx }),
        Arc::new(EventCollector { tx: non_transactional_tx }),
    );

    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Coplayer { id: 1 }, options);
    connect(&link).await.unwrap();
    let (session, _) = host.await.unwrap();

    // Shell categories were never installed on a coplayer link
    session
        .send_event(NegotiationLevel::Shell, Category::ShowControl, true, &b"ignored"[..])
        .await
        .unwrap();
    session
        .send_event(NegotiationLevel::Coplayer, Category::GameCyclePlay, true, &b"cycle"[..])
        .await
        .unwrap();
    session
        .send_event(NegotiationLevel::Link, Category::LinkControl, false, &b"tick"[..])
        .await
        .unwrap();

    let (level, category, payload) = tokio::time::timeout(WAIT, transactional.recv()).await.unwrap().unwrap();
    assert_eq!((level, category), (NegotiationLevel::Coplayer, Category::GameCyclePlay));
    assert_eq!(&payload[..], b"cycle");

    let (level, category, _) = tokio::time::timeout(WAIT, non_transactional.recv()).await.unwrap().unwrap();
    assert_eq!((level, category), (NegotiationLevel::Link, Category::LinkControl));
}

#[tokio::test]
async fn test_game_notification_reaches_foundation() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Shell, LinkOptions::default());
    connect(&link).await.unwrap();
    let (session, _) = host.await.unwrap();

    let culture = link.shell().unwrap().culture.clone().unwrap();
    culture.send(&b"de-DE"[..]).await.unwrap();

    let inbound = tokio::time::timeout(WAIT, session.next_inbound()).await.unwrap().unwrap();
    assert_eq!(
        inbound,
        LinkMessage::Category {
            level: NegotiationLevel::Shell,
            category: Category::Culture,
            kind: CategoryMessageKind::Notify,
            payload: Bytes::from_static(b"de-DE"),
        }
    );
}

#[tokio::test]
async fn test_foundation_dropping_connection_fails_connect() {
    let (listener, addr) = foundation().await;
    let host = tokio::spawn(async move {
        let session = HostSession::accept(&listener, HostOptions::default()).await.unwrap();
        session.close().await;
    });

    let link = game(addr, Role::Shell, LinkOptions::default());
    let error = connect(&link).await.unwrap_err();
    assert!(matches!(error, LinkError::Transport(_)), "{error:?}");
    assert_eq!(link.state(), LinkState::Disconnected);
    host.await.unwrap();
}

#[tokio::test]
async fn test_foundation_dropping_connected_link_tears_it_down() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Shell, LinkOptions::default());
    let mut events = link.subscribe_events();

    assert_eq!(connect(&link).await.unwrap(), ConnectOutcome::Connected);
    assert!(link.shell().is_some());
    let (session, _) = host.await.unwrap();
    session.close().await;

    let failed = tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if event == LinkEvent::TransportFailed {
                return true;
            }
        }
        false
    })
    .await
    .expect("no transport failure event");
    assert!(failed);

    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(link.shell().is_none());
    assert!(link.link_categories().is_none());
    assert!(link.installed_categories(NegotiationLevel::Shell).is_empty());
    assert!(!link.transport().is_connected());
    assert!(!link.transport().exception_monitor().has_exception());
}

#[tokio::test]
async fn test_disconnect_after_connect_raises_no_failure() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Shell, LinkOptions::default());

    connect(&link).await.unwrap();
    let (session, _) = host.await.unwrap();
    let mut events = link.subscribe_events();
    link.disconnect().await.unwrap();
    session.close().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let link = game(addr, Role::Shell, LinkOptions::default());
    connect(&link).await.unwrap();
    let _host = host.await.unwrap();

    assert!(matches!(link.connect().await, Err(LinkError::AlreadyConnected)));
    assert_eq!(link.state(), LinkState::RoleConnected);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (listener, addr) = foundation().await;
    let listener = Arc::new(listener);
    let link = game(addr, Role::Shell, LinkOptions::default());

    for _ in 0..2 {
        let listener = Arc::clone(&listener);
        let host = tokio::spawn(async move {
            let session = HostSession::accept(&listener, HostOptions::default()).await.unwrap();
            session.negotiate_role().await.unwrap();
            session
        });
        assert_eq!(connect(&link).await.unwrap(), ConnectOutcome::Connected);
        let session = host.await.unwrap();
        link.disconnect().await.unwrap();
        session.close().await;
    }
    assert_eq!(link.state(), LinkState::Disconnected);
}

/// Installs a `CultureCategory` whatever category is selected
struct MislabellingFactory;

impl CategoryFactory for MislabellingFactory {
    fn create(&self, channel: CategoryChannel) -> Option<Arc<dyn CategoryHandler>> {
        if channel.category() == Category::TiltControl {
            Some(Arc::new(CultureCategory::new(channel)))
        } else {
            DefaultCategoryFactory.create(channel)
        }
    }
}

#[tokio::test]
async fn test_wrong_handler_type_is_internal_fault() {
    let (listener, addr) = foundation().await;
    let host = full_host(listener);
    let options = LinkOptions::default().with_factory(Arc::new(MislabellingFactory));
    let link = game(addr, Role::Shell, options);

    let error = connect(&link).await.unwrap_err();
    assert!(matches!(error, LinkError::Internal { .. }), "{error:?}");

    let (_session, outcomes) = host.await.unwrap();
    assert!(!outcomes.last().unwrap().accepted);
}

#[tokio::test]
async fn test_pending_request_fails_on_disconnect() {
    let (listener, addr) = foundation().await;
    let host = tokio::spawn(async move {
        let session = HostSession::accept(
            &listener,
            HostOptions::default().with_responder(Arc::new(SilentResponder)),
        )
        .await
        .unwrap();
        session.negotiate_role().await.unwrap();
        session
    });
    let link = game(addr, Role::Coplayer { id: 1 }, LinkOptions::default());
    connect(&link).await.unwrap();
    let _session = host.await.unwrap();

    let play = link.coplayer().unwrap().game_cycle_play.clone();
    let request = tokio::spawn(async move { play.request(&b"never answered"[..]).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    link.disconnect().await.unwrap();

    let result = tokio::time::timeout(WAIT, request).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(LinkError::NotConnected) | Err(LinkError::Transport(TransportError::NotConnected))
    ));
}

struct SilentResponder;

impl link::CategoryResponder for SilentResponder {
    fn respond(&self, _level: NegotiationLevel, _category: Category, _payload: Bytes) -> Option<Bytes> {
        None
    }
}
