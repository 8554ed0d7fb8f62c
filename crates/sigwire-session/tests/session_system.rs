//! Integration tests: a session actor talking to a stand-in coordinator
//! over loopback UDP.

use std::time::Duration;

use sigwire_protocol::{ErrorCode, Tag, Value};
use sigwire_session::{
    HookFailure, SessionConfig, SessionError, SessionHandle, SessionHooks, SessionState, spawn_session,
};
use sigwire_transport::{DispatchTarget, Endpoint, EndpointConfig, Incoming, Receiver};
use tokio::sync::mpsc;

const ANNOUNCE: &str = "/nsm/server/announce";

// =========================================================================
// Helpers
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct CoordRoute(Tag);

impl From<Tag> for CoordRoute {
    fn from(tag: Tag) -> Self {
        Self(tag)
    }
}

/// The coordinator's side: a bare endpoint we drive by hand.
struct Coordinator {
    endpoint: Endpoint<CoordRoute>,
    receiver: Receiver,
}

impl Coordinator {
    async fn bind() -> Self {
        let (endpoint, receiver) = Endpoint::bind(&EndpointConfig::default())
            .await
            .expect("coordinator should bind");
        Self { endpoint, receiver }
    }

    fn url(&self) -> String {
        self.endpoint.url().to_string()
    }

    /// Waits for the next message to `address`, skipping others.
    async fn expect(&mut self, address: &str) -> Incoming {
        for _ in 0..30 {
            for incoming in self.receiver.wait(Duration::from_millis(100)).await {
                if incoming.message.address == address {
                    return incoming;
                }
            }
        }
        panic!("coordinator never received {address}");
    }
}

/// Forwards every hook call as a line of text.
struct Events(mpsc::UnboundedSender<String>);

impl DispatchTarget for Events {
    fn handle_error(&mut self, path: &str, code: ErrorCode, _text: &str) -> bool {
        let _ = self.0.send(format!("error {path} {}", code.code()));
        !code.is_ok()
    }
}

impl SessionHooks for Events {
    fn open(&mut self, path: &str, _display_name: &str, client_id: &str) -> Result<(), HookFailure> {
        let _ = self.0.send(format!("open {path} {client_id}"));
        Ok(())
    }

    fn save(&mut self) -> Result<(), HookFailure> {
        let _ = self.0.send("save".into());
        Err(HookFailure::new(ErrorCode::SaveFailed, "read-only"))
    }

    fn label(&mut self, text: &str) {
        let _ = self.0.send(format!("label {text}"));
    }

    fn loaded(&mut self) {
        let _ = self.0.send("loaded".into());
    }

    fn show(&mut self, _path: &str) {}

    fn hide(&mut self, _path: &str) {}

    fn handle_broadcast(&mut self, address: &str, _signature: &str, _args: &[Value]) {
        let _ = self.0.send(format!("broadcast {address}"));
    }
}

fn config(coordinator: &Coordinator) -> SessionConfig {
    SessionConfig {
        poll_interval_ms: 10,
        ..SessionConfig::new("MyApp", "myapp")
            .with_capabilities(":dirty:")
            .with_coordinator(coordinator.url())
    }
}

async fn spawn(config: SessionConfig) -> (SessionHandle, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = spawn_session(config, Events(tx)).await.expect("session should bind");
    (handle, rx)
}

async fn expect_event(rx: &mut mpsc::UnboundedReceiver<String>, want: &str) {
    let found = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(event) = rx.recv().await {
            if event == want {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "never saw event {want:?}");
}

async fn eventually_state(handle: &SessionHandle, want: SessionState) {
    for _ in 0..300 {
        if handle.info().await.unwrap().state == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {want}");
}

/// Announces and accepts, returning the client's address.
async fn handshake(coord: &mut Coordinator, handle: &SessionHandle) -> std::net::SocketAddr {
    handle.announce().await.unwrap();
    let announce = coord.expect(ANNOUNCE).await;
    coord
        .endpoint
        .send(
            announce.source,
            "/reply",
            (ANNOUNCE, "Acknowledged", "CoordinatorName", ":dirty:broadcast:"),
        )
        .unwrap();
    eventually_state(handle, SessionState::Active).await;
    announce.source
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_announce_and_reply_make_session_active() {
    let mut coord = Coordinator::bind().await;
    let (handle, _events) = spawn(config(&coord)).await;

    handle.announce().await.unwrap();
    let announce = coord.expect(ANNOUNCE).await;
    assert_eq!(announce.message.signature(), "sssiii");
    assert_eq!(announce.message.arg_str(0).unwrap(), "MyApp");
    assert_eq!(announce.message.arg_str(1).unwrap(), ":dirty:");

    coord
        .endpoint
        .send(
            announce.source,
            "/reply",
            (ANNOUNCE, "Acknowledged", "CoordinatorName", ":dirty:broadcast:"),
        )
        .unwrap();
    eventually_state(&handle, SessionState::Active).await;

    assert!(handle.is_active());
    let info = handle.info().await.unwrap();
    assert_eq!(info.manager, "CoordinatorName");
    assert!(info.active);
}

#[tokio::test]
async fn test_announce_error_leaves_session_inactive() {
    let mut coord = Coordinator::bind().await;
    let (handle, mut events) = spawn(config(&coord)).await;

    handle.announce().await.unwrap();
    let announce = coord.expect(ANNOUNCE).await;
    coord
        .endpoint
        .send(announce.source, "/error", (ANNOUNCE, -2, "incompatible API version"))
        .unwrap();

    expect_event(&mut events, "error /nsm/server/announce -2").await;
    eventually_state(&handle, SessionState::Disconnected).await;
    assert!(!handle.is_active());
}

#[tokio::test]
async fn test_announce_without_reply_times_out() {
    let coord = Coordinator::bind().await;
    let config = SessionConfig {
        announce_timeout_ms: 300,
        ..config(&coord)
    };
    let (handle, _events) = spawn(config).await;

    handle.announce().await.unwrap();
    assert_eq!(handle.info().await.unwrap().state, SessionState::Announcing);
    eventually_state(&handle, SessionState::Disconnected).await;
    assert!(!handle.is_active());
}

// =========================================================================
// Commands and reports
// =========================================================================

#[tokio::test]
async fn test_open_is_dispatched_and_replied() {
    let mut coord = Coordinator::bind().await;
    let (handle, mut events) = spawn(config(&coord)).await;
    let client = handshake(&mut coord, &handle).await;

    coord
        .endpoint
        .send(client, "/nsm/client/open", ("/sessions/demo/MyApp.nABCD", "MyApp", "nABCD"))
        .unwrap();
    expect_event(&mut events, "open /sessions/demo/MyApp.nABCD nABCD").await;

    let reply = coord.expect("/reply").await;
    assert_eq!(reply.message.args_as_text(), vec!["/nsm/client/open", "OK"]);
    assert_eq!(handle.info().await.unwrap().client_id, "nABCD");
}

#[tokio::test]
async fn test_failed_save_is_replied_as_error() {
    let mut coord = Coordinator::bind().await;
    let (handle, mut events) = spawn(config(&coord)).await;
    let client = handshake(&mut coord, &handle).await;

    coord.endpoint.send(client, "/nsm/client/save", ()).unwrap();
    expect_event(&mut events, "save").await;

    let error = coord.expect("/error").await;
    assert_eq!(error.message.args_as_text(), vec!["/nsm/client/save", "-99", "read-only"]);
}

#[tokio::test]
async fn test_dirty_changes_reach_coordinator() {
    let mut coord = Coordinator::bind().await;
    let (handle, _events) = spawn(config(&coord)).await;
    handshake(&mut coord, &handle).await;

    assert!(handle.set_dirty(true).await.unwrap());
    coord.expect("/nsm/client/is_dirty").await;
    assert!(handle.set_dirty(false).await.unwrap());
    coord.expect("/nsm/client/is_clean").await;

    let info = handle.info().await.unwrap();
    assert_eq!(info.dirty_count, 1);
    assert!(!info.dirty);
}

#[tokio::test]
async fn test_unknown_message_reaches_broadcast_hook() {
    let mut coord = Coordinator::bind().await;
    let (handle, mut events) = spawn(config(&coord)).await;
    let client = handshake(&mut coord, &handle).await;

    coord.endpoint.send(client, "/app/sync", ("tempo", 120)).unwrap();
    expect_event(&mut events, "broadcast /app/sync").await;
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_shutdown_then_join_then_unavailable() {
    let coord = Coordinator::bind().await;
    let (handle, _events) = spawn(config(&coord)).await;

    handle.shutdown().await.unwrap();
    handle.join().await;
    handle.join().await;

    assert!(matches!(handle.info().await, Err(SessionError::Unavailable)));
    assert!(matches!(handle.announce().await, Err(SessionError::Unavailable)));
}

#[tokio::test]
async fn test_spawn_with_bad_coordinator_url_fails() {
    let config = SessionConfig::new("MyApp", "myapp").with_coordinator("not a url");
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = spawn_session(config, Events(tx)).await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
}

#[tokio::test]
async fn test_message_without_capability_is_not_sent() {
    let mut coord = Coordinator::bind().await;
    let (handle, _events) = spawn(config(&coord)).await;
    handshake(&mut coord, &handle).await;

    assert!(!handle.message(1, "hello").await.unwrap());
    assert!(!handle.progress(0.5).await.unwrap());
}
