//! A real hub pushing to a session backed by an in-memory page.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hotpatch_client::browser::{NavigationListener, ResourceListener};
use hotpatch_client::{
    ApplyStatus, BrowserApi, BrowserFuture, ClientError, ConnectionState, ResourceHandle,
    ResourceKind, RetryPolicy, Session, SessionConfig, Status, StatusReport, StatusSink,
    StatusTracker, SubscriptionId,
};
use hotpatch_hub::{BroadcastHub, HubConfig};
use hotpatch_protocol::{MatchKind, Message, ResourceUpdate};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const LOCATION: &str = "http://localhost:3000/app/";

struct Page {
    resources: Vec<ResourceHandle>,
    applied: Mutex<Vec<(String, String)>>,
    reloads: AtomicU64,
    next_id: AtomicU64,
}

impl Page {
    fn new(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            resources: urls
                .iter()
                .enumerate()
                .map(|(i, url)| ResourceHandle::new(i as u64, *url, ResourceKind::Script))
                .collect(),
            applied: Mutex::new(Vec::new()),
            reloads: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        })
    }

    fn applied(&self) -> Vec<(String, String)> {
        self.applied.lock().unwrap().clone()
    }
}

impl BrowserApi for Page {
    fn inspected_location(&self) -> BrowserFuture<'_, Option<String>> {
        Box::pin(async { Some(LOCATION.to_string()) })
    }

    fn inspected_host(&self) -> BrowserFuture<'_, Option<String>> {
        Box::pin(async { Some("localhost".to_string()) })
    }

    fn enumerate_resources(&self) -> BrowserFuture<'_, Vec<ResourceHandle>> {
        Box::pin(async move { self.resources.clone() })
    }

    fn on_resource_added(&self, _listener: ResourceListener) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn on_navigated(&self, _listener: NavigationListener) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}

    fn set_content<'a>(
        &'a self,
        resource: &'a ResourceHandle,
        contents: &'a str,
        _preserve_state: bool,
    ) -> BrowserFuture<'a, ApplyStatus> {
        Box::pin(async move {
            self.applied
                .lock()
                .unwrap()
                .push((resource.url().to_string(), contents.to_string()));
            ApplyStatus::ok()
        })
    }

    fn reload(&self) -> BrowserFuture<'_, ()> {
        Box::pin(async move {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn eval_in_page<'a>(&'a self, _script: &'a str) -> BrowserFuture<'a, ()> {
        Box::pin(async {})
    }
}

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<Status>>,
    diagnostics: Mutex<Vec<String>>,
}

impl StatusSink for Recorder {
    fn status_changed(&self, report: &StatusReport) {
        self.statuses.lock().unwrap().push(report.status);
    }

    fn diagnostic(&self, error: &ClientError) {
        self.diagnostics.lock().unwrap().push(error.to_string());
    }
}

struct Harness {
    hub: Arc<BroadcastHub>,
    page: Arc<Page>,
    recorder: Arc<Recorder>,
    session: Session<Page>,
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Starts a hub on `port` (0 for any) and returns it with the bound port.
async fn start_hub(port: u16) -> (Arc<BroadcastHub>, u16) {
    let hub = BroadcastHub::new(HubConfig {
        host: "127.0.0.1".into(),
        port,
        ..HubConfig::default()
    });
    let runner = Arc::clone(&hub);
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    for _ in 0..100 {
        let port = hub.port().await;
        if port > 0 {
            return (hub, port);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub did not bind");
}

/// Builds a session for a page without starting it.
fn page_session(
    port: u16,
    urls: &[&str],
    retry: RetryPolicy,
) -> (Arc<Page>, Arc<Recorder>, Arc<StatusTracker>, Session<Page>) {
    let page = Page::new(urls);
    let recorder = Arc::new(Recorder::default());
    let tracker = Arc::new(StatusTracker::new(recorder.clone()));
    let mut config = SessionConfig::new("127.0.0.1", port);
    config.retry = retry;
    let session = Session::new(config, page.clone(), Arc::clone(&tracker));
    (page, recorder, tracker, session)
}

/// Waits until the hub holds `count` connections that all sent a base URL.
async fn wait_for_handshakes(hub: &BroadcastHub, count: usize) {
    for _ in 0..200 {
        let connections = hub.connections().await;
        if connections.len() == count && connections.iter().all(|c| c.base_url.is_some()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub did not receive {count} handshakes");
}

async fn setup(urls: &[&str]) -> Harness {
    let (hub, port) = start_hub(0).await;
    let (page, recorder, _, session) = page_session(port, urls, RetryPolicy::default());

    tokio::time::timeout(Duration::from_secs(5), session.start())
        .await
        .expect("session started in time")
        .expect("session connected");
    wait_for_handshakes(&hub, 1).await;

    Harness {
        hub,
        page,
        recorder,
        session,
    }
}

#[tokio::test]
async fn handshake_registers_page_location() {
    let h = setup(&[]).await;

    let connections = h.hub.connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].base_url.as_deref(), Some(LOCATION));
    assert_eq!(
        *h.recorder.statuses.lock().unwrap(),
        vec![Status::Connecting, Status::Connected, Status::Started]
    );

    h.session.destroy().await;
    h.hub.close().await;
}

#[tokio::test]
async fn exact_match_update_reaches_resource() {
    let h = setup(&["http://wat/x", "http://wat"]).await;

    let update = ResourceUpdate::new("http://wat", "foo").with_match(MatchKind::Equal);
    assert_eq!(h.hub.broadcast(&Message::Update(update)).await, 1);

    eventually("update applied", || !h.page.applied().is_empty()).await;
    assert_eq!(
        h.page.applied(),
        vec![("http://wat".to_string(), "foo".to_string())]
    );

    h.session.destroy().await;
    h.hub.close().await;
}

#[tokio::test]
async fn relative_url_is_qualified_against_page_location() {
    let h = setup(&["http://localhost:3000/app/main.css"]).await;

    let update = ResourceUpdate::new("main.css", "body{}").with_match(MatchKind::Equal);
    h.hub.broadcast(&Message::Update(update)).await;

    eventually("update applied", || !h.page.applied().is_empty()).await;
    assert_eq!(h.page.applied()[0].0, "http://localhost:3000/app/main.css");

    h.session.destroy().await;
    h.hub.close().await;
}

#[tokio::test]
async fn large_payload_is_applied_once_in_full() {
    let h = setup(&["http://localhost:3000/app/big.js"]).await;

    let contents = "x".repeat(120_000);
    h.hub.broadcast(&Message::update("big.js", contents.as_str())).await;

    eventually("update applied", || !h.page.applied().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let applied = h.page.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].1.len(), 120_000);
    assert_eq!(applied[0].1, contents);

    h.session.destroy().await;
    h.hub.close().await;
}

#[tokio::test]
async fn unknown_resource_does_not_stop_the_session() {
    let h = setup(&["http://localhost:3000/app/a.js"]).await;

    h.hub.broadcast(&Message::update("nope.js", "1")).await;
    h.hub.broadcast(&Message::update("a.js", "2")).await;

    eventually("second update applied", || !h.page.applied().is_empty()).await;
    let diagnostics = h.recorder.diagnostics.lock().unwrap().clone();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].contains("nope.js"));
    assert_eq!(h.page.applied()[0].1, "2");
    assert!(h.session.connected());

    h.session.destroy().await;
    h.hub.close().await;
}

#[tokio::test]
async fn reload_reloads_the_page() {
    let h = setup(&[]).await;

    h.hub.broadcast(&Message::Reload).await;
    eventually("reload", || h.page.reloads.load(Ordering::SeqCst) == 1).await;

    h.session.destroy().await;
    h.hub.close().await;
}

#[tokio::test]
async fn unreachable_hub_exhausts_with_underlying_reason() {
    let retry = RetryPolicy {
        budget: 5,
        base_delay: Duration::from_millis(500),
    };
    let (_, recorder, tracker, session) = page_session(closed_port(), &[], retry);

    let err = tokio::time::timeout(Duration::from_secs(20), session.start())
        .await
        .expect("exhausted in time")
        .unwrap_err();
    let ClientError::ConnectionExhausted { reason } = err else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert!(!reason.is_empty());

    let statuses = recorder.statuses.lock().unwrap().clone();
    let delays: Vec<u64> = statuses
        .iter()
        .filter_map(|s| match s {
            Status::Retry(d) => Some(d.as_millis() as u64),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![500, 1000, 1500, 2000, 2500]);
    assert_eq!(statuses.last(), Some(&Status::Error));
    assert_eq!(tracker.current(), Status::Error);

    session.destroy().await;
}

#[tokio::test]
async fn exhaustion_carries_close_reason() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(listener);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "hub shutting down".into(),
            }))
            .await;
        while let Some(Ok(_)) = futures_util::StreamExt::next(&mut ws).await {}
    });

    let retry = RetryPolicy {
        budget: 0,
        base_delay: Duration::from_millis(10),
    };
    let (_, recorder, _, session) = page_session(port, &[], retry);
    tokio::time::timeout(Duration::from_secs(5), session.start())
        .await
        .expect("started in time")
        .expect("connected once");

    for _ in 0..500 {
        if matches!(session.connection().state(), ConnectionState::Failed { .. }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match session.connection().state() {
        ConnectionState::Failed { reason } => assert_eq!(reason, "hub shutting down (1001)"),
        other => panic!("unexpected state: {other:?}"),
    }
    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![
            Status::Connecting,
            Status::Connected,
            Status::Started,
            Status::Error
        ]
    );

    session.destroy().await;
}

#[tokio::test]
async fn client_leaving_mid_broadcast_does_not_cut_off_the_other() {
    let (hub, port) = start_hub(0).await;
    let url = "http://localhost:3000/app/big.js";
    let (page_a, _, _, a) = page_session(port, &[url], RetryPolicy::default());
    let (_, _, _, b) = page_session(port, &[url], RetryPolicy::default());
    a.start().await.unwrap();
    b.start().await.unwrap();
    wait_for_handshakes(&hub, 2).await;

    let contents = "y".repeat(150_000);
    let message = Message::update("big.js", contents.as_str());
    let (delivered, ()) = tokio::join!(hub.broadcast(&message), b.destroy());
    assert!(delivered >= 1);

    eventually("update applied on the remaining page", || {
        !page_a.applied().is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let applied = page_a.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, url);
    assert_eq!(applied[0].1, contents);

    a.destroy().await;
    hub.close().await;
}

#[tokio::test]
async fn restart_after_exhaustion_reports_live_status() {
    let port = closed_port();
    let retry = RetryPolicy {
        budget: 0,
        base_delay: Duration::from_millis(10),
    };
    let (page, recorder, tracker, session) = page_session(port, &[], retry);

    let err = tokio::time::timeout(Duration::from_secs(5), session.start())
        .await
        .expect("exhausted in time")
        .unwrap_err();
    assert!(err.is_session_fatal());
    assert_eq!(tracker.current(), Status::Error);

    let (hub, _) = start_hub(port).await;
    session.restart();

    eventually("session reconnected", || {
        session.connected() && tracker.current() == Status::Started
    })
    .await;
    assert_eq!(
        *recorder.statuses.lock().unwrap(),
        vec![
            Status::Connecting,
            Status::Error,
            Status::Starting,
            Status::Connecting,
            Status::Connected,
            Status::Started
        ]
    );

    hub.broadcast(&Message::Reload).await;
    eventually("reload", || page.reloads.load(Ordering::SeqCst) == 1).await;

    session.destroy().await;
    hub.close().await;
}
