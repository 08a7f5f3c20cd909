use async_trait::async_trait;
use pulse_overlay::acquisition::{SocketConnection, TransportEvent};
use pulse_overlay::browser::{ElementHandle, ObservedRequest, PageSession};
use pulse_overlay::display::WidgetChange;
use pulse_overlay::{
    BrowserError, BrowsingEngine, ClientEvent, ConfigWatcher, DiscoveredEndpoint, DisplaySync,
    LabelWidget, LiveValueClient, OverlayConfig, OverlayError, OverlayShell, OverlayWidget,
    PushClient, ReconnectPolicy, SampleValue, ShellState, SocketTransport, SourceDiscoverer,
    StyleSettings,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Browsing engine that replays scripted traffic logs and serves one value element.
///
/// Each discovery takes the next scripted log; once they run out, `fallback` repeats.
struct FakeEngine {
    scripted: Mutex<VecDeque<std::result::Result<Vec<ObservedRequest>, BrowserError>>>,
    fallback: std::result::Result<Vec<ObservedRequest>, BrowserError>,
    discoveries: Arc<AtomicUsize>,
    element_text: String,
}

impl FakeEngine {
    fn observing(requests: Vec<ObservedRequest>) -> Self {
        Self::answering(Ok(requests))
    }

    fn answering(fallback: std::result::Result<Vec<ObservedRequest>, BrowserError>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback,
            discoveries: Arc::new(AtomicUsize::new(0)),
            element_text: "80".to_string(),
        }
    }

    fn first_observing(mut self, requests: Vec<ObservedRequest>) -> Self {
        self.scripted.get_mut().unwrap().push_back(Ok(requests));
        self
    }
}

#[async_trait]
impl BrowsingEngine for FakeEngine {
    async fn load_and_observe_requests(
        &self,
        _url: &str,
        _window: Duration,
        _cancel: &CancellationToken,
    ) -> std::result::Result<Vec<ObservedRequest>, BrowserError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }

    async fn open_page(
        &self,
        _url: &str,
        _cancel: &CancellationToken,
    ) -> std::result::Result<Box<dyn PageSession>, BrowserError> {
        Ok(Box::new(FakePage(self.element_text.clone())))
    }
}

struct FakePage(String);

#[async_trait]
impl PageSession for FakePage {
    async fn locate(
        &mut self,
        _element_id: &str,
        _timeout: Duration,
    ) -> std::result::Result<ElementHandle, BrowserError> {
        Ok(ElementHandle("el".to_string()))
    }

    async fn read_text(
        &mut self,
        _element: &ElementHandle,
    ) -> std::result::Result<String, BrowserError> {
        Ok(self.0.clone())
    }

    async fn close(&mut self) -> std::result::Result<(), BrowserError> {
        Ok(())
    }
}

/// Transport handing out pre-scripted connections in order, counting attempts and closes.
#[derive(Default)]
struct FakeTransport {
    feeds: Mutex<VecDeque<mpsc::UnboundedReceiver<TransportEvent>>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeTransport {
    fn with_connection() -> (Self, mpsc::UnboundedSender<TransportEvent>) {
        let transport = Self::default();
        let (tx, rx) = mpsc::unbounded_channel();
        transport.feeds.lock().unwrap().push_back(rx);
        (transport, tx)
    }
}

struct FakeConnection {
    feed: mpsc::UnboundedReceiver<TransportEvent>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SocketTransport for FakeTransport {
    async fn connect(&self, _url: &str) -> pulse_overlay::Result<Box<dyn SocketConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let feed = self
            .feeds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OverlayError::transport_error("connection refused"))?;
        Ok(Box::new(FakeConnection {
            feed,
            closes: self.closes.clone(),
        }))
    }
}

#[async_trait]
impl SocketConnection for FakeConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.feed.recv().await
    }

    async fn close(&mut self) -> pulse_overlay::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn shell_config(dir: &std::path::Path) -> OverlayConfig {
    OverlayConfig::new("https://x/dashboard")
        .with_settings_path(dir.join("color_config.ini"))
        .with_check_interval(Duration::from_millis(20))
        .with_observation_window(Duration::from_millis(10))
        .with_keep_on_top_interval(Duration::from_millis(50))
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(60)))
        .with_shutdown_grace(Duration::from_secs(1))
}

/// Pump the display until `done` holds for its widget, or give up after about two seconds.
async fn pump_until<W: OverlayWidget>(sync: &mut DisplaySync<W>, done: impl Fn(&W) -> bool) -> bool {
    for _ in 0..200 {
        sync.pump();
        if done(sync.widget()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Discovery keeps only answered streaming requests
#[test]
fn test_discovery_keeps_answered_socket_only() {
    let engine = FakeEngine::observing(vec![
        ObservedRequest::new("https://x/a", false),
        ObservedRequest::new("wss://x/socket", true),
        ObservedRequest::new("https://x/b", false),
    ]);
    let discoverer = SourceDiscoverer::new(Arc::new(engine));

    let endpoints = tokio_test::block_on(discoverer.discover(
        "https://x",
        Duration::from_millis(1),
        &CancellationToken::new(),
    ))
    .expect("Discovery should succeed");
    let urls: Vec<&str> = endpoints.iter().map(|e| e.url.as_str()).collect();
    assert_eq!(urls, vec!["wss://x/socket"]);
}

/// An unusable browsing engine is a discovery failure, not a panic
#[test]
fn test_discovery_engine_failure() {
    let engine = FakeEngine::answering(Err(BrowserError::Startup("no browser".to_string())));
    let discoverer = SourceDiscoverer::new(Arc::new(engine));

    let result = tokio_test::block_on(discoverer.discover(
        "https://x",
        Duration::from_millis(1),
        &CancellationToken::new(),
    ));
    assert!(matches!(result, Err(OverlayError::Discovery(_))));
}

/// Stream messages map to samples; a message without a value keeps the stream open
#[tokio::test]
async fn test_push_client_message_scenarios() {
    let (transport, feed) = FakeTransport::with_connection();
    let closes = transport.closes.clone();
    let client = PushClient::new(DiscoveredEndpoint::new("wss://x/socket"), Arc::new(transport));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = client.subscribe(tx);
    feed.send(TransportEvent::Open).unwrap();
    feed.send(TransportEvent::Message(r#"{"timestamp":1,"data":{"heartRate":73}}"#.into()))
        .unwrap();
    feed.send(TransportEvent::Message(r#"{"timestamp":2,"data":{}}"#.into()))
        .unwrap();

    let mut samples = Vec::new();
    while samples.len() < 2 {
        if let Some(ClientEvent::Sample(sample)) = rx.recv().await {
            samples.push(sample.value);
        }
    }
    assert_eq!(samples, vec![SampleValue::Bpm(73), SampleValue::Unavailable]);
    assert!(!subscription.is_finished());
    assert_eq!(closes.load(Ordering::SeqCst), 0);

    subscription.cancel().await.expect("Cancel should succeed");
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

/// Concurrent producers: every update applied once, each producer's order kept
#[test]
fn test_display_concurrent_producers_keep_order() {
    let (mut sync, handle) = DisplaySync::new(LabelWidget::default());

    let values = handle.clone();
    let value_producer = thread::spawn(move || {
        for bpm in 0..100u32 {
            values.apply_sample(pulse_overlay::MetricSample::bpm(bpm)).unwrap();
        }
    });
    let styles = handle.clone();
    let style_producer = thread::spawn(move || {
        for i in 0..50 {
            styles
                .apply_style(StyleSettings::new(format!("#0000{:02X}", i), format!("Font{}", i)))
                .unwrap();
        }
    });

    // Drain concurrently with the producers.
    while !(value_producer.is_finished() && style_producer.is_finished()) {
        sync.pump();
    }
    value_producer.join().unwrap();
    style_producer.join().unwrap();
    drop(handle);
    sync.run();

    let texts: Vec<String> = sync
        .widget()
        .history()
        .iter()
        .filter_map(|change| match change {
            WidgetChange::Text(text) => Some(text.clone()),
            _ => None,
        })
        .collect();
    let expected_texts: Vec<String> = (0..100).map(|bpm| format!("{} bpm", bpm)).collect();
    assert_eq!(texts, expected_texts);

    let fonts: Vec<String> = sync
        .widget()
        .history()
        .iter()
        .filter_map(|change| match change {
            WidgetChange::Style(style) => Some(style.font_family.clone()),
            _ => None,
        })
        .collect();
    let expected_fonts: Vec<String> = (0..50).map(|i| format!("Font{}", i)).collect();
    assert_eq!(fonts, expected_fonts);

    assert_eq!(sync.widget().text(), "99 bpm");
    assert_eq!(sync.widget().style(), &StyleSettings::new("#000031", "Font49"));
    assert_eq!(sync.applied(), 150);
}

/// A settings write reaches the widget as one color+font change
#[tokio::test]
async fn test_settings_round_trip_to_display() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("color_config.ini");
    StyleSettings::new("#00FF00", "Georgia")
        .write_ini(&path)
        .unwrap();

    let (mut sync, handle) = DisplaySync::new(LabelWidget::default());
    let cancel = CancellationToken::new();
    let watcher = ConfigWatcher::new(&path, StyleSettings::default()).watch(
        Duration::from_millis(10),
        cancel.clone(),
        move |style| {
            handle.apply_style(style).unwrap();
        },
    );

    assert!(pump_until(&mut sync, |label| !label.history().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    watcher.await.unwrap();
    sync.pump();

    assert_eq!(
        sync.widget().history(),
        &[WidgetChange::Style(StyleSettings::new("#00FF00", "Georgia"))]
    );
}

/// Full pipeline: discovered stream drives the label, and a drop shows N/A
#[tokio::test]
async fn test_shell_streams_discovered_endpoint() {
    let dir = tempdir().unwrap();
    let engine = FakeEngine::observing(vec![
        ObservedRequest::new("https://x/app.js", true),
        ObservedRequest::new("wss://x/socket", true),
    ]);
    let (transport, feed) = FakeTransport::with_connection();
    let closes = transport.closes.clone();
    let (mut sync, handle) = DisplaySync::new(LabelWidget::default());

    let mut shell = OverlayShell::new(
        shell_config(dir.path()),
        Arc::new(engine),
        Arc::new(transport),
        handle,
    );
    let mut states = shell.subscribe_state();
    shell.start().expect("Shell should start");

    feed.send(TransportEvent::Open).unwrap();
    feed.send(TransportEvent::Message(r#"{"timestamp":1,"data":{"heartRate":73}}"#.into()))
        .unwrap();
    states
        .wait_for(|state| *state == ShellState::Live { degraded: false })
        .await
        .unwrap();
    assert!(pump_until(&mut sync, |label| label.text() == "73 bpm").await);

    feed.send(TransportEvent::Closed(None)).unwrap();
    states
        .wait_for(|state| *state == ShellState::Live { degraded: true })
        .await
        .unwrap();
    assert!(pump_until(&mut sync, |label| label.text() == "N/A bpm").await);

    shell.stop().await;
    assert_eq!(shell.state(), ShellState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

/// Stopping twice neither fails nor releases anything twice
#[tokio::test]
async fn test_shell_double_stop() {
    let dir = tempdir().unwrap();
    let engine = FakeEngine::observing(vec![ObservedRequest::new("wss://x/socket", true)]);
    let (transport, feed) = FakeTransport::with_connection();
    let closes = transport.closes.clone();
    let (_sync, handle) = DisplaySync::new(LabelWidget::default());

    let mut shell = OverlayShell::new(
        shell_config(dir.path()),
        Arc::new(engine),
        Arc::new(transport),
        handle,
    );
    let mut states = shell.subscribe_state();
    shell.start().unwrap();
    feed.send(TransportEvent::Open).unwrap();
    states
        .wait_for(|state| matches!(state, ShellState::Live { .. }))
        .await
        .unwrap();

    shell.stop().await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    shell.stop().await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(shell.state(), ShellState::Closed);
}

/// Without a stream the shell polls the page instead
#[tokio::test]
async fn test_shell_polls_when_no_stream_found() {
    let dir = tempdir().unwrap();
    let engine = FakeEngine::observing(vec![ObservedRequest::new("https://x/a", true)]);
    let (mut sync, handle) = DisplaySync::new(LabelWidget::default());

    let mut shell = OverlayShell::new(
        shell_config(dir.path()),
        Arc::new(engine),
        Arc::new(FakeTransport::default()),
        handle,
    );
    shell.start().unwrap();

    assert!(pump_until(&mut sync, |label| label.text() == "80 bpm").await);
    shell.stop().await;
    assert_eq!(shell.state(), ShellState::Closed);
}

/// Repeated stream failures send the shell back to discovery, which can pick polling instead
#[tokio::test]
async fn test_shell_rediscovers_after_repeated_stream_failures() {
    let dir = tempdir().unwrap();
    let engine = FakeEngine::observing(vec![ObservedRequest::new("https://x/a", true)])
        .first_observing(vec![ObservedRequest::new("wss://x/socket", true)]);
    let discoveries = engine.discoveries.clone();
    let transport = FakeTransport::default();
    let connects = transport.connects.clone();
    let (mut sync, handle) = DisplaySync::new(LabelWidget::default());

    let mut shell = OverlayShell::new(
        shell_config(dir.path()).with_reconnect(
            ReconnectPolicy::fixed(Duration::from_millis(20)).with_rediscover_after(2),
        ),
        Arc::new(engine),
        Arc::new(transport),
        handle,
    );
    shell.start().unwrap();

    assert!(pump_until(&mut sync, |label| label.text() == "80 bpm").await);
    shell.stop().await;

    assert_eq!(discoveries.load(Ordering::SeqCst), 2);
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(shell.state(), ShellState::Closed);
}

/// Configuration defaults and validation
#[test]
fn test_overlay_config() {
    let config = OverlayConfig::new("https://x/dashboard");
    assert_eq!(config.element_id, "widget-bpm");
    assert_eq!(config.check_interval, Duration::from_millis(500));
    assert!(config.validate().is_ok());
    assert!(matches!(
        OverlayConfig::new("").validate(),
        Err(OverlayError::Config(_))
    ));
}
