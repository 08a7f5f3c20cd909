//! Overlay orchestration.
//!
//! [`OverlayShell`] owns every background worker: the acquisition supervisor
//! (discovery, streaming with reconnects, polling fallback), the settings
//! watcher, and keep-on-top enforcement. Workers only reach the widget through
//! a [`DisplayHandle`].

use crate::acquisition::{
    ClientEvent, ConnectionState, DiscoveredEndpoint, LiveValueClient, MetricSample, PullClient,
    PushClient, SocketTransport, SourceDiscoverer,
};
use crate::browser::{BrowsingEngine, DriverProcess, WebDriverEngine};
use crate::config::OverlayConfig;
use crate::display::{DisplayHandle, SOURCE_NOT_FOUND_TEXT};
use crate::error::{OverlayError, Result};
use crate::style::{load_current, ConfigWatcher};
use crate::timer::RecurringTimer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DRIVER_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellState {
    Idle,
    Discovering,
    /// Showing values; `degraded` while the source reports failures or has dropped
    Live { degraded: bool },
    Closing,
    Closed,
}

/// Raises the overlay window above all others. Invoked on a recurring timer.
pub trait KeepOnTop: Send + Sync {
    fn raise(&self) -> Result<()>;
}

/// For renditions without a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKeepOnTop;

impl KeepOnTop for NoopKeepOnTop {
    fn raise(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the WebDriver engine, launching a managed driver first if one is configured.
pub async fn connect_webdriver(
    config: &OverlayConfig,
) -> Result<(WebDriverEngine, Option<DriverProcess>)> {
    match &config.chromedriver_path {
        Some(path) => {
            let driver =
                DriverProcess::spawn(path, config.webdriver_port(), DRIVER_READY_TIMEOUT).await?;
            let engine = WebDriverEngine::new(driver.base_url())?;
            Ok((engine, Some(driver)))
        }
        None => Ok((WebDriverEngine::new(&config.webdriver_url)?, None)),
    }
}

/// Owns the overlay's workers and exposes start/stop.
pub struct OverlayShell {
    config: OverlayConfig,
    engine: Arc<dyn BrowsingEngine>,
    transport: Arc<dyn SocketTransport>,
    keep_on_top: Arc<dyn KeepOnTop>,
    display: DisplayHandle,
    state: Arc<watch::Sender<ShellState>>,
    cancel: CancellationToken,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    driver: Option<DriverProcess>,
}

impl OverlayShell {
    pub fn new(
        config: OverlayConfig,
        engine: Arc<dyn BrowsingEngine>,
        transport: Arc<dyn SocketTransport>,
        display: DisplayHandle,
    ) -> Self {
        let (state, _) = watch::channel(ShellState::Idle);
        Self {
            config,
            engine,
            transport,
            keep_on_top: Arc::new(NoopKeepOnTop),
            display,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            driver: None,
        }
    }

    /// Use a platform keep-on-top implementation.
    pub fn with_keep_on_top(mut self, keep_on_top: Arc<dyn KeepOnTop>) -> Self {
        self.keep_on_top = keep_on_top;
        self
    }

    /// Hand over a driver process to be killed on teardown.
    pub fn with_driver(mut self, driver: Option<DriverProcess>) -> Self {
        self.driver = driver;
        self
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ShellState {
        *self.state.borrow()
    }

    /// Receive every lifecycle change.
    pub fn subscribe_state(&self) -> watch::Receiver<ShellState> {
        self.state.subscribe()
    }

    /// Bring up the overlay's background workers. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != ShellState::Idle {
            return Err(OverlayError::config_error(format!(
                "overlay cannot start from state {:?}",
                self.state()
            )));
        }
        self.config.validate()?;

        info!("Starting overlay for {}", self.config.dashboard_url);
        publish(&self.state, ShellState::Discovering);

        let supervisor = Supervisor {
            config: self.config.clone(),
            engine: self.engine.clone(),
            transport: self.transport.clone(),
            display: self.display.clone(),
            state: self.state.clone(),
            cancel: self.cancel.child_token(),
        };
        self.workers
            .push(("acquisition", tokio::spawn(supervisor.run())));

        let display = self.display.clone();
        let on_screen = load_current(&self.config.settings_path, &self.config.default_style);
        let watcher = ConfigWatcher::new(&self.config.settings_path, self.config.default_style.clone())
            .with_applied(on_screen);
        self.workers.push((
            "settings watcher",
            watcher.watch(self.config.check_interval, self.cancel.child_token(), move |style| {
                if let Err(e) = display.apply_style(style) {
                    debug!("Dropped style change: {}", e);
                }
            }),
        ));

        let keep_on_top = self.keep_on_top.clone();
        self.workers.push((
            "keep on top",
            RecurringTimer::spawn(
                "keep on top",
                self.config.keep_on_top_interval,
                self.cancel.child_token(),
                move || {
                    let keep_on_top = keep_on_top.clone();
                    async move {
                        if let Err(e) = keep_on_top.raise() {
                            debug!("Keep-on-top request failed: {}", e);
                        }
                    }
                },
            ),
        ));

        Ok(())
    }

    /// Tear everything down. Safe to call any number of times.
    ///
    /// Every worker gets the configured grace period and is aborted if it
    /// overruns; failures are logged and never stop the remaining teardown.
    pub async fn stop(&mut self) {
        if matches!(self.state(), ShellState::Closing | ShellState::Closed) {
            debug!("Overlay already stopped");
            return;
        }

        info!("Closing overlay");
        self.state.send_replace(ShellState::Closing);
        self.cancel.cancel();

        let grace = self.config.shutdown_grace;
        for (name, mut handle) in self.workers.drain(..) {
            match timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!("Worker '{}' stopped", name),
                Ok(Err(e)) => error!("Worker '{}' failed: {}", name, e),
                Err(_) => {
                    error!("Worker '{}' did not stop within {:?}, aborting", name, grace);
                    handle.abort();
                }
            }
        }

        if let Some(mut driver) = self.driver.take() {
            if let Err(e) = driver.shutdown().await {
                error!("Failed to stop driver process: {}", e);
            }
        }

        self.state.send_replace(ShellState::Closed);
        info!("Overlay closed");
    }
}

impl Drop for OverlayShell {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Publish a state change unless teardown has begun.
fn publish(state: &watch::Sender<ShellState>, next: ShellState) {
    state.send_if_modified(|current| {
        if matches!(current, ShellState::Closing | ShellState::Closed) || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Mark a live overlay as degraded.
fn publish_degraded(state: &watch::Sender<ShellState>) {
    state.send_if_modified(|current| match current {
        ShellState::Live { degraded: false } => {
            *current = ShellState::Live { degraded: true };
            true
        }
        _ => false,
    });
}

/// How a followed subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Followed {
    Cancelled,
    /// The client reported `Closed`; `delivered` if it produced at least one value
    Closed { delivered: bool },
}

/// What the streaming phase asks for next.
enum StreamOutcome {
    Cancelled,
    Rediscover,
}

struct Supervisor {
    config: OverlayConfig,
    engine: Arc<dyn BrowsingEngine>,
    transport: Arc<dyn SocketTransport>,
    display: DisplayHandle,
    state: Arc<watch::Sender<ShellState>>,
    cancel: CancellationToken,
}

impl Supervisor {
    fn client_grace(&self) -> Duration {
        self.config.shutdown_grace / 2
    }

    fn show_sample(&self, sample: MetricSample) {
        if let Err(e) = self.display.apply_sample(sample) {
            debug!("Dropped sample: {}", e);
        }
    }

    fn show_text(&self, text: &str) {
        if let Err(e) = self.display.show_text(text) {
            debug!("Dropped label text: {}", e);
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn run(self) {
        let discoverer = SourceDiscoverer::new(self.engine.clone());
        let mut failed_rounds = 0u32;

        loop {
            publish(&self.state, ShellState::Discovering);
            let discovery = discoverer.discover(
                &self.config.dashboard_url,
                self.config.observation_window,
                &self.cancel,
            );
            tokio::pin!(discovery);
            let finished = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = &mut discovery => Some(result),
            };
            let Some(discovered) = finished else {
                // The engine sees the same token; give it time to release its page.
                if timeout(self.client_grace(), &mut discovery).await.is_err() {
                    warn!("Discovery did not wind down within {:?}", self.client_grace());
                }
                break;
            };

            match discovered {
                Ok(endpoints) if !endpoints.is_empty() => {
                    match self.stream(endpoints[0].clone()).await {
                        StreamOutcome::Cancelled => break,
                        StreamOutcome::Rediscover => {
                            info!("Running discovery again after repeated connection failures");
                            failed_rounds = 0;
                            continue;
                        }
                    }
                }
                Ok(_) => info!("No streaming source, falling back to polling the page"),
                Err(e) => warn!("{}; falling back to polling the page", e),
            }

            let client = PullClient::new(
                &self.config.dashboard_url,
                &self.config.element_id,
                self.engine.clone(),
            )
            .with_cadence(self.config.check_interval)
            .with_lookup_timeout(self.config.element_timeout)
            .with_grace(self.client_grace());

            match self.follow(&client).await {
                Followed::Cancelled => break,
                Followed::Closed { delivered } => {
                    if delivered {
                        failed_rounds = 0;
                    }
                    failed_rounds = failed_rounds.saturating_add(1);
                    self.show_text(SOURCE_NOT_FOUND_TEXT);
                    publish_degraded(&self.state);

                    let delay = self.config.reconnect.delay_for(failed_rounds);
                    warn!("Source unavailable, retrying in {:?}", delay);
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        debug!("Acquisition supervisor stopped");
    }

    /// Stream from `endpoint`, re-subscribing after every drop until discovery is due again.
    async fn stream(&self, endpoint: DiscoveredEndpoint) -> StreamOutcome {
        let policy = &self.config.reconnect;
        let mut failures = 0u32;

        loop {
            let client = PushClient::new(endpoint.clone(), self.transport.clone())
                .with_grace(self.client_grace());

            match self.follow(&client).await {
                Followed::Cancelled => return StreamOutcome::Cancelled,
                Followed::Closed { delivered } => {
                    // Never leave the last value up while reconnecting.
                    self.show_sample(MetricSample::unavailable());
                    if delivered {
                        failures = 0;
                    }
                    failures = failures.saturating_add(1);
                }
            }

            if policy.should_rediscover(failures) {
                return StreamOutcome::Rediscover;
            }

            let delay = policy.delay_for(failures);
            info!("Reconnecting to {} in {:?} (attempt {})", endpoint.url, delay, failures);
            if !self.pause(delay).await {
                return StreamOutcome::Cancelled;
            }
        }
    }

    /// Subscribe `client` and forward its events until it closes or the shell stops.
    async fn follow(&self, client: &dyn LiveValueClient) -> Followed {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = client.subscribe(tx);
        info!("Subscribed {} ({})", subscription.id(), client.describe());

        let mut delivered = false;
        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Followed::Cancelled,
                event = rx.recv() => event,
            };

            match event {
                Some(ClientEvent::Sample(sample)) => {
                    delivered |= sample.value.is_available();
                    self.show_sample(sample);
                }
                Some(ClientEvent::State(state)) => match state {
                    ConnectionState::Connected => {
                        publish(&self.state, ShellState::Live { degraded: false })
                    }
                    ConnectionState::Degraded => {
                        publish(&self.state, ShellState::Live { degraded: true })
                    }
                    ConnectionState::Closed => {
                        publish_degraded(&self.state);
                        break Followed::Closed { delivered };
                    }
                    ConnectionState::Discovering | ConnectionState::Connecting => {}
                },
                None => break Followed::Closed { delivered },
            }
        };

        let id = subscription.id();
        if let Err(e) = subscription.cancel().await {
            error!("Failed to release subscription {}: {}", id, e);
        }
        outcome
    }
}
