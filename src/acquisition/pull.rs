//! Pull strategy: poll the value element of a live dashboard page.
//!
//! Used when the dashboard exposes no streaming endpoint. The element handle
//! is cached between reads; a stale handle is located again once before the
//! tick is given up as unavailable.

use crate::acquisition::data::{ClientEvent, ConnectionState, MetricSample};
use crate::acquisition::traits::{Emitter, LiveValueClient, Subscription};
use crate::browser::{BrowserError, BrowsingEngine, ElementHandle, PageSession};
use crate::timer::RecurringTimer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the cached element handle stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    /// Nothing located yet, or the last lookup failed
    NoHandle,
    /// A handle that worked on the last read
    Cached(ElementHandle),
    /// The cached handle was rejected as stale and is being replaced
    Stale,
}

/// Reads one element, maintaining the cached handle across reads.
#[derive(Debug)]
pub struct ElementReader {
    element_id: String,
    lookup_timeout: Duration,
    state: HandleState,
}

impl ElementReader {
    pub fn new(element_id: impl Into<String>, lookup_timeout: Duration) -> Self {
        Self {
            element_id: element_id.into(),
            lookup_timeout,
            state: HandleState::NoHandle,
        }
    }

    pub fn state(&self) -> &HandleState {
        &self.state
    }

    /// Read the element once. Any failure yields an unavailable sample.
    pub async fn read(&mut self, session: &mut dyn PageSession) -> MetricSample {
        match self.read_text(session).await {
            Ok(text) => MetricSample::from_element_text(&text),
            Err(BrowserError::Timeout(e)) => {
                warn!("Timed out reading #{}: {}", self.element_id, e);
                MetricSample::unavailable()
            }
            Err(e) => {
                warn!("Failed to read #{}: {}", self.element_id, e);
                MetricSample::unavailable()
            }
        }
    }

    async fn read_text(&mut self, session: &mut dyn PageSession) -> Result<String, BrowserError> {
        let handle = match &self.state {
            HandleState::Cached(handle) => handle.clone(),
            HandleState::NoHandle | HandleState::Stale => {
                self.locate(session, self.lookup_timeout).await?
            }
        };

        match session.read_text(&handle).await {
            Err(BrowserError::StaleElement) => {
                debug!("Handle for #{} went stale, locating again", self.element_id);
                self.state = HandleState::Stale;
                // The element is normally re-rendered already; no waiting on retry.
                let fresh = self.locate(session, Duration::ZERO).await?;
                session.read_text(&fresh).await.map_err(|e| {
                    self.state = HandleState::NoHandle;
                    e
                })
            }
            other => other,
        }
    }

    async fn locate(
        &mut self,
        session: &mut dyn PageSession,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError> {
        match session.locate(&self.element_id, timeout).await {
            Ok(handle) => {
                if self.state == HandleState::Stale {
                    debug!("Recovered handle for #{}", self.element_id);
                }
                self.state = HandleState::Cached(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                self.state = HandleState::NoHandle;
                Err(e)
            }
        }
    }
}

/// Polls the dashboard's value element on a fixed cadence.
///
/// The browsing session is owned by the worker and closed when the
/// subscription is cancelled. A failed read never stops the cadence.
#[derive(Clone)]
pub struct PullClient {
    page_url: String,
    element_id: String,
    engine: Arc<dyn BrowsingEngine>,
    cadence: Duration,
    lookup_timeout: Duration,
    grace: Duration,
}

impl PullClient {
    pub fn new(
        page_url: impl Into<String>,
        element_id: impl Into<String>,
        engine: Arc<dyn BrowsingEngine>,
    ) -> Self {
        Self {
            page_url: page_url.into(),
            element_id: element_id.into(),
            engine,
            cadence: Duration::from_millis(crate::DEFAULT_CHECK_INTERVAL_MS),
            lookup_timeout: Duration::from_secs(10),
            grace: Duration::from_secs(2),
        }
    }

    /// Set the polling cadence.
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Set how long a lookup waits for the element to appear.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Set how long cancellation waits for the worker before aborting it.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl LiveValueClient for PullClient {
    fn subscribe(&self, events: mpsc::UnboundedSender<ClientEvent>) -> Subscription {
        let cancel = CancellationToken::new();
        let emitter = Emitter::new(events, cancel.clone());
        let task = tokio::spawn(run_pull(self.clone(), emitter, cancel.clone()));
        Subscription::new(cancel, task, self.grace)
    }

    fn describe(&self) -> String {
        format!("pull: #{} on {}", self.element_id, self.page_url)
    }
}

async fn run_pull(client: PullClient, mut emitter: Emitter, cancel: CancellationToken) {
    emitter.state(ConnectionState::Connecting);

    let mut session = match client.engine.open_page(&client.page_url, &cancel).await {
        Ok(session) => session,
        Err(BrowserError::Cancelled) => {
            debug!("Polling cancelled while opening the page");
            return;
        }
        Err(e) => {
            warn!("Failed to open dashboard page: {}", e);
            emitter.sample(MetricSample::unavailable());
            emitter.state(ConnectionState::Closed);
            return;
        }
    };

    info!("Polling #{} every {:?}", client.element_id, client.cadence);
    emitter.state(ConnectionState::Connected);

    let mut reader = ElementReader::new(&client.element_id, client.lookup_timeout);
    let mut timer = RecurringTimer::new(client.cadence, cancel.clone());
    while timer.tick().await {
        let sample = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sample = reader.read(session.as_mut()) => sample,
        };
        emitter.observed(sample);
    }

    if let Err(e) = session.close().await {
        warn!("Failed to close polling session: {}", e);
    }
    debug!("Polling stopped");
}
