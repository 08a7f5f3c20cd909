//! Traits and handles shared by the live value strategies.

use crate::acquisition::data::{ClientEvent, ConnectionState, MetricSample};
use crate::error::{OverlayError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A source of live heart rate samples.
///
/// Implementations spawn their own worker and report samples and state
/// changes, in generation order, on the supplied channel. A client never
/// reconnects on its own: once it reports [`ConnectionState::Closed`] it
/// stops emitting, and reconnection is up to the caller.
pub trait LiveValueClient: Send + Sync {
    /// Start emitting events. Must be called from within a tokio runtime.
    fn subscribe(&self, events: mpsc::UnboundedSender<ClientEvent>) -> Subscription;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// Cancellation handle for a running client.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    grace: Duration,
}

impl Subscription {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>, grace: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel,
            task: Some(task),
            grace,
        }
    }

    /// Identifier used to correlate log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop emissions and release the connection or session.
    ///
    /// Returns once the worker has exited. A worker still running after the
    /// grace period is aborted and reported as an error. No event is emitted
    /// after this returns.
    pub async fn cancel(mut self) -> Result<()> {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match timeout(self.grace, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(OverlayError::shutdown_error(format!(
                "subscription {} worker failed: {}",
                self.id, e
            ))),
            Err(_) => {
                task.abort();
                Err(OverlayError::shutdown_error(format!(
                    "subscription {} did not stop within {:?}",
                    self.id, self.grace
                )))
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Worker-side event writer; goes quiet once the subscription is cancelled.
#[derive(Debug)]
pub(crate) struct Emitter {
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
    state: Option<ConnectionState>,
}

impl Emitter {
    pub(crate) fn new(events: mpsc::UnboundedSender<ClientEvent>, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            state: None,
        }
    }

    pub(crate) fn sample(&self, sample: MetricSample) {
        if !self.cancel.is_cancelled() {
            let _ = self.events.send(ClientEvent::Sample(sample));
        }
    }

    /// Report a state change; repeats of the current state are dropped.
    pub(crate) fn state(&mut self, state: ConnectionState) {
        if self.cancel.is_cancelled() || self.state == Some(state) {
            return;
        }
        self.state = Some(state);
        let _ = self.events.send(ClientEvent::State(state));
    }

    /// Report a sample followed by the state it implies.
    pub(crate) fn observed(&mut self, sample: MetricSample) {
        let state = if sample.value.is_available() {
            ConnectionState::Connected
        } else {
            ConnectionState::Degraded
        };
        self.sample(sample);
        self.state(state);
    }
}
