//! Cancellable recurring timer used by every polling worker.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A fixed-cadence timer that stops as soon as its token is cancelled.
///
/// The first tick fires immediately. A tick that overruns delays the next one
/// instead of bursting to catch up.
#[derive(Debug)]
pub struct RecurringTimer {
    interval: Interval,
    cancel: CancellationToken,
}

impl RecurringTimer {
    /// Create a timer ticking every `period` until `cancel` fires.
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, cancel }
    }

    /// Wait for the next tick. Returns `false` once the timer is cancelled.
    pub async fn tick(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.interval.tick() => true,
        }
    }

    /// Run `task` on every tick in a background worker until `cancel` fires.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        cancel: CancellationToken,
        mut task: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        tokio::spawn(async move {
            let mut timer = RecurringTimer::new(period, cancel);
            while timer.tick().await {
                task().await;
            }
            debug!("Timer {} stopped", name);
        })
    }
}
