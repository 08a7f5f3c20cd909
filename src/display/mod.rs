//! Marshaling of value and style updates onto the UI thread.
//!
//! Producers on any thread or task hold a cloneable [`DisplayHandle`]; the UI
//! thread owns the [`DisplaySync`] and its widget. Updates cross over a FIFO
//! queue, so each producer's updates are applied in the order they were sent,
//! once each, with nothing coalesced.

pub mod widget;

pub use widget::{ConsoleWidget, LabelWidget, OverlayWidget, WidgetChange, LOADING_TEXT};

use crate::acquisition::MetricSample;
use crate::error::{OverlayError, Result};
use crate::style::StyleSettings;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::debug;

/// Text shown when no source could be found and there is no fallback.
pub const SOURCE_NOT_FOUND_TEXT: &str = "N/A";

/// A single widget mutation request.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayUpdate {
    Sample(MetricSample),
    Style(StyleSettings),
    /// Literal label text
    Text(String),
    /// Stop the UI loop
    Close,
}

/// Producer side of the display queue. Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct DisplayHandle {
    tx: Sender<DisplayUpdate>,
}

impl DisplayHandle {
    fn send(&self, update: DisplayUpdate) -> Result<()> {
        self.tx
            .send(update)
            .map_err(|_| OverlayError::display_error("display closed"))
    }

    /// Queue a sample for display.
    pub fn apply_sample(&self, sample: MetricSample) -> Result<()> {
        self.send(DisplayUpdate::Sample(sample))
    }

    /// Queue a style change; color and font are applied in one step.
    pub fn apply_style(&self, style: StyleSettings) -> Result<()> {
        self.send(DisplayUpdate::Style(style))
    }

    /// Queue literal label text.
    pub fn show_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(DisplayUpdate::Text(text.into()))
    }

    /// Ask the UI loop to stop after the updates queued before this one.
    pub fn close(&self) -> Result<()> {
        self.send(DisplayUpdate::Close)
    }
}

/// Consumer side of the display queue; the only writer of widget state.
pub struct DisplaySync<W: OverlayWidget> {
    widget: W,
    rx: Receiver<DisplayUpdate>,
    closed: bool,
    applied: u64,
}

impl<W: OverlayWidget> DisplaySync<W> {
    /// Wrap `widget` and return the handle producers use to reach it.
    pub fn new(widget: W) -> (Self, DisplayHandle) {
        let (tx, rx) = unbounded();
        let sync = Self {
            widget,
            rx,
            closed: false,
            applied: 0,
        };
        (sync, DisplayHandle { tx })
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn into_widget(self) -> W {
        self.widget
    }

    /// Whether a close request has been applied or every producer is gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of widget mutations applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    fn apply(&mut self, update: DisplayUpdate) {
        match update {
            DisplayUpdate::Sample(sample) => self.widget.set_text(&sample.label()),
            DisplayUpdate::Style(style) => self.widget.set_style(&style),
            DisplayUpdate::Text(text) => self.widget.set_text(&text),
            DisplayUpdate::Close => {
                debug!("Display close requested");
                self.closed = true;
                return;
            }
        }
        self.applied += 1;
    }

    /// Apply everything queued right now without blocking. Returns the number of updates drained.
    ///
    /// Meant to be called from the UI's own event loop on every frame or tick.
    pub fn pump(&mut self) -> usize {
        let mut drained = 0;
        while !self.closed {
            match self.rx.try_recv() {
                Ok(update) => {
                    self.apply(update);
                    drained += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                }
            }
        }
        drained
    }

    /// Wait up to `timeout` for the next update, then drain the rest. Returns false once closed.
    pub fn pump_timeout(&mut self, timeout: Duration) -> bool {
        if self.closed {
            return false;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(update) => {
                self.apply(update);
                self.pump();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.closed = true,
        }
        !self.closed
    }

    /// Block the calling thread applying updates until closed.
    pub fn run(&mut self) {
        while !self.closed {
            match self.rx.recv() {
                Ok(update) => self.apply(update),
                Err(_) => self.closed = true,
            }
        }
        debug!("Display loop finished after {} updates", self.applied);
    }
}
