//! Widgets the display queue can drive.

use crate::style::StyleSettings;
use std::io::{self, Write};

/// Text shown before the first sample arrives.
pub const LOADING_TEXT: &str = "Loading...";

/// The visible label. Lives on the UI thread and is mutated only by [`DisplaySync`].
///
/// [`DisplaySync`]: crate::display::DisplaySync
pub trait OverlayWidget {
    /// Replace the label text.
    fn set_text(&mut self, text: &str);

    /// Apply color and font together.
    fn set_style(&mut self, style: &StyleSettings);
}

/// One mutation applied to a [`LabelWidget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetChange {
    Text(String),
    Style(StyleSettings),
}

/// In-memory label that records every mutation in order.
#[derive(Debug, Clone)]
pub struct LabelWidget {
    text: String,
    style: StyleSettings,
    history: Vec<WidgetChange>,
}

impl Default for LabelWidget {
    fn default() -> Self {
        Self::new(StyleSettings::default())
    }
}

impl LabelWidget {
    pub fn new(style: StyleSettings) -> Self {
        Self {
            text: LOADING_TEXT.to_string(),
            style,
            history: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn style(&self) -> &StyleSettings {
        &self.style
    }

    /// Every change applied so far, oldest first.
    pub fn history(&self) -> &[WidgetChange] {
        &self.history
    }
}

impl OverlayWidget for LabelWidget {
    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.history.push(WidgetChange::Text(self.text.clone()));
    }

    fn set_style(&mut self, style: &StyleSettings) {
        self.style = style.clone();
        self.history.push(WidgetChange::Style(style.clone()));
    }
}

/// Terminal rendition of the overlay: prints the label whenever it changes.
pub struct ConsoleWidget {
    out: Box<dyn Write>,
    text: String,
    style: StyleSettings,
}

impl ConsoleWidget {
    /// Render to stdout.
    pub fn new(style: StyleSettings) -> Self {
        Self::with_writer(style, Box::new(io::stdout()))
    }

    pub fn with_writer(style: StyleSettings, out: Box<dyn Write>) -> Self {
        let mut widget = Self {
            out,
            text: LOADING_TEXT.to_string(),
            style,
        };
        widget.render();
        widget
    }

    fn render(&mut self) {
        let line = format!(
            "{}  [{} {}]",
            self.text, self.style.font_family, self.style.color
        );
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            tracing::debug!("Console render failed: {}", e);
        }
    }
}

impl OverlayWidget for ConsoleWidget {
    fn set_text(&mut self, text: &str) {
        if self.text != text {
            self.text = text.to_string();
            self.render();
        }
    }

    fn set_style(&mut self, style: &StyleSettings) {
        if &self.style != style {
            self.style = style.clone();
            self.render();
        }
    }
}
