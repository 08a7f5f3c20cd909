//! # Pulse Overlay - Live Heart Rate Overlay
//!
//! Shows a heart rate, published by a third-party web dashboard, as a small
//! always-on-top label. The dashboard's streaming endpoint is discovered by
//! watching the page's own traffic; when there is none, the rendered value is
//! polled from the page instead.
//!
//! ## Features
//!
//! - **Endpoint discovery**: headless page load with network observation over WebDriver
//! - **Push and pull acquisition**: WebSocket subscription or cached-handle polling
//! - **Failure tolerance**: reconnect with backoff, re-discovery, explicit "N/A" samples
//! - **Hot-reloaded style**: color and font from an INI file, applied without restart
//! - **UI-thread marshaling**: every widget mutation goes through one FIFO queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pulse_overlay::{
//!     DisplaySync, LabelWidget, OverlayConfig, OverlayShell, TungsteniteTransport, WebDriverEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OverlayConfig::new("https://dashboard.example/widget");
//!     let engine = WebDriverEngine::new(&config.webdriver_url)?;
//!     let (mut display, handle) = DisplaySync::new(LabelWidget::default());
//!
//!     let mut shell = OverlayShell::new(config, Arc::new(engine), Arc::new(TungsteniteTransport), handle);
//!     shell.start()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     display.pump();
//!     println!("{}", display.widget().text());
//!     shell.stop().await;
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod browser;
pub mod config;
pub mod display;
pub mod error;
pub mod shell;
pub mod style;
pub mod timer;

// Re-export public API
pub use acquisition::{
    parse_message, ClientEvent, ConnectionState, DiscoveredEndpoint, LiveValueClient,
    MetricSample, PullClient, PushClient, ReconnectPolicy, SampleValue, SocketTransport,
    SourceDiscoverer, Subscription, TungsteniteTransport,
};
pub use browser::{BrowserError, BrowsingEngine, DriverProcess, WebDriverEngine};
pub use config::OverlayConfig;
pub use display::{
    ConsoleWidget, DisplayHandle, DisplaySync, DisplayUpdate, LabelWidget, OverlayWidget,
};
pub use error::{OverlayError, Result};
pub use shell::{connect_webdriver, KeepOnTop, NoopKeepOnTop, OverlayShell, ShellState};
pub use style::{ConfigWatcher, StyleSettings};
pub use timer::RecurringTimer;

/// The default pull cadence and settings poll interval in milliseconds
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 500;

/// The default discovery observation window in seconds
pub const DEFAULT_OBSERVATION_SECS: u64 = 5;

/// Id of the value element on the dashboard page
pub const DEFAULT_ELEMENT_ID: &str = "widget-bpm";

/// The default label color
pub const DEFAULT_COLOR: &str = "#FFFFFF";

/// The default label font
pub const DEFAULT_FONT: &str = "Arial";

/// The settings store written by the color/font editor
pub const DEFAULT_SETTINGS_PATH: &str = "color_config.ini";

/// Where chromedriver listens by default
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
