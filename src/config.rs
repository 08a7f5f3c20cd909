//! Overlay runtime configuration.

use crate::acquisition::ReconnectPolicy;
use crate::error::{OverlayError, Result};
use crate::style::StyleSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a running overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Dashboard page to discover the stream from, and to poll as a fallback
    pub dashboard_url: String,
    /// Id of the element carrying the value on the dashboard page
    pub element_id: String,
    /// Style used until, and wherever, the settings store says otherwise
    pub default_style: StyleSettings,
    /// INI settings store written by the color/font editor
    pub settings_path: PathBuf,
    /// Pull cadence and settings poll interval
    pub check_interval: Duration,
    /// How long discovery watches the page's traffic
    pub observation_window: Duration,
    /// How long a pull lookup waits for the element
    pub element_timeout: Duration,
    /// WebDriver server to drive the browser through
    pub webdriver_url: String,
    /// Driver binary to launch and manage, if the server is not already running
    pub chromedriver_path: Option<PathBuf>,
    /// How often the window is raised to the top
    pub keep_on_top_interval: Duration,
    /// Reconnect policy for the streaming connection
    pub reconnect: ReconnectPolicy,
    /// How long each worker gets to stop before it is aborted
    pub shutdown_grace: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dashboard_url: String::new(),
            element_id: crate::DEFAULT_ELEMENT_ID.to_string(),
            default_style: StyleSettings::default(),
            settings_path: PathBuf::from(crate::DEFAULT_SETTINGS_PATH),
            check_interval: Duration::from_millis(crate::DEFAULT_CHECK_INTERVAL_MS),
            observation_window: Duration::from_secs(crate::DEFAULT_OBSERVATION_SECS),
            element_timeout: Duration::from_secs(10),
            webdriver_url: crate::DEFAULT_WEBDRIVER_URL.to_string(),
            chromedriver_path: None,
            keep_on_top_interval: Duration::from_millis(500),
            reconnect: ReconnectPolicy::default(),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl OverlayConfig {
    /// Create a configuration for the given dashboard page.
    pub fn new(dashboard_url: impl Into<String>) -> Self {
        Self {
            dashboard_url: dashboard_url.into(),
            ..Default::default()
        }
    }

    /// Set the value element id.
    pub fn with_element_id(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = element_id.into();
        self
    }

    /// Set the default style.
    pub fn with_default_style(mut self, style: StyleSettings) -> Self {
        self.default_style = style;
        self
    }

    /// Set the settings store path.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }

    /// Set the check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the discovery observation window.
    pub fn with_observation_window(mut self, window: Duration) -> Self {
        self.observation_window = window;
        self
    }

    /// Set the element lookup timeout.
    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }

    /// Set the WebDriver server URL.
    pub fn with_webdriver_url(mut self, url: impl Into<String>) -> Self {
        self.webdriver_url = url.into();
        self
    }

    /// Set the driver binary to manage.
    pub fn with_chromedriver_path(mut self, path: Option<PathBuf>) -> Self {
        self.chromedriver_path = path;
        self
    }

    /// Set the keep-on-top interval.
    pub fn with_keep_on_top_interval(mut self, interval: Duration) -> Self {
        self.keep_on_top_interval = interval;
        self
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Port of the configured WebDriver URL, defaulting to 9515.
    pub fn webdriver_port(&self) -> u16 {
        self.webdriver_url
            .rsplit(':')
            .next()
            .and_then(|tail| tail.trim_end_matches('/').parse().ok())
            .unwrap_or(9515)
    }

    /// Check that the configuration can drive an overlay.
    pub fn validate(&self) -> Result<()> {
        if self.dashboard_url.trim().is_empty() {
            return Err(OverlayError::config_error(
                "dashboard URL is empty (set STROMNO_URL or --url)",
            ));
        }
        if self.check_interval.is_zero() {
            return Err(OverlayError::config_error("check interval must be positive"));
        }
        if self.observation_window.is_zero() {
            return Err(OverlayError::config_error(
                "observation window must be positive",
            ));
        }
        Ok(())
    }
}
