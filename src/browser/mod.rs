//! Headless browsing engine used for endpoint discovery and element polling.
//!
//! The engine is an external collaborator: the overlay only needs to load a page,
//! passively observe the requests it makes, and read the text of one element.
//! [`WebDriverEngine`] provides this on top of a chromedriver-compatible server.

pub mod webdriver;

pub use webdriver::{BrowserOptions, DriverProcess, WebDriverEngine};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors reported by the browsing engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    /// The engine could not be started or reached
    #[error("browser startup failed: {0}")]
    Startup(String),

    /// The page could not be loaded
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// No element matched the lookup
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// A cached element reference no longer points into the live page
    #[error("stale element reference")]
    StaleElement,

    /// The operation did not finish in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// The session is gone or was never created
    #[error("invalid session: {0}")]
    Session(String),

    /// The operation was abandoned because the caller is shutting down
    #[error("cancelled")]
    Cancelled,

    /// Anything else the engine reported
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A request the page issued while it was being observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRequest {
    pub url: String,
    /// Whether at least one response (or handshake response) was received
    pub had_response: bool,
}

impl ObservedRequest {
    pub fn new(url: impl Into<String>, had_response: bool) -> Self {
        Self {
            url: url.into(),
            had_response,
        }
    }
}

/// Opaque reference to an element in a live page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// A scriptable, non-interactive browsing engine.
#[async_trait]
pub trait BrowsingEngine: Send + Sync {
    /// Load `url` in a fresh session, record outbound requests for `window`,
    /// and tear the session down before returning.
    ///
    /// Cancelling `cancel` cuts navigation and observation short with
    /// [`BrowserError::Cancelled`]; the session is still closed before returning.
    async fn load_and_observe_requests(
        &self,
        url: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObservedRequest>, BrowserError>;

    /// Load `url` in a session that stays open for repeated element reads.
    ///
    /// If `cancel` fires during navigation the session is closed and
    /// [`BrowserError::Cancelled`] is returned.
    async fn open_page(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PageSession>, BrowserError>;
}

/// A live page whose elements can be located and read.
#[async_trait]
pub trait PageSession: Send {
    /// Locate an element by its DOM id, waiting up to `timeout` for it to appear.
    async fn locate(
        &mut self,
        element_id: &str,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError>;

    /// Read the visible text of a previously located element.
    async fn read_text(&mut self, element: &ElementHandle) -> Result<String, BrowserError>;

    /// Close the session. Calling it more than once is harmless.
    async fn close(&mut self) -> Result<(), BrowserError>;
}
