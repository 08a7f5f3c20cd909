//! Streaming endpoint discovery.
//!
//! The dashboard never publishes its socket URL; it is found by loading the
//! page headlessly and watching which streaming connections it opens.

use crate::acquisition::data::DiscoveredEndpoint;
use crate::browser::{BrowserError, BrowsingEngine, ObservedRequest};
use crate::error::{OverlayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One-shot discovery of streaming-socket endpoints.
#[derive(Clone)]
pub struct SourceDiscoverer {
    engine: Arc<dyn BrowsingEngine>,
}

impl SourceDiscoverer {
    pub fn new(engine: Arc<dyn BrowsingEngine>) -> Self {
        Self { engine }
    }

    /// Observe `page_url` for `window` and return the streaming endpoints it opened,
    /// in discovery order.
    ///
    /// An empty list means the page has no streaming source; it is not an error.
    /// Cancelling `cancel` cuts the observation short; the engine still releases its page.
    pub async fn discover(
        &self,
        page_url: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredEndpoint>> {
        info!("Observing {} for {:?} to find a streaming endpoint", page_url, window);

        let requests = self
            .engine
            .load_and_observe_requests(page_url, window, cancel)
            .await
            .map_err(|e| match e {
                BrowserError::Cancelled => OverlayError::shutdown_error("discovery cancelled"),
                other => OverlayError::discovery_error(other.to_string()),
            })?;

        let endpoints = streaming_endpoints(&requests);
        if endpoints.is_empty() {
            warn!(
                "No streaming endpoint among {} observed requests",
                requests.len()
            );
        } else {
            info!("Discovered {} streaming endpoint(s), using {}", endpoints.len(), endpoints[0].url);
        }

        Ok(endpoints)
    }
}

/// Keep the answered streaming-socket requests, preserving order.
pub fn streaming_endpoints(requests: &[ObservedRequest]) -> Vec<DiscoveredEndpoint> {
    requests
        .iter()
        .filter(|request| request.had_response && is_streaming_url(&request.url))
        .map(|request| DiscoveredEndpoint::new(request.url.clone()))
        .collect()
}

/// Whether the URL scheme is a WebSocket scheme.
pub fn is_streaming_url(url: &str) -> bool {
    let url = url.trim();
    let scheme = url.split_once("://").map(|(scheme, _)| scheme);
    matches!(scheme, Some(s) if s.eq_ignore_ascii_case("wss") || s.eq_ignore_ascii_case("ws"))
}
