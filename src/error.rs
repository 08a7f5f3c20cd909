//! Error handling for the pulse overlay crate.

use crate::browser::BrowserError;

/// A specialized `Result` type for overlay operations.
pub type Result<T> = std::result::Result<T, OverlayError>;

/// The main error type for overlay operations.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound data could not be parsed
    #[error("Failed to parse: {0}")]
    Parse(String),

    /// The dashboard could not be loaded or observed
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Browsing engine operation failed
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Streaming-socket transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The display queue is gone
    #[error("Display error: {0}")]
    Display(String),

    /// A worker did not shut down cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl OverlayError {
    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new discovery error
    pub fn discovery_error(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a new transport error
    pub fn transport_error(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new display error
    pub fn display_error(msg: impl Into<String>) -> Self {
        Self::Display(msg.into())
    }

    /// Create a new shutdown error
    pub fn shutdown_error(msg: impl Into<String>) -> Self {
        Self::Shutdown(msg.into())
    }
}
