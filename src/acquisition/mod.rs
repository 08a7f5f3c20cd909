//! Live value acquisition.
//!
//! This module finds the dashboard's streaming endpoint and turns either the
//! stream (push) or the rendered page (pull) into a sequence of
//! [`MetricSample`]s plus connection state changes.

pub mod backoff;
pub mod data;
pub mod discovery;
pub mod pull;
pub mod push;
pub mod traits;
pub mod transport;

// Re-export commonly used items
pub use backoff::ReconnectPolicy;
pub use data::{
    parse_message, ClientEvent, ConnectionState, DiscoveredEndpoint, MetricSample, SampleValue,
};
pub use discovery::SourceDiscoverer;
pub use pull::{ElementReader, HandleState, PullClient};
pub use push::PushClient;
pub use traits::{LiveValueClient, Subscription};
pub use transport::{SocketConnection, SocketTransport, TransportEvent, TungsteniteTransport};
