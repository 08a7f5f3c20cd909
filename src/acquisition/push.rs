//! Push strategy: a persistent streaming-socket subscription.

use crate::acquisition::data::{parse_message, ClientEvent, ConnectionState, DiscoveredEndpoint};
use crate::acquisition::traits::{Emitter, LiveValueClient, Subscription};
use crate::acquisition::transport::{SocketTransport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads heart rate messages from a discovered streaming endpoint.
///
/// Every inbound message yields exactly one sample; a malformed message
/// yields an unavailable sample and the connection stays open. The client
/// does not reconnect: a dropped connection ends in [`ConnectionState::Closed`].
#[derive(Clone)]
pub struct PushClient {
    endpoint: DiscoveredEndpoint,
    transport: Arc<dyn SocketTransport>,
    grace: Duration,
}

impl PushClient {
    pub fn new(endpoint: DiscoveredEndpoint, transport: Arc<dyn SocketTransport>) -> Self {
        Self {
            endpoint,
            transport,
            grace: Duration::from_secs(2),
        }
    }

    /// Set how long cancellation waits for the worker before aborting it.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn endpoint(&self) -> &DiscoveredEndpoint {
        &self.endpoint
    }
}

impl LiveValueClient for PushClient {
    fn subscribe(&self, events: mpsc::UnboundedSender<ClientEvent>) -> Subscription {
        let cancel = CancellationToken::new();
        let emitter = Emitter::new(events, cancel.clone());
        let task = tokio::spawn(run_push(
            self.endpoint.url.clone(),
            self.transport.clone(),
            emitter,
            cancel.clone(),
        ));
        Subscription::new(cancel, task, self.grace)
    }

    fn describe(&self) -> String {
        format!("push: {}", self.endpoint.url)
    }
}

async fn run_push(
    url: String,
    transport: Arc<dyn SocketTransport>,
    mut emitter: Emitter,
    cancel: CancellationToken,
) {
    emitter.state(ConnectionState::Connecting);

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = transport.connect(&url) => result,
    };
    let mut connection = match connected {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Streaming connection failed: {}", e);
            emitter.state(ConnectionState::Closed);
            return;
        }
    };

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = connection.next_event() => event,
        };

        match event {
            Some(TransportEvent::Open) => {
                info!("Streaming connection open");
                emitter.state(ConnectionState::Connected);
            }
            Some(TransportEvent::Message(text)) => {
                emitter.observed(parse_message(&text));
            }
            Some(TransportEvent::Error(e)) => {
                warn!("Streaming connection error: {}", e);
                emitter.state(ConnectionState::Closed);
                break;
            }
            Some(TransportEvent::Closed(reason)) => {
                info!(
                    "Streaming connection closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                emitter.state(ConnectionState::Closed);
                break;
            }
            None => {
                emitter.state(ConnectionState::Closed);
                break;
            }
        }
    }

    if let Err(e) = connection.close().await {
        debug!("Closing streaming connection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::data::SampleValue;
    use crate::acquisition::transport::SocketConnection;
    use crate::error::{OverlayError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Transport whose single connection is fed from a channel.
    struct ScriptedTransport {
        feed: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
        closed: Arc<AtomicBool>,
    }

    struct ScriptedConnection {
        feed: mpsc::UnboundedReceiver<TransportEvent>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self, _url: &str) -> Result<Box<dyn SocketConnection>> {
            let feed = self
                .feed
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| OverlayError::transport_error("refused"))?;
            Ok(Box::new(ScriptedConnection {
                feed,
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl SocketConnection for ScriptedConnection {
        async fn next_event(&mut self) -> Option<TransportEvent> {
            self.feed.recv().await
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scripted() -> (
        PushClient,
        mpsc::UnboundedSender<TransportEvent>,
        Arc<AtomicBool>,
    ) {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = ScriptedTransport {
            feed: Mutex::new(Some(feed_rx)),
            closed: closed.clone(),
        };
        let client = PushClient::new(DiscoveredEndpoint::new("wss://x/socket"), Arc::new(transport));
        (client, feed_tx, closed)
    }

    async fn next_sample(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> SampleValue {
        loop {
            match rx.recv().await {
                Some(ClientEvent::Sample(sample)) => return sample.value,
                Some(ClientEvent::State(_)) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_connection_open() {
        let (client, feed, closed) = scripted();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = client.subscribe(tx);

        feed.send(TransportEvent::Open).unwrap();
        feed.send(TransportEvent::Message(r#"{"timestamp":1,"data":{"heartRate":73}}"#.into()))
            .unwrap();
        feed.send(TransportEvent::Message(r#"{"timestamp":2,"data":{}}"#.into()))
            .unwrap();
        feed.send(TransportEvent::Message(r#"{"timestamp":3,"data":{"heartRate":75}}"#.into()))
            .unwrap();

        assert_eq!(next_sample(&mut rx).await, SampleValue::Bpm(73));
        assert_eq!(next_sample(&mut rx).await, SampleValue::Unavailable);
        assert_eq!(next_sample(&mut rx).await, SampleValue::Bpm(75));
        assert!(!subscription.is_finished());
        assert!(!closed.load(Ordering::SeqCst));

        subscription.cancel().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_state_sequence_on_remote_close() {
        let (client, feed, _closed) = scripted();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = client.subscribe(tx);

        feed.send(TransportEvent::Open).unwrap();
        feed.send(TransportEvent::Message("garbage".into())).unwrap();
        feed.send(TransportEvent::Closed(Some("bye".into()))).unwrap();

        let mut states = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ClientEvent::State(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Degraded,
                ConnectionState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_reports_closed() {
        let transport = ScriptedTransport {
            feed: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let client = PushClient::new(DiscoveredEndpoint::new("wss://x/socket"), Arc::new(transport));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = client.subscribe(tx);
        assert_eq!(rx.recv().await, Some(ClientEvent::State(ConnectionState::Connecting)));
        assert_eq!(rx.recv().await, Some(ClientEvent::State(ConnectionState::Closed)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_no_events_after_cancel() {
        let (client, feed, _closed) = scripted();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = client.subscribe(tx);
        feed.send(TransportEvent::Open).unwrap();

        subscription.cancel().await.unwrap();
        let _ = feed.send(TransportEvent::Message(r#"{"data":{"heartRate":99}}"#.into()));

        while let Some(event) = rx.recv().await {
            assert!(!matches!(event, ClientEvent::Sample(_)));
        }
    }
}
