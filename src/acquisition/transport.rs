//! Streaming-socket transport.

use crate::error::{OverlayError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Lifecycle and data events of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    /// The connection ended, with the peer's reason if it gave one
    Closed(Option<String>),
}

/// Opens duplex message connections.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>>;
}

/// An open connection. `next_event` returns `None` once the connection is finished.
#[async_trait]
pub trait SocketConnection: Send {
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn close(&mut self) -> Result<()>;
}

/// WebSocket transport over tokio-tungstenite, with TLS for `wss://`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl SocketTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| OverlayError::transport_error(format!("connect to {} failed: {}", url, e)))?;
        debug!("WebSocket handshake completed with status {}", response.status());
        Ok(Box::new(TungsteniteConnection {
            stream,
            opened: false,
            pending_close: None,
            finished: false,
        }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    opened: bool,
    pending_close: Option<String>,
    finished: bool,
}

#[async_trait]
impl SocketConnection for TungsteniteConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if !self.opened {
            self.opened = true;
            return Some(TransportEvent::Open);
        }
        if let Some(reason) = self.pending_close.take() {
            return Some(TransportEvent::Closed(Some(reason)));
        }
        if self.finished {
            return None;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(TransportEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(TransportEvent::Message(
                        String::from_utf8_lossy(&bytes).into_owned(),
                    ))
                }
                Some(Ok(Message::Close(frame))) => {
                    self.finished = true;
                    return Some(TransportEvent::Closed(
                        frame.map(|frame| frame.reason.to_string()),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.finished = true;
                    self.pending_close = Some(e.to_string());
                    return Some(TransportEvent::Error(e.to_string()));
                }
                None => {
                    self.finished = true;
                    return Some(TransportEvent::Closed(None));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.finished = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(OverlayError::transport_error(e.to_string())),
        }
    }
}
