use crate::error::{ObserverError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// An open, bidirectional push channel carrying JSON text frames
#[async_trait]
pub trait PushChannel: Send {
    /// Next inbound frame, `None` once the channel is closed
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn send(&mut self, frame: String) -> Result<()>;

    async fn close(&mut self);
}

/// Opens push channels; injected into the subscriber
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushChannel>>;
}

/// Default bound on the WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connector used against real nodes
///
/// The TCP connect plus upgrade handshake must finish within
/// `connect_timeout`, or the attempt fails like a refused connection.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushChannel>> {
        debug!("Connecting push channel to {}", url);
        let (stream, _) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                ObserverError::channel(format!(
                    "WebSocket connect to {} timed out after {:?}",
                    url, self.connect_timeout
                ))
            })?
            .map_err(|e| ObserverError::channel(format!("WebSocket connect to {} failed: {}", url, e)))?;
        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        ObserverError::protocol(format!("Binary frame is not UTF-8: {}", e))
                    }))
                }
                Some(Ok(Message::Close(_))) | None => return None,
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(ObserverError::channel(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream
            .send(Message::text(frame))
            .await
            .map_err(|e| ObserverError::channel(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
