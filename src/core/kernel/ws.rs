use crate::core::errors::FeedError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket session trait - pure transport layer
///
/// Implementations move frames and nothing else. Reconnection, subscriptions and
/// health checking live in the connection manager driving the session.
#[async_trait]
pub trait WsSession: Send + 'static {
    /// Open the socket
    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), FeedError>;

    /// Receive the next raw message; `None` once the stream has ended
    ///
    /// Control frames are surfaced too. Replies they require are queued and only
    /// written by [`flush`](Self::flush), so dropping this future mid-read never
    /// loses a half-sent frame.
    async fn next_raw(&mut self) -> Option<Result<Message, FeedError>>;

    /// Write any queued control replies
    async fn flush(&mut self) -> Result<(), FeedError> {
        Ok(())
    }

    /// Close the connection
    async fn close(&mut self) -> Result<(), FeedError>;

    fn is_connected(&self) -> bool;
}

/// Tungstenite-based WebSocket session
pub struct TungsteniteWs {
    url: String,
    exchange_name: String,
    connect_timeout: Duration,
    write: Option<SplitSink<WsStream, Message>>,
    read: Option<SplitStream<WsStream>>,
    pending_pong: Option<Message>,
    connected: bool,
}

impl std::fmt::Debug for TungsteniteWs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteWs")
            .field("url", &self.url)
            .field("exchange", &self.exchange_name)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl TungsteniteWs {
    /// Create a new WebSocket session
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    pub fn new(url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange_name: exchange_name.into(),
            connect_timeout: Duration::from_secs(30),
            write: None,
            read: None,
            pending_pong: None,
            connected: false,
        }
    }

    /// Upper bound on the TCP + TLS + upgrade handshake
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn reset(&mut self) {
        self.connected = false;
        self.write = None;
        self.read = None;
        self.pending_pong = None;
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), FeedError> {
        self.reset();

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| FeedError::Timeout {
                operation: format!("ws connect {}", self.exchange_name),
                after: self.connect_timeout,
            })?
            .map_err(|e| FeedError::Transport(format!("WebSocket connection failed: {}", e)))?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        debug!("socket open");
        Ok(())
    }

    #[instrument(skip(self, msg), fields(exchange = %self.exchange_name))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), FeedError> {
        if !self.connected {
            return Err(FeedError::transport("WebSocket not connected"));
        }

        let write = self
            .write
            .as_mut()
            .ok_or_else(|| FeedError::transport("WebSocket write stream not available"))?;

        if let Err(e) = write.send(msg).await {
            self.connected = false;
            return Err(FeedError::Transport(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, FeedError>> {
        let read = self.read.as_mut()?;

        match read.next().await {
            Some(Ok(message)) => {
                match &message {
                    // Only the latest ping needs an answer
                    Message::Ping(data) => self.pending_pong = Some(Message::Pong(data.clone())),
                    Message::Close(_) => self.connected = false,
                    _ => {}
                }
                Some(Ok(message))
            }
            Some(Err(e)) => {
                self.connected = false;
                Some(Err(FeedError::Transport(format!("WebSocket error: {}", e))))
            }
            None => {
                self.connected = false;
                None
            }
        }
    }

    async fn flush(&mut self) -> Result<(), FeedError> {
        match self.pending_pong.take() {
            Some(pong) if self.connected => self.send_raw(pong).await.map_err(|e| {
                warn!(exchange = %self.exchange_name, "failed to send pong: {}", e);
                e
            }),
            _ => Ok(()),
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), FeedError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.reset();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
