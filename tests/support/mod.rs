//! Scripted in-memory transport for driving a `ConnectionManager` without a network.
#![allow(dead_code)]

use async_trait::async_trait;
use feedwire::core::config::ConnectionConfig;
use feedwire::core::errors::FeedError;
use feedwire::core::kernel::{Inbound, WsCodec, WsSession};
use feedwire::core::types::{ChannelMessage, Frame};
use feedwire::stream::ConnectionManagerBuilder;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

enum Inject {
    Frame(Message),
    Drop,
}

#[derive(Default)]
struct Script {
    sent: Vec<String>,
    connects: u32,
    closes: u32,
    fail_connects: u32,
    pongs: u32,
    live: Option<mpsc::UnboundedSender<Inject>>,
}

/// Test-side handle to a [`MockSession`]
#[derive(Clone, Default)]
pub struct MockController {
    script: Arc<Mutex<Script>>,
}

impl MockController {
    /// Deliver a text frame on the current socket. Returns `false` when no socket is open.
    pub fn push(&self, text: &str) -> bool {
        self.inject(Inject::Frame(Message::Text(text.to_string())))
    }

    /// Deliver a transport-level ping carrying no application data
    pub fn push_ping(&self) -> bool {
        self.inject(Inject::Frame(Message::Ping(Vec::new())))
    }

    /// Pongs the session wrote back in answer to pings
    pub fn pong_count(&self) -> u32 {
        self.script.lock().pongs
    }

    /// Simulate the peer vanishing: the stream ends without a close frame
    pub fn drop_connection(&self) -> bool {
        self.inject(Inject::Drop)
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.script.lock().fail_connects = count;
    }

    pub fn connect_count(&self) -> u32 {
        self.script.lock().connects
    }

    pub fn close_count(&self) -> u32 {
        self.script.lock().closes
    }

    /// Text messages written by the manager, oldest first
    pub fn sent(&self) -> Vec<String> {
        self.script.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.script.lock().sent.clear();
    }

    fn inject(&self, item: Inject) -> bool {
        match &self.script.lock().live {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }
}

pub struct MockSession {
    controller: MockController,
    inbound: Option<mpsc::UnboundedReceiver<Inject>>,
    pending_pong: bool,
    connected: bool,
}

impl MockSession {
    pub fn new() -> (Self, MockController) {
        let controller = MockController::default();
        let session = Self {
            controller: controller.clone(),
            inbound: None,
            pending_pong: false,
            connected: false,
        };
        (session, controller)
    }
}

#[async_trait]
impl WsSession for MockSession {
    async fn connect(&mut self) -> Result<(), FeedError> {
        let mut script = self.controller.script.lock();
        script.connects += 1;
        if script.fail_connects > 0 {
            script.fail_connects -= 1;
            return Err(FeedError::transport("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        script.live = Some(tx);
        self.inbound = Some(rx);
        self.connected = true;
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), FeedError> {
        if !self.connected {
            return Err(FeedError::transport("not connected"));
        }
        match msg {
            Message::Text(text) => self.controller.script.lock().sent.push(text),
            Message::Pong(_) => self.controller.script.lock().pongs += 1,
            _ => {}
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, FeedError>> {
        let inbound = self.inbound.as_mut()?;
        match inbound.recv().await {
            Some(Inject::Frame(message)) => {
                if matches!(message, Message::Ping(_)) {
                    self.pending_pong = true;
                }
                Some(Ok(message))
            }
            Some(Inject::Drop) | None => {
                self.connected = false;
                self.inbound = None;
                None
            }
        }
    }

    async fn flush(&mut self) -> Result<(), FeedError> {
        if std::mem::take(&mut self.pending_pong) {
            self.send_raw(Message::Pong(Vec::new())).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        self.pending_pong = false;
        let mut script = self.controller.script.lock();
        script.closes += 1;
        script.live = None;
        self.inbound = None;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Minimal protocol: `sub:<ch>` / `unsub:<ch>` / `ping`, data as `{"ch": .., "data": ..}`
#[derive(Debug, Default)]
pub struct TestCodec;

impl WsCodec for TestCodec {
    fn encode_subscribe(&self, channel: &str) -> Result<Message, FeedError> {
        Ok(Message::Text(format!("sub:{}", channel)))
    }

    fn encode_unsubscribe(&self, channel: &str) -> Result<Message, FeedError> {
        Ok(Message::Text(format!("unsub:{}", channel)))
    }

    fn encode_ping(&self) -> Option<Message> {
        Some(Message::Text("ping".to_string()))
    }

    fn classify_raw(&self, text: &str) -> Option<Inbound> {
        (text == "pong").then_some(Inbound::HeartbeatAck)
    }

    fn decode(&self, value: &Value) -> Result<Inbound, FeedError> {
        match value.get("ch").and_then(Value::as_str) {
            Some(channel) => Ok(Inbound::Data {
                channel: channel.to_string(),
                frame: Frame::Unknown(value.get("data").cloned().unwrap_or(Value::Null)),
            }),
            None => Ok(Inbound::Ignored),
        }
    }
}

pub fn builder(
    session: MockSession,
    config: ConnectionConfig,
) -> ConnectionManagerBuilder<MockSession, TestCodec> {
    ConnectionManagerBuilder::new("mock", "ws://mock", config, TestCodec, session)
}

/// Handler counting its invocations
pub fn counting(counter: Arc<AtomicUsize>) -> impl Fn(&ChannelMessage) -> anyhow::Result<()> + Send + Sync + 'static {
    move |_message: &ChannelMessage| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` until it holds or the (virtual) deadline passes
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn data_frame(channel: &str, data: &str) -> String {
    format!(r#"{{"ch":"{}","data":{}}}"#, channel, data)
}
