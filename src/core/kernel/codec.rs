use crate::core::errors::FeedError;
use crate::core::types::Frame;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// What one inbound text frame means to the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Data for a channel key, routed to that channel's handlers
    Data { channel: String, frame: Frame },
    /// Reply to an application-level ping
    HeartbeatAck,
    /// Subscription acknowledgement
    Ack { channel: Option<String> },
    /// The exchange refused a request (unknown symbol, bad topic...)
    Rejected { reason: String },
    /// Anything the codec does not care about
    Ignored,
}

/// Codec trait for exchange-specific WebSocket control messages and routing
///
/// The connection manager owns the state machine; a codec only knows how an exchange
/// spells `subscribe`, `unsubscribe` and `ping`, and which field of an inbound frame
/// carries its channel key. Channel keys are opaque strings chosen by the codec.
pub trait WsCodec: Send + Sync + 'static {
    /// Encode a subscription request for one channel key
    fn encode_subscribe(&self, channel: &str) -> Result<Message, FeedError>;

    /// Encode an unsubscription request for one channel key
    fn encode_unsubscribe(&self, channel: &str) -> Result<Message, FeedError>;

    /// Application-level ping, or `None` when the protocol has none
    fn encode_ping(&self) -> Option<Message> {
        None
    }

    /// Recognize non-JSON control text (e.g. a bare `pong`) before parsing
    fn classify_raw(&self, _text: &str) -> Option<Inbound> {
        None
    }

    /// Route a parsed JSON frame
    fn decode(&self, value: &Value) -> Result<Inbound, FeedError>;
}
