use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one exchange socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Closing => write!(f, "CLOSING"),
        }
    }
}

/// A decoded data frame. The payload is the exchange's JSON, untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Trade(Value),
    OrderBookDelta(Value),
    Ticker(Value),
    Kline(Value),
    Liquidation(Value),
    Unknown(Value),
}

impl Frame {
    pub fn payload(&self) -> &Value {
        match self {
            Self::Trade(v)
            | Self::OrderBookDelta(v)
            | Self::Ticker(v)
            | Self::Kline(v)
            | Self::Liquidation(v)
            | Self::Unknown(v) => v,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Trade(_) => "trade",
            Self::OrderBookDelta(_) => "orderbook",
            Self::Ticker(_) => "ticker",
            Self::Kline(_) => "kline",
            Self::Liquidation(_) => "liquidation",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// What handlers receive for every frame routed to their channel
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub exchange: Arc<str>,
    pub channel: String,
    pub frame: Frame,
    pub received_at: DateTime<Utc>,
}

/// Connectivity signal broadcast by each connection manager
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected {
        exchange: Arc<str>,
    },
    Disconnected {
        exchange: Arc<str>,
        reason: String,
    },
    Message {
        exchange: Arc<str>,
        channel: String,
        kind: &'static str,
    },
}

/// Running counters for one connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub connections: u64,
    pub reconnects_scheduled: u64,
    pub messages_received: u64,
    pub frames_dispatched: u64,
    pub handler_failures: u64,
    pub malformed_frames: u64,
    pub repaired_frames: u64,
    pub pings_sent: u64,
    pub control_frames: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
}
