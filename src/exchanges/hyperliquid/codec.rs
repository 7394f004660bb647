use crate::core::errors::FeedError;
use crate::core::kernel::codec::{Inbound, WsCodec};
use crate::core::types::Frame;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Hyperliquid WebSocket codec
///
/// Channel keys: `trades:<coin>`, `l2Book:<coin>`, `bbo:<coin>`,
/// `candle:<coin>:<interval>` and `allMids`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperliquidCodec;

impl HyperliquidCodec {
    pub fn new() -> Self {
        Self
    }

    fn subscription(channel: &str) -> Result<Value, FeedError> {
        let parts: Vec<&str> = channel.split(':').collect();
        match parts.as_slice() {
            ["allMids"] => Ok(json!({"type": "allMids"})),
            [kind @ ("trades" | "l2Book" | "bbo"), coin] => Ok(json!({"type": kind, "coin": coin})),
            ["candle", coin, interval] => {
                Ok(json!({"type": "candle", "coin": coin, "interval": interval}))
            }
            _ => Err(FeedError::InvalidParameters(format!(
                "Unsupported Hyperliquid channel key: {}",
                channel
            ))),
        }
    }

    fn key_for_subscription(subscription: &Value) -> Option<String> {
        let kind = subscription.get("type").and_then(Value::as_str)?;
        if kind == "allMids" {
            return Some(kind.to_string());
        }
        let coin = subscription.get("coin").and_then(Value::as_str)?;
        match subscription.get("interval").and_then(Value::as_str) {
            Some(interval) => Some(format!("{}:{}:{}", kind, coin, interval)),
            None => Some(format!("{}:{}", kind, coin)),
        }
    }

    fn request(method: &str, channel: &str) -> Result<Message, FeedError> {
        let subscription = Self::subscription(channel)?;
        Ok(Message::Text(
            json!({"method": method, "subscription": subscription}).to_string(),
        ))
    }
}

impl WsCodec for HyperliquidCodec {
    fn encode_subscribe(&self, channel: &str) -> Result<Message, FeedError> {
        Self::request("subscribe", channel)
    }

    fn encode_unsubscribe(&self, channel: &str) -> Result<Message, FeedError> {
        Self::request("unsubscribe", channel)
    }

    fn encode_ping(&self) -> Option<Message> {
        Some(Message::Text(json!({"method": "ping"}).to_string()))
    }

    fn decode(&self, value: &Value) -> Result<Inbound, FeedError> {
        let Some(channel) = value.get("channel").and_then(Value::as_str) else {
            return Ok(Inbound::Ignored);
        };
        let data = value.get("data").cloned().unwrap_or(Value::Null);

        let inbound = match channel {
            "pong" => Inbound::HeartbeatAck,
            "subscriptionResponse" => Inbound::Ack {
                channel: data.get("subscription").and_then(Self::key_for_subscription),
            },
            "error" => Inbound::Rejected {
                reason: data.as_str().map_or_else(|| data.to_string(), str::to_string),
            },
            "trades" => match data.pointer("/0/coin").and_then(Value::as_str) {
                Some(coin) => Inbound::Data {
                    channel: format!("trades:{}", coin),
                    frame: Frame::Trade(data.clone()),
                },
                None => Inbound::Ignored,
            },
            "l2Book" | "bbo" => match data.get("coin").and_then(Value::as_str) {
                Some(coin) => Inbound::Data {
                    channel: format!("{}:{}", channel, coin),
                    frame: if channel == "l2Book" {
                        Frame::OrderBookDelta(data.clone())
                    } else {
                        Frame::Ticker(data.clone())
                    },
                },
                None => Inbound::Ignored,
            },
            "candle" => {
                let coin = data.get("s").and_then(Value::as_str);
                let interval = data.get("i").and_then(Value::as_str);
                match (coin, interval) {
                    (Some(coin), Some(interval)) => Inbound::Data {
                        channel: format!("candle:{}:{}", coin, interval),
                        frame: Frame::Kline(data.clone()),
                    },
                    _ => Inbound::Ignored,
                }
            }
            "allMids" => Inbound::Data {
                channel: "allMids".to_string(),
                frame: Frame::Ticker(data),
            },
            _ => Inbound::Ignored,
        };
        Ok(inbound)
    }
}
