use crate::core::errors::FeedError;
use crate::core::kernel::codec::{Inbound, WsCodec};
use crate::core::types::Frame;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// OKX v5 public stream codec.
///
/// Channel keys are `<channel>:<instId>` (`trades:BTC-USDT`, `books5:ETH-USDT`,
/// `candle1m:BTC-USDT`); liquidation feeds are keyed by instrument type
/// (`liquidation-orders:SWAP`). OKX heartbeats are the bare strings `ping`/`pong`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OkxCodec;

impl OkxCodec {
    pub fn new() -> Self {
        Self
    }

    fn arg(channel: &str) -> Result<Value, FeedError> {
        let (name, target) = channel.split_once(':').ok_or_else(|| {
            FeedError::InvalidParameters(format!(
                "OKX channel key must be <channel>:<instId>: {}",
                channel
            ))
        })?;
        Ok(if name.starts_with("liquidation") {
            json!({"channel": name, "instType": target})
        } else {
            json!({"channel": name, "instId": target})
        })
    }

    fn key(arg: &Value) -> Option<String> {
        let name = arg.get("channel").and_then(Value::as_str)?;
        let target = arg
            .get("instId")
            .or_else(|| arg.get("instType"))
            .and_then(Value::as_str)?;
        Some(format!("{}:{}", name, target))
    }
}

fn frame_for_channel(name: &str, payload: Value) -> Frame {
    if name == "trades" || name == "trades-all" {
        Frame::Trade(payload)
    } else if name.starts_with("books") || name == "bbo-tbt" {
        Frame::OrderBookDelta(payload)
    } else if name == "tickers" {
        Frame::Ticker(payload)
    } else if name.starts_with("candle") {
        Frame::Kline(payload)
    } else if name.starts_with("liquidation") {
        Frame::Liquidation(payload)
    } else {
        Frame::Unknown(payload)
    }
}

impl WsCodec for OkxCodec {
    fn encode_subscribe(&self, channel: &str) -> Result<Message, FeedError> {
        let arg = Self::arg(channel)?;
        Ok(Message::Text(json!({"op": "subscribe", "args": [arg]}).to_string()))
    }

    fn encode_unsubscribe(&self, channel: &str) -> Result<Message, FeedError> {
        let arg = Self::arg(channel)?;
        Ok(Message::Text(json!({"op": "unsubscribe", "args": [arg]}).to_string()))
    }

    fn encode_ping(&self) -> Option<Message> {
        Some(Message::Text("ping".to_string()))
    }

    fn classify_raw(&self, text: &str) -> Option<Inbound> {
        (text.trim() == "pong").then_some(Inbound::HeartbeatAck)
    }

    fn decode(&self, value: &Value) -> Result<Inbound, FeedError> {
        if let Some(event) = value.get("event").and_then(Value::as_str) {
            return Ok(match event {
                "subscribe" | "unsubscribe" => Inbound::Ack {
                    channel: value.get("arg").and_then(Self::key),
                },
                "error" => Inbound::Rejected {
                    reason: value
                        .get("msg")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                },
                _ => Inbound::Ignored,
            });
        }

        if let (Some(arg), Some(_)) = (value.get("arg"), value.get("data")) {
            let channel = Self::key(arg).ok_or_else(|| {
                FeedError::Serialization("OKX push without channel/instId".to_string())
            })?;
            let name = arg.get("channel").and_then(Value::as_str).unwrap_or_default();
            return Ok(Inbound::Data {
                frame: frame_for_channel(name, value.clone()),
                channel,
            });
        }

        Ok(Inbound::Ignored)
    }
}
