use crate::core::errors::FeedError;
use crate::core::kernel::codec::{Inbound, WsCodec};
use crate::core::types::Frame;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Bybit v5 public stream codec. Channel keys are topics
/// (`publicTrade.BTCUSDT`, `orderbook.50.BTCUSDT`, `kline.1.BTCUSDT`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitCodec;

impl BybitCodec {
    pub fn new() -> Self {
        Self
    }
}

fn frame_for_topic(topic: &str, payload: Value) -> Frame {
    match topic.split('.').next().unwrap_or_default() {
        "publicTrade" => Frame::Trade(payload),
        "orderbook" => Frame::OrderBookDelta(payload),
        "tickers" => Frame::Ticker(payload),
        "kline" => Frame::Kline(payload),
        "liquidation" | "allLiquidation" => Frame::Liquidation(payload),
        _ => Frame::Unknown(payload),
    }
}

impl WsCodec for BybitCodec {
    fn encode_subscribe(&self, channel: &str) -> Result<Message, FeedError> {
        if !channel.contains('.') {
            return Err(FeedError::InvalidParameters(format!(
                "Bybit topic must look like <stream>.<symbol>: {}",
                channel
            )));
        }
        Ok(Message::Text(
            json!({"op": "subscribe", "args": [channel]}).to_string(),
        ))
    }

    fn encode_unsubscribe(&self, channel: &str) -> Result<Message, FeedError> {
        Ok(Message::Text(
            json!({"op": "unsubscribe", "args": [channel]}).to_string(),
        ))
    }

    fn encode_ping(&self) -> Option<Message> {
        Some(Message::Text(json!({"op": "ping"}).to_string()))
    }

    fn decode(&self, value: &Value) -> Result<Inbound, FeedError> {
        if let Some(topic) = value.get("topic").and_then(Value::as_str) {
            return Ok(Inbound::Data {
                channel: topic.to_string(),
                frame: frame_for_topic(topic, value.clone()),
            });
        }

        match value.get("op").and_then(Value::as_str) {
            Some("pong" | "ping") => Ok(Inbound::HeartbeatAck),
            Some("subscribe" | "unsubscribe") => {
                if value.get("success").and_then(Value::as_bool).unwrap_or(false) {
                    Ok(Inbound::Ack { channel: None })
                } else {
                    let reason = value
                        .get("ret_msg")
                        .and_then(Value::as_str)
                        .unwrap_or("subscription failed")
                        .to_string();
                    Ok(Inbound::Rejected { reason })
                }
            }
            _ => Ok(Inbound::Ignored),
        }
    }
}
