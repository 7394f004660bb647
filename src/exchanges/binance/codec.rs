use crate::core::errors::FeedError;
use crate::core::kernel::codec::{Inbound, WsCodec};
use crate::core::types::Frame;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_tungstenite::tungstenite::Message;

/// Binance spot stream codec.
///
/// Channel keys are Binance stream names (`btcusdt@trade`, `ethusdt@depth@100ms`,
/// `btcusdt@kline_1m`). Connections go to the combined `/stream` endpoint, whose
/// `{"stream", "data"}` envelope carries the exact subscribed name. Bare payloads
/// from the raw `/ws` endpoint are still routed from the event body, which cannot
/// recover modifiers such as `@100ms`. Binance has no application-level ping, so
/// connections use the staleness watchdog.
#[derive(Debug, Default)]
pub struct BinanceCodec {
    request_id: AtomicU64,
}

impl BinanceCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn request(&self, method: &str, channel: &str) -> Message {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let request = json!({
            "method": method,
            "params": [channel],
            "id": id
        });
        Message::Text(request.to_string())
    }

    /// Stream name for a raw-stream event (`{"e":"trade","s":"BTCUSDT",...}`)
    fn stream_for_event(event_type: &str, value: &Value) -> Option<String> {
        if event_type == "forceOrder" {
            let symbol = value.pointer("/o/s").and_then(Value::as_str)?;
            return Some(format!("{}@forceOrder", symbol.to_lowercase()));
        }

        let symbol = value.get("s").and_then(Value::as_str)?.to_lowercase();
        let suffix = match event_type {
            "trade" => "trade".to_string(),
            "aggTrade" => "aggTrade".to_string(),
            "depthUpdate" => "depth".to_string(),
            "24hrTicker" => "ticker".to_string(),
            "24hrMiniTicker" => "miniTicker".to_string(),
            "kline" => {
                let interval = value.pointer("/k/i").and_then(Value::as_str)?;
                format!("kline_{}", interval)
            }
            _ => return None,
        };
        Some(format!("{}@{}", symbol, suffix))
    }

    /// Raw book ticker payloads carry no event type: `{"u":..,"s":..,"b":..,"a":..}`
    fn book_ticker_stream(value: &Value) -> Option<String> {
        let is_book_ticker = ["u", "b", "a"].iter().all(|key| value.get(key).is_some());
        if !is_book_ticker {
            return None;
        }
        let symbol = value.get("s").and_then(Value::as_str)?;
        Some(format!("{}@bookTicker", symbol.to_lowercase()))
    }
}

/// Frame kind implied by a stream name
fn frame_for_stream(stream: &str, payload: Value) -> Frame {
    let kind = stream.split('@').nth(1).unwrap_or_default();
    if kind == "trade" || kind == "aggTrade" {
        Frame::Trade(payload)
    } else if kind.starts_with("depth") {
        Frame::OrderBookDelta(payload)
    } else if kind.contains("icker") {
        Frame::Ticker(payload)
    } else if kind.starts_with("kline") {
        Frame::Kline(payload)
    } else if kind == "forceOrder" {
        Frame::Liquidation(payload)
    } else {
        Frame::Unknown(payload)
    }
}

impl WsCodec for BinanceCodec {
    fn encode_subscribe(&self, channel: &str) -> Result<Message, FeedError> {
        if channel.is_empty() {
            return Err(FeedError::InvalidParameters("empty Binance stream name".to_string()));
        }
        Ok(self.request("SUBSCRIBE", channel))
    }

    fn encode_unsubscribe(&self, channel: &str) -> Result<Message, FeedError> {
        Ok(self.request("UNSUBSCRIBE", channel))
    }

    fn decode(&self, value: &Value) -> Result<Inbound, FeedError> {
        // Combined stream format
        if let Some(stream) = value.get("stream").and_then(Value::as_str) {
            let data = value.get("data").cloned().ok_or_else(|| {
                FeedError::Serialization("Missing data field in stream message".to_string())
            })?;
            return Ok(Inbound::Data {
                channel: stream.to_string(),
                frame: frame_for_stream(stream, data),
            });
        }

        // Raw stream format
        if let Some(event_type) = value.get("e").and_then(Value::as_str) {
            return Ok(match Self::stream_for_event(event_type, value) {
                Some(channel) => Inbound::Data {
                    frame: frame_for_stream(&channel, value.clone()),
                    channel,
                },
                None => Inbound::Ignored,
            });
        }

        if let Some(channel) = Self::book_ticker_stream(value) {
            return Ok(Inbound::Data {
                frame: frame_for_stream(&channel, value.clone()),
                channel,
            });
        }

        if let Some(error) = value.get("error") {
            let reason = error
                .get("msg")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Ok(Inbound::Rejected { reason });
        }

        if value.get("result").is_some() && value.get("id").is_some() {
            return Ok(Inbound::Ack { channel: None });
        }

        Ok(Inbound::Ignored)
    }
}
