pub mod codec;

pub use codec::BinanceCodec;

/// Combined-stream endpoint; every payload arrives wrapped with its stream name
pub const WS_URL: &str = "wss://stream.binance.com:9443/stream";
pub const REST_URL: &str = "https://api.binance.com";
