pub mod codec;

pub use codec::HyperliquidCodec;

pub const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
pub const REST_URL: &str = "https://api.hyperliquid.xyz";
