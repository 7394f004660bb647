pub mod codec;

pub use codec::BybitCodec;

pub const WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";
pub const REST_URL: &str = "https://api.bybit.com";
