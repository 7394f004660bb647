//! Exchange wire protocols. Each exchange contributes one [`WsCodec`](crate::core::kernel::WsCodec).

pub mod binance;
pub mod bybit;
pub mod hyperliquid;
pub mod okx;
