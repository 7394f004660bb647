/// Feedwire kernel - exchange-agnostic transport layer
///
/// The kernel holds transport logic and the generic interfaces exchanges plug into.
/// It knows nothing about reconnection policy or subscriptions; those live in
/// [`crate::stream`].
///
/// - `WsSession` / `TungsteniteWs`: raw WebSocket transport
/// - `WsCodec`: per-exchange control messages and channel routing
/// - `parse_frame`: JSON parsing with truncation repair
/// - `RestClient` / `ReqwestRest` / `RetryingRest`: rate-limited HTTP with retries
///
/// ```rust,no_run
/// use feedwire::core::kernel::*;
///
/// # async fn example() -> Result<(), feedwire::core::errors::FeedError> {
/// let rest = RestClientBuilder::new(RestClientConfig::new("https://api.binance.com", "binance")).build()?;
/// let ticker = rest.get("/api/v3/ticker/price", &[("symbol", "BTCUSDT")]).await?;
/// # let _ = ticker;
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod repair;
pub mod rest;
pub mod ws;

pub use codec::{Inbound, WsCodec};
pub use repair::{parse_frame, repair_truncated};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, RetryingRest};
pub use ws::{TungsteniteWs, WsSession};
