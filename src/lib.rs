pub mod core;
pub mod exchanges;
pub mod resilience;
pub mod stream;
pub mod utils;

pub use core::{
    config::FeedConfig,
    errors::{ErrorCategory, FeedError},
    traits::{ErrorListener, FrameHandler},
    types::*,
};
pub use resilience::{CircuitBreakerRegistry, ErrorAnalytics, RetryExecutor, RetryOptions};
pub use stream::{ConnectionManager, ConnectionManagerBuilder, NetworkMonitor, Subscription};
pub use utils::{ExchangeFactory, ExchangeId};
