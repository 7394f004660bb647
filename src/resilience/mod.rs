//! Retry, circuit breaking and error analytics shared by the streaming and REST layers.

pub mod analytics;
pub mod circuit_breaker;
pub mod retry;

pub use analytics::{
    CriticalPattern, ErrorAnalytics, ErrorFilter, ErrorRecord, ErrorStats, ReportOptions,
    SignatureCount,
};
pub use circuit_breaker::{BreakerState, CircuitBreakerRegistry, CircuitSnapshot};
pub use retry::{apply_jitter, backoff_delay, fallback, Fallback, RetryExecutor, RetryOptions};
