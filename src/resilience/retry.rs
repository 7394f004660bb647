//! Retry with exponential backoff, jitter, per-attempt timeouts and circuit gating.

use crate::core::config::RetryConfig;
use crate::core::errors::FeedError;
use crate::resilience::analytics::{ErrorAnalytics, ReportOptions};
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use futures_util::future::BoxFuture;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub type RetryHook = Arc<dyn Fn(&FeedError, u32, Duration) + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn(u32) + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&FeedError, u32) + Send + Sync>;
pub type RetryPredicate = Arc<dyn Fn(&FeedError, u32) -> bool + Send + Sync>;

/// An alternative operation tried once after the primary gives up
pub type Fallback<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, FeedError>> + Send>;

/// Box an async closure as a [`Fallback`]
pub fn fallback<T, F, Fut>(f: F) -> Fallback<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, FeedError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Per-call options. Unset numeric fields fall back to the executor's [`RetryConfig`].
#[derive(Clone)]
pub struct RetryOptions {
    pub name: String,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub backoff_factor: Option<f64>,
    pub timeout: Option<Duration>,
    pub use_circuit_breaker: bool,
    retry_if: Option<RetryPredicate>,
    on_retry: Option<RetryHook>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("timeout", &self.timeout)
            .field("use_circuit_breaker", &self.use_circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl RetryOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_retries: None,
            retry_delay: None,
            backoff_factor: None,
            timeout: None,
            use_circuit_breaker: true,
            retry_if: None,
            on_retry: None,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.use_circuit_breaker = false;
        self
    }

    pub fn retry_if(mut self, predicate: impl Fn(&FeedError, u32) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry(mut self, hook: impl Fn(&FeedError, u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn on_success(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl Fn(&FeedError, u32) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    fn notify_failure(&self, error: &FeedError, attempt: u32) {
        if let Some(hook) = &self.on_failure {
            hook(error, attempt);
        }
    }
}

/// Options resolved against the executor defaults
#[derive(Debug, Clone, Copy)]
struct Plan {
    max_retries: u32,
    retry_delay: Duration,
    backoff_factor: f64,
    timeout: Duration,
}

/// `base * factor^(attempt - 1)`, saturating at `Duration::MAX`
pub fn backoff_delay(base: Duration, factor: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    Duration::try_from_secs_f64(base.as_secs_f64() * factor.powi(exponent)).unwrap_or(Duration::MAX)
}

/// Perturb `delay` uniformly within `±jitter_factor * delay`, never below zero
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, jitter_factor: f64, rng: &mut R) -> Duration {
    if jitter_factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let secs = delay.as_secs_f64();
    let spread = secs * jitter_factor;
    let jittered = secs + rng.gen_range(-spread..=spread);
    Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
}

/// Runs fallible async operations under retry, timeout and circuit-breaker policy
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    analytics: Arc<ErrorAnalytics>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(
        config: RetryConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        analytics: Arc<ErrorAnalytics>,
    ) -> Self {
        Self {
            config,
            breakers,
            analytics,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn analytics(&self) -> &Arc<ErrorAnalytics> {
        &self.analytics
    }

    fn plan(&self, options: &RetryOptions) -> Plan {
        Plan {
            max_retries: options.max_retries.unwrap_or(self.config.max_retries),
            retry_delay: options
                .retry_delay
                .unwrap_or_else(|| Duration::from_millis(self.config.retry_delay_ms)),
            backoff_factor: options.backoff_factor.unwrap_or(self.config.backoff_factor),
            timeout: options
                .timeout
                .unwrap_or_else(|| Duration::from_millis(self.config.timeout_ms)),
        }
    }

    fn jittered_delay(&self, plan: &Plan, attempt: u32) -> Duration {
        let delay = backoff_delay(plan.retry_delay, plan.backoff_factor, attempt);
        apply_jitter(delay, self.config.jitter_factor, &mut rand::thread_rng())
    }

    async fn attempt<T, Fut>(name: &str, timeout: Duration, fut: Fut) -> Result<T, FeedError>
    where
        Fut: Future<Output = Result<T, FeedError>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout {
                operation: name.to_string(),
                after: timeout,
            }),
        }
    }

    /// Run `operation` until it succeeds or the retry budget is spent.
    ///
    /// With `max_retries = n` the operation is attempted at most `n + 1` times. The
    /// named circuit is checked once, before the first attempt; an open circuit fails
    /// fast with [`FeedError::CircuitOpen`]. `on_failure` fires exactly once when the
    /// call gives up.
    #[instrument(skip(self, options, operation), fields(operation = %options.name))]
    pub async fn run<T, F, Fut>(&self, options: &RetryOptions, operation: F) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        self.run_traced(options, operation, &mut Vec::new()).await
    }

    /// Same as [`run`](Self::run), appending one line per failed attempt to `trail`
    async fn run_traced<T, F, Fut>(
        &self,
        options: &RetryOptions,
        mut operation: F,
        trail: &mut Vec<String>,
    ) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let name = options.name.as_str();
        let plan = self.plan(options);

        if options.use_circuit_breaker && self.breakers.is_circuit_open(name) {
            let err = FeedError::CircuitOpen {
                name: name.to_string(),
            };
            self.analytics.report_error(name, &err, ReportOptions::default());
            options.notify_failure(&err, 0);
            trail.push(format!("primary: {}", err));
            return Err(err);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            match Self::attempt(name, plan.timeout, operation()).await {
                Ok(value) => {
                    if options.use_circuit_breaker {
                        self.breakers.record_success(name);
                    }
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retry");
                    }
                    if let Some(hook) = &options.on_success {
                        hook(attempt);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if options.use_circuit_breaker {
                        self.breakers.record_failure(name);
                    }
                    self.analytics.report_error(
                        name,
                        &err,
                        ReportOptions::default().with_context("attempt", attempt),
                    );
                    trail.push(format!("primary attempt {}: {}", attempt, err));

                    let wants_retry = options
                        .retry_if
                        .as_ref()
                        .map_or(true, |predicate| predicate(&err, attempt));
                    if attempt > plan.max_retries || !err.is_retryable() || !wants_retry {
                        warn!(attempt, error = %err, "giving up");
                        options.notify_failure(&err, attempt);
                        return Err(err);
                    }

                    let delay = self.jittered_delay(&plan, attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                    if let Some(hook) = &options.on_retry {
                        hook(&err, attempt, delay);
                    }
                }
            }
        }
    }

    /// [`run`](Self::run) the primary, then try each fallback once in order.
    ///
    /// Every fallback waits a jittered exponential delay and gets the same timeout
    /// as a primary attempt. When all of them fail the last error is returned and a
    /// [`FeedError::FallbackExhausted`] listing every primary attempt and every
    /// fallback is reported.
    #[instrument(skip(self, options, primary, fallbacks), fields(operation = %options.name))]
    pub async fn run_with_fallbacks<T, F, Fut>(
        &self,
        options: &RetryOptions,
        primary: F,
        fallbacks: Vec<Fallback<T>>,
    ) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let mut errors = Vec::new();
        let mut last = match self.run_traced(options, primary, &mut errors).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if fallbacks.is_empty() {
            return Err(last);
        }

        let name = options.name.as_str();
        let plan = self.plan(options);

        for (index, fallback) in fallbacks.into_iter().enumerate() {
            let position = index as u32 + 1;
            let delay = self.jittered_delay(&plan, position);
            debug!(operation = name, fallback = position, delay_ms = delay.as_millis() as u64, "trying fallback");
            tokio::time::sleep(delay).await;

            match Self::attempt(name, plan.timeout, fallback()).await {
                Ok(value) => {
                    info!(operation = name, fallback = position, "fallback succeeded");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(operation = name, fallback = position, error = %err, "fallback failed");
                    errors.push(format!("fallback {}: {}", position, err));
                    last = err;
                }
            }
        }

        let exhausted = FeedError::FallbackExhausted {
            operation: name.to_string(),
            errors,
        };
        self.analytics.report_error(name, &exhausted, ReportOptions::default());
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AnalyticsConfig, CircuitBreakerConfig};
    use crate::resilience::analytics::ErrorFilter;
    use crate::core::errors::ErrorCategory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn executor(threshold: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::default(),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::new(threshold, 30_000))),
            Arc::new(ErrorAnalytics::new(AnalyticsConfig::default())),
        )
    }

    #[test]
    fn test_backoff_sequence() {
        let base = Duration::from_millis(1000);
        let delays: Vec<u128> = (1..=4).map(|a| backoff_delay(base, 2.0, a).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_millis(1000);
        for attempt in 1..=4 {
            let raw = backoff_delay(base, 2.0, attempt);
            for _ in 0..200 {
                let jittered = apply_jitter(raw, 0.25, &mut rng);
                assert!(jittered >= raw.mul_f64(0.75) && jittered <= raw.mul_f64(1.25));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_makes_four_attempts() {
        let executor = executor(100);
        let calls = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));

        let f = failures.clone();
        let r = retries.clone();
        let options = RetryOptions::new("history")
            .max_retries(3)
            .on_failure(move |_, _| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .on_retry(move |_, _, _| {
                r.fetch_add(1, Ordering::SeqCst);
            });

        let c = calls.clone();
        let result: Result<(), _> = executor
            .run(&options, || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(FeedError::transport("connection refused")) }
            })
            .await;

        assert!(matches!(result, Err(FeedError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retries.load(Ordering::SeqCst), 3);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let executor = executor(100);
        let calls = Arc::new(AtomicU32::new(0));
        let succeeded_on = Arc::new(AtomicU32::new(0));
        let s = succeeded_on.clone();
        let options = RetryOptions::new("ticker").on_success(move |attempt| {
            s.store(attempt, Ordering::SeqCst);
        });

        let c = calls.clone();
        let value = executor
            .run(&options, || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FeedError::transport("reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(succeeded_on.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breakers().state("ticker"), Some(crate::resilience::circuit_breaker::BreakerState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let executor = executor(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = executor
            .run(&RetryOptions::new("orders"), || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(FeedError::Permission("invalid key".into())) }
            })
            .await;

        assert!(matches!(result, Err(FeedError::Permission(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_if_can_veto() {
        let executor = executor(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let options = RetryOptions::new("depth").retry_if(|_, attempt| attempt < 2);
        let _ = executor
            .run(&options, || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(FeedError::transport("reset")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_retryable_failure() {
        let executor = executor(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let options = RetryOptions::new("slow")
            .max_retries(1)
            .timeout(Duration::from_millis(100));

        let result: Result<(), _> = executor
            .run(&options, || {
                c.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(FeedError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let recorded = executor
            .analytics()
            .recent_errors(&ErrorFilter::category(ErrorCategory::Timeout));
        assert_eq!(recorded.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast() {
        let executor = executor(2);
        let options = RetryOptions::new("rest:binance:klines").max_retries(1);
        let _ = executor
            .run(&options, || async { Err::<(), _>(FeedError::transport("503")) })
            .await;

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = executor
            .run(&options, || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(FeedError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_chain_returns_first_success() {
        let executor = executor(100);
        let options = RetryOptions::new("candles").max_retries(0);
        let fallbacks: Vec<Fallback<&'static str>> = vec![
            fallback(|| async { Err(FeedError::transport("mirror down")) }),
            fallback(|| async { Ok("cache") }),
            fallback(|| async { Ok("never") }),
        ];

        let value = executor
            .run_with_fallbacks(&options, || async { Err(FeedError::transport("primary down")) }, fallbacks)
            .await
            .unwrap();
        assert_eq!(value, "cache");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_fallbacks_report_every_error() {
        let executor = executor(100);
        let options = RetryOptions::new("candles").max_retries(0);
        let fallbacks: Vec<Fallback<()>> = vec![
            fallback(|| async { Err(FeedError::transport("mirror down")) }),
            fallback(|| async { Err(FeedError::fatal("cache empty")) }),
        ];

        let result = executor
            .run_with_fallbacks(&options, || async { Err(FeedError::transport("primary down")) }, fallbacks)
            .await;
        assert!(matches!(result, Err(FeedError::Application { .. })));

        let latest = &executor.analytics().recent_errors(&ErrorFilter::default().limit(1))[0];
        assert_eq!(latest.code, "FALLBACK_EXHAUSTED");
        assert!(latest.message.contains("primary down"));
        assert!(latest.message.contains("mirror down"));
        assert!(latest.message.contains("cache empty"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_summary_keeps_every_primary_attempt() {
        let executor = executor(100);
        let options = RetryOptions::new("candles").max_retries(2);
        let edges = ["edge-a", "edge-b", "edge-c"];
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let fallbacks: Vec<Fallback<()>> = vec![fallback(|| async { Err(FeedError::transport("mirror down")) })];

        let result = executor
            .run_with_fallbacks(
                &options,
                move || {
                    let edge = edges[c.fetch_add(1, Ordering::SeqCst) % edges.len()];
                    async move { Err(FeedError::transport(format!("{} refused", edge))) }
                },
                fallbacks,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let latest = &executor.analytics().recent_errors(&ErrorFilter::default().limit(1))[0];
        assert_eq!(latest.code, "FALLBACK_EXHAUSTED");
        for (attempt, edge) in edges.iter().enumerate() {
            assert!(latest.message.contains(&format!("primary attempt {}: ", attempt + 1)));
            assert!(latest.message.contains(&format!("{} refused", edge)));
        }
        assert!(latest.message.contains("fallback 1: "));
    }
}
