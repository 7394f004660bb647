use feedwire::core::config::{AnalyticsConfig, CircuitBreakerConfig, RetryConfig};
use feedwire::resilience::analytics::error_signature;
use feedwire::resilience::{fallback, BreakerState, CriticalPattern, ErrorFilter, ErrorRecord, ReportOptions};
use feedwire::{CircuitBreakerRegistry, ErrorAnalytics, ErrorListener, FeedError, RetryExecutor, RetryOptions};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    errors: Mutex<Vec<String>>,
    critical: Mutex<Vec<CriticalPattern>>,
}

impl ErrorListener for Recorder {
    fn on_error(&self, record: &ErrorRecord) {
        self.errors.lock().push(record.code.clone());
    }

    fn on_critical_pattern(&self, pattern: &CriticalPattern) {
        self.critical.lock().push(pattern.clone());
    }
}

fn executor(threshold: u32) -> RetryExecutor {
    RetryExecutor::new(
        RetryConfig::default(),
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::new(threshold, 60_000))),
        Arc::new(ErrorAnalytics::new(AnalyticsConfig::default())),
    )
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_open_the_shared_circuit() {
    let executor = executor(5);
    let calls = Arc::new(AtomicU32::new(0));
    let options = RetryOptions::new("rest:binance:/api/v3/depth").max_retries(2);

    for _ in 0..2 {
        let calls = calls.clone();
        let result: Result<(), FeedError> = executor
            .run(&options, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FeedError::transport("connection reset")) }
            })
            .await;
        assert!(result.is_err());
    }

    // Threshold reached on the fifth failed attempt, during the second call
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(
        executor.breakers().state("rest:binance:/api/v3/depth"),
        Some(BreakerState::Open)
    );

    let before = calls.load(Ordering::SeqCst);
    let err = executor
        .run(&options, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, FeedError>(()) }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), before);

    // Unrelated circuits are unaffected
    let ok = executor
        .run(&RetryOptions::new("rest:binance:/api/v3/trades"), || async { Ok::<_, FeedError>(7) })
        .await
        .unwrap();
    assert_eq!(ok, 7);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_closes_circuit() {
    let executor = executor(1);
    let options = RetryOptions::new("ws:okx").max_retries(0);

    let _ = executor
        .run(&options, || async { Err::<(), _>(FeedError::transport("refused")) })
        .await;
    assert_eq!(executor.breakers().state("ws:okx"), Some(BreakerState::Open));

    tokio::time::sleep(Duration::from_secs(61)).await;
    executor
        .run(&options, || async { Ok::<_, FeedError>(()) })
        .await
        .unwrap();
    assert_eq!(executor.breakers().state("ws:okx"), Some(BreakerState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_chain_reports_every_failure() {
    let executor = executor(100);
    let recorder = Arc::new(Recorder::default());
    executor.analytics().add_listener(recorder.clone());

    let options = RetryOptions::new("klines").max_retries(1);
    let err = executor
        .run_with_fallbacks(
            &options,
            || async { Err::<Vec<u64>, _>(FeedError::transport("primary down")) },
            vec![
                fallback(|| async { Err(FeedError::application("cache miss")) }),
                fallback(|| async { Err(FeedError::transport("mirror down")) }),
            ],
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("mirror down"));
    // Primary attempts are reported one by one, fallbacks only in the summary
    assert_eq!(
        *recorder.errors.lock(),
        vec!["TRANSPORT", "TRANSPORT", "FALLBACK_EXHAUSTED"]
    );

    let exhausted = executor
        .analytics()
        .recent_errors(&ErrorFilter::source("klines").limit(1));
    assert!(exhausted[0].message.contains("primary attempt 1: Transport error: primary down"));
    assert!(exhausted[0].message.contains("primary attempt 2: "));
    assert!(exhausted[0].message.contains("fallback 2: "));
}

#[tokio::test]
async fn test_critical_pattern_fires_once_per_signature() {
    let config = AnalyticsConfig {
        critical_error_threshold: 3,
        ..AnalyticsConfig::default()
    };
    let analytics = ErrorAnalytics::new(config);
    let recorder = Arc::new(Recorder::default());
    analytics.add_listener(recorder.clone());

    for id in [1001, 1002, 1003, 1004, 1005] {
        analytics.report_error(
            "ws:bybit",
            &FeedError::fatal(format!("order {} rejected for \"BTCUSDT\"", id)),
            ReportOptions::default(),
        );
    }

    let signature = error_signature("ws:bybit", "Application error: order 1001 rejected for \"ETHUSDT\"");
    assert_eq!(analytics.signature_count(&signature), 5);

    let critical = recorder.critical.lock();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].count, 3);
    assert_eq!(critical[0].signature, signature);

    let stats = analytics.stats();
    assert_eq!(stats.total_recorded, 5);
    assert_eq!(stats.last_5_minutes, 5);
    assert_eq!(stats.by_source.get("ws:bybit"), Some(&5));
}

#[tokio::test]
async fn test_sampled_out_reports_are_not_recorded() {
    let analytics = ErrorAnalytics::new(AnalyticsConfig::default().with_sample_rate("noisy", 0.0));

    let dropped = analytics.report_error("noisy", &FeedError::transport("flap"), ReportOptions::default());
    assert!(dropped.is_none());

    let kept = analytics.report_error("noisy", &FeedError::transport("flap"), ReportOptions::fatal());
    assert!(kept.is_some());
    assert_eq!(analytics.stats().retained, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_track_independent_circuits() {
    let executor = executor(1);
    let endpoints = ["/api/v3/depth", "/api/v3/trades", "/api/v3/klines"];

    let runs = endpoints.iter().map(|endpoint| {
        let options = RetryOptions::new(format!("rest:binance:{}", endpoint)).max_retries(0);
        let executor = &executor;
        async move {
            executor
                .run(&options, || async move {
                    if *endpoint == "/api/v3/trades" {
                        Err(FeedError::transport("502"))
                    } else {
                        Ok(endpoint.len())
                    }
                })
                .await
        }
    });
    let results = futures::future::join_all(runs).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert_eq!(executor.breakers().len(), 3);
    assert_eq!(
        executor.breakers().state("rest:binance:/api/v3/trades"),
        Some(BreakerState::Open)
    );
    assert_eq!(
        executor.breakers().state("rest:binance:/api/v3/depth"),
        Some(BreakerState::Closed)
    );
}
