use crate::core::errors::FeedError;
use crate::resilience::retry::{RetryExecutor, RetryOptions};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, trace};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// REST client trait for public market-data endpoints
///
/// Historical-bar fetchers and other consumers go through this trait so they can be
/// wrapped in [`RetryingRest`] without knowing about retries.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Make a GET request
    ///
    /// # Arguments
    /// * `endpoint` - The API endpoint path
    /// * `query_params` - Query parameters as key-value pairs
    ///
    /// # Returns
    /// The response body as a JSON value
    async fn get(&self, endpoint: &str, query_params: &[(&str, &str)]) -> Result<Value, FeedError>;

    /// Make a GET request with strongly-typed response
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<T, FeedError> {
        let value = self.get(endpoint, query_params).await?;
        serde_json::from_value(value).map_err(FeedError::from)
    }

    /// Exchange name used in logs and circuit names
    fn exchange_name(&self) -> &str;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Client-side request budget
    pub requests_per_second: u32,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            exchange_name: exchange_name.into(),
            timeout_seconds: 30,
            requests_per_second: 10,
            user_agent: "feedwire/0.1".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Builder for creating REST client instances
#[derive(Debug)]
pub struct RestClientBuilder {
    config: RestClientConfig,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self { config }
    }

    /// Build the REST client
    pub fn build(self) -> Result<ReqwestRest, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| FeedError::InvalidParameters(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(self.config.requests_per_second).unwrap_or(nonzero!(10u32));
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(ReqwestRest {
            client,
            config: self.config,
            limiter,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    pub fn new(base_url: impl Into<String>, exchange_name: impl Into<String>) -> Result<Self, FeedError> {
        RestClientBuilder::new(RestClientConfig::new(base_url, exchange_name)).build()
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, FeedError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Transport(format!("Failed to read response body: {}", e)))?;

        trace!("Response body: {}", body);

        if status.is_success() {
            serde_json::from_str(&body).map_err(FeedError::from)
        } else {
            Err(status_error(status, &body))
        }
    }
}

/// Map a non-success HTTP status onto the error taxonomy
pub fn status_error(status: StatusCode, body: &str) -> FeedError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    match status.as_u16() {
        401 | 403 => FeedError::Permission(message),
        408 | 429 => FeedError::Transport(message),
        500..=599 => FeedError::Transport(message),
        _ => FeedError::fatal(message),
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, query_params), fields(exchange = %self.config.exchange_name, endpoint = %endpoint))]
    async fn get(&self, endpoint: &str, query_params: &[(&str, &str)]) -> Result<Value, FeedError> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(self.build_url(endpoint))
            .query(query_params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FeedError::Timeout {
                        operation: endpoint.to_string(),
                        after: Duration::from_secs(self.config.timeout_seconds),
                    }
                } else {
                    FeedError::Transport(format!("Request failed: {}", e))
                }
            })?;

        self.handle_response(response).await
    }

    fn exchange_name(&self) -> &str {
        &self.config.exchange_name
    }
}

/// A [`RestClient`] whose calls run through the retry executor.
///
/// Each endpoint gets its own circuit, named `rest:<exchange>:<endpoint>`.
#[derive(Debug, Clone)]
pub struct RetryingRest<R: RestClient> {
    inner: R,
    executor: RetryExecutor,
}

impl<R: RestClient> RetryingRest<R> {
    pub fn new(inner: R, executor: RetryExecutor) -> Self {
        Self { inner, executor }
    }

    pub fn circuit_name(&self, endpoint: &str) -> String {
        format!("rest:{}:{}", self.inner.exchange_name(), endpoint)
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: RestClient> RestClient for RetryingRest<R> {
    async fn get(&self, endpoint: &str, query_params: &[(&str, &str)]) -> Result<Value, FeedError> {
        let options = RetryOptions::new(self.circuit_name(endpoint));
        self.executor
            .run(&options, || self.inner.get(endpoint, query_params))
            .await
    }

    fn exchange_name(&self) -> &str {
        self.inner.exchange_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AnalyticsConfig, CircuitBreakerConfig, RetryConfig};
    use crate::resilience::analytics::ErrorAnalytics;
    use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedRest {
        responses: Mutex<Vec<Result<Value, FeedError>>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl RestClient for ScriptedRest {
        async fn get(&self, _endpoint: &str, _query: &[(&str, &str)]) -> Result<Value, FeedError> {
            *self.calls.lock() += 1;
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(FeedError::transport("script exhausted")))
        }

        fn exchange_name(&self) -> &str {
            "binance"
        }
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::default(),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            Arc::new(ErrorAnalytics::new(AnalyticsConfig::default())),
        )
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(StatusCode::FORBIDDEN, ""), FeedError::Permission(_)));
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, "bad symbol").is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_rest_retries_transient_errors() {
        let inner = ScriptedRest {
            // popped from the back
            responses: Mutex::new(vec![
                Ok(json!([[1, "1.0"]])),
                Err(status_error(StatusCode::SERVICE_UNAVAILABLE, "")),
            ]),
            calls: Mutex::new(0),
        };
        let rest = RetryingRest::new(inner, executor());

        let bars: Vec<(u64, String)> = rest.get_json("/api/v3/klines", &[("symbol", "BTCUSDT")]).await.unwrap();
        assert_eq!(bars, vec![(1, "1.0".to_string())]);
        assert_eq!(*rest.inner().calls.lock(), 2);
        assert_eq!(rest.circuit_name("/api/v3/klines"), "rest:binance:/api/v3/klines");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_rest_stops_on_client_error() {
        let inner = ScriptedRest {
            responses: Mutex::new(vec![Err(status_error(StatusCode::NOT_FOUND, "no such endpoint"))]),
            calls: Mutex::new(0),
        };
        let rest = RetryingRest::new(inner, executor());

        let err = rest.get("/api/v3/missing", &[]).await.unwrap_err();
        assert!(matches!(err, FeedError::Application { retryable: false, .. }));
        assert_eq!(*rest.inner().calls.lock(), 1);
    }
}
