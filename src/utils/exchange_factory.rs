use crate::core::config::{ConfigError, ConnectionConfig, FeedConfig, HealthCheckMode};
use crate::core::errors::FeedError;
use crate::core::kernel::rest::{RestClientBuilder, RestClientConfig, ReqwestRest, RetryingRest};
use crate::core::kernel::ws::{TungsteniteWs, WsSession};
use crate::exchanges::{binance, bybit, hyperliquid, okx};
use crate::resilience::analytics::ErrorAnalytics;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::retry::RetryExecutor;
use crate::stream::manager::{ConnectionManager, ConnectionManagerBuilder};
use crate::stream::network::NetworkMonitor;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeId {
    Binance,
    Bybit,
    Okx,
    Hyperliquid,
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binance => write!(f, "binance"),
            Self::Bybit => write!(f, "bybit"),
            Self::Okx => write!(f, "okx"),
            Self::Hyperliquid => write!(f, "hyperliquid"),
        }
    }
}

impl FromStr for ExchangeId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "bybit" => Ok(Self::Bybit),
            "okx" => Ok(Self::Okx),
            "hyperliquid" => Ok(Self::Hyperliquid),
            other => Err(ConfigError::InvalidConfiguration(format!(
                "Unknown exchange: {}",
                other
            ))),
        }
    }
}

impl ExchangeId {
    pub const ALL: [Self; 4] = [Self::Binance, Self::Bybit, Self::Okx, Self::Hyperliquid];

    pub fn ws_url(self) -> &'static str {
        match self {
            Self::Binance => binance::WS_URL,
            Self::Bybit => bybit::WS_URL,
            Self::Okx => okx::WS_URL,
            Self::Hyperliquid => hyperliquid::WS_URL,
        }
    }

    pub fn rest_url(self) -> &'static str {
        match self {
            Self::Binance => binance::REST_URL,
            Self::Bybit => bybit::REST_URL,
            Self::Okx => okx::REST_URL,
            Self::Hyperliquid => hyperliquid::REST_URL,
        }
    }

    /// Binance has no application-level ping
    pub fn health_check(self) -> HealthCheckMode {
        match self {
            Self::Binance => HealthCheckMode::Staleness,
            Self::Bybit | Self::Okx | Self::Hyperliquid => HealthCheckMode::Ping,
        }
    }

    /// Shared connection settings with this exchange's health-check mode
    pub fn connection_config(self, base: &ConnectionConfig) -> ConnectionConfig {
        base.clone().with_health_check(self.health_check())
    }
}

/// Composition helper owning the process-wide shared services
#[derive(Debug, Clone)]
pub struct ExchangeFactory {
    config: FeedConfig,
    analytics: Arc<ErrorAnalytics>,
    breakers: Arc<CircuitBreakerRegistry>,
    network: Arc<NetworkMonitor>,
}

impl ExchangeFactory {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            analytics: Arc::new(ErrorAnalytics::new(config.analytics.clone())),
            breakers: Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())),
            network: Arc::new(NetworkMonitor::new()),
            config,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn analytics(&self) -> &Arc<ErrorAnalytics> {
        &self.analytics
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(
            self.config.retry.clone(),
            self.breakers.clone(),
            self.analytics.clone(),
        )
    }

    /// Start the periodic analytics cleanup task
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        self.analytics.spawn_cleanup()
    }

    /// Production connection over tokio-tungstenite
    pub fn build_connection(&self, id: ExchangeId) -> ConnectionManager {
        let config = id.connection_config(&self.config.connection);
        let session = TungsteniteWs::new(id.ws_url(), id.to_string())
            .with_connect_timeout(std::time::Duration::from_millis(config.max_connect_timeout_ms));
        self.build_connection_with(id, session)
    }

    /// Connection for `id` over an arbitrary session
    pub fn build_connection_with<S: WsSession>(&self, id: ExchangeId, session: S) -> ConnectionManager {
        let config = id.connection_config(&self.config.connection);
        let name = id.to_string();
        let url = id.ws_url();
        match id {
            ExchangeId::Binance => self.spawn(ConnectionManagerBuilder::new(name, url, config, binance::BinanceCodec::new(), session)),
            ExchangeId::Bybit => self.spawn(ConnectionManagerBuilder::new(name, url, config, bybit::BybitCodec::new(), session)),
            ExchangeId::Okx => self.spawn(ConnectionManagerBuilder::new(name, url, config, okx::OkxCodec::new(), session)),
            ExchangeId::Hyperliquid => self.spawn(ConnectionManagerBuilder::new(name, url, config, hyperliquid::HyperliquidCodec::new(), session)),
        }
    }

    fn spawn<S: WsSession, C: crate::core::kernel::codec::WsCodec>(
        &self,
        builder: ConnectionManagerBuilder<S, C>,
    ) -> ConnectionManager {
        builder
            .with_network(self.network.clone())
            .with_analytics(self.analytics.clone())
            .with_circuit_breaker(self.breakers.clone())
            .spawn()
    }

    /// Rate-limited REST client whose calls retry under `rest:<exchange>:<endpoint>` circuits
    pub fn rest(&self, id: ExchangeId) -> Result<RetryingRest<ReqwestRest>, FeedError> {
        let rest = RestClientBuilder::new(RestClientConfig::new(id.rest_url(), id.to_string())).build()?;
        Ok(RetryingRest::new(rest, self.executor()))
    }
}
