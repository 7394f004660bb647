use feedwire::core::types::ChannelMessage;
use feedwire::{ExchangeFactory, ExchangeId, FeedConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FEEDWIRE_LOG_JSON").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config() -> anyhow::Result<FeedConfig> {
    #[cfg(feature = "env-file")]
    let config = FeedConfig::from_env_auto()?;
    #[cfg(not(feature = "env-file"))]
    let config = FeedConfig::from_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let exchange: ExchangeId = args
        .next()
        .as_deref()
        .unwrap_or("binance")
        .parse()?;
    let mut channels: Vec<String> = args.collect();
    if channels.is_empty() {
        channels.push(default_channel(exchange).to_string());
    }

    let factory = ExchangeFactory::new(load_config()?);
    let maintenance = factory.spawn_maintenance();
    let connection = factory.build_connection(exchange);

    for channel in &channels {
        connection
            .subscribe(channel.clone(), |message: &ChannelMessage| -> anyhow::Result<()> {
                info!(
                    exchange = %message.exchange,
                    channel = %message.channel,
                    kind = message.frame.kind(),
                    "frame"
                );
                Ok(())
            })
            .await?;
    }

    let state = connection.connect().await?;
    info!(%exchange, %state, channels = ?channels, "streaming, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {}", e);
    }

    let stats = connection.stats();
    let errors = factory.analytics().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&errors)?);

    connection.close().await;
    maintenance.abort();
    Ok(())
}

fn default_channel(exchange: ExchangeId) -> &'static str {
    match exchange {
        ExchangeId::Binance => "btcusdt@trade",
        ExchangeId::Bybit => "publicTrade.BTCUSDT",
        ExchangeId::Okx => "trades:BTC-USDT",
        ExchangeId::Hyperliquid => "trades:BTC",
    }
}
