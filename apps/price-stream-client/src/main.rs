//! Price Stream Client Binary
//!
//! Connects to the price feed, publishes synthetic prices for the default
//! catalog and logs every update that comes back.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-client
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `PRICE_STREAM_URL`: Feed endpoint (default: <wss://ws.postman-echo.com/raw>)
//! - `PRICE_STREAM_CONNECT_TIMEOUT_SECS`: Open attempt timeout (default: 10)
//! - `PRICE_STREAM_RECONNECT_DELAY_SECS`: Steady reconnect delay (default: 5)
//! - `PRICE_STREAM_MAX_RETRY_ATTEMPTS`: Attempts following the backoff table (default: 3)
//! - `PRICE_STREAM_BACKOFF_SECS`: Comma-separated backoff table (default: 1,2,5)
//! - `PRICE_STREAM_PROBE_INTERVAL_SECS`: Reachability probe interval (default: 5)
//! - `PRICE_STREAM_TICK_INTERVAL_MS`: Generator tick interval (default: 2000)
//! - `PRICE_STREAM_VOLATILITY`: Maximum relative move per tick (default: 0.02)
//! - `PRICE_STREAM_MIN_PRICE` / `PRICE_STREAM_MAX_PRICE`: Price bounds (default: 1 / 10000)
//! - `PRICE_STREAM_SUBSCRIBER_CAPACITY`: Buffered updates per subscriber (default: 1024)
//! - `PRICE_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `price_stream_client=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use price_stream_client::application::ports::{PriceSink, TrackedItemSource};
use price_stream_client::infrastructure::health::{HealthServer, HealthServerState};
use price_stream_client::infrastructure::telemetry;
use price_stream_client::{
    ClientConfig, ConnectionState, PriceGenerator, ProbeConfig, ProbeReachability, StaticItemSource,
    StreamingClient, StreamingConfig, WebSocketTransportFactory, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound for disconnecting on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price stream client");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Reachability probe against the feed host
    let probe_config =
        ProbeConfig::for_url(&config.connection.url, config.connection.probe_interval)
            .context("feed URL has no reachable host")?;
    let reachability = Arc::new(ProbeReachability::new(probe_config));
    let probe = Arc::clone(&reachability);
    let probe_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        probe.run(probe_shutdown).await;
    });

    let streaming_config = StreamingConfig {
        connection: config.connection.clone().into(),
        broadcast: config.broadcast.into(),
        bounds: config.generator.bounds,
    };
    let client = StreamingClient::new(
        streaming_config,
        Arc::new(WebSocketTransportFactory::default()),
        reachability,
    );

    let sink: Arc<dyn PriceSink> = Arc::clone(&client) as Arc<dyn PriceSink>;
    let generator = Arc::new(PriceGenerator::new(config.generator.into(), sink));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&client),
        Some(Arc::clone(&generator)),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Log every inbound update with its direction
    let catalog = Arc::new(StaticItemSource::default());
    let (subscription, mut updates) = client.subscribe();
    let log_catalog = Arc::clone(&catalog);
    tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            match log_catalog.record(&update) {
                Some(change) => tracing::info!(
                    symbol = %update.symbol,
                    price = update.price,
                    change = format_args!("{:+.2}", change.amount()),
                    percent = format_args!("{:+.2}%", change.percent()),
                    "{}",
                    change.direction.arrow()
                ),
                None => tracing::info!(
                    symbol = %update.symbol,
                    price = update.price,
                    "Update for untracked symbol"
                ),
            }
        }
    });

    if let Err(e) = client.connect().await {
        tracing::warn!(error = %e, "Initial connection failed, retrying in background");
    }

    // Generation starts on the first successful connection.
    let mut states = client.state_changes();
    let start_generator = Arc::clone(&generator);
    let start_catalog = Arc::clone(&catalog);
    let start_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        let connected = tokio::select! {
            () = start_shutdown.cancelled() => false,
            connected = async {
                states.wait_for(ConnectionState::is_connected).await.is_ok()
            } => connected,
        };
        if !connected {
            return;
        }
        match start_generator.start(start_catalog.tracked_items().await) {
            Ok(()) => tracing::info!(symbols = start_catalog.symbol_count(), "Price stream client ready"),
            Err(e) => tracing::error!(error = %e, "Failed to start price generator"),
        }
    });

    await_shutdown(shutdown_token).await?;

    generator.stop();
    client.unsubscribe(subscription);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.disconnect())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Disconnect timed out"
        );
    }

    tracing::info!(ticks = generator.ticks(), "Price stream client stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.connection.url,
        health_port = config.server.health_port,
        tick_ms = u64::try_from(config.generator.tick_interval.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    tracing::debug!(
        connect_timeout_secs = config.connection.connect_timeout.as_secs(),
        reconnect_delay_secs = config.connection.reconnect_delay.as_secs(),
        max_retry_attempts = config.connection.max_retry_attempts,
        subscriber_capacity = config.broadcast.subscriber_capacity,
        "Connection settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    Ok(())
}
