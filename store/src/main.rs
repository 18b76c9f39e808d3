use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use store::batching::run_batcher;
use store::config::StoreConfig;
use store::errors::Error;
use store::{db, metrics, AppState, LatestStateCache, ReceiveClock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = StoreConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(config).await {
        error!("Store failed: {}", e);
        std::process::exit(1);
    }

    info!("Store stopped");
}

async fn run(config: StoreConfig) -> Result<(), Error> {
    info!("Starting drone telemetry store");
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics()?;

    let cache = Arc::new(LatestStateCache::new());
    let clock = Arc::new(ReceiveClock::new());

    let (log, batcher_handle) = match &config.database_url {
        Some(url) => {
            info!("Database: {}", url.split('@').last().unwrap_or("***"));
            let pool = db::make_pool(url).await?;

            match db::load_latest(&pool).await {
                Ok(records) => {
                    let count = records.len();
                    for record in records {
                        clock.observe(record.received_at);
                        cache.put(record);
                    }
                    info!("Restored latest state for {} drones", count);
                }
                Err(e) => warn!("Could not restore latest state: {}", e),
            }

            let (tx, rx) = mpsc::channel(config.channel_capacity);
            let handle = tokio::spawn(run_batcher(
                rx,
                pool,
                config.batch_size,
                config.batch_timeout_ms,
            ));
            (Some(tx), Some(handle))
        }
        None => {
            info!("DATABASE_URL not set, records are kept in memory only");
            (None, None)
        }
    };

    let app = store::app(AppState::new(cache, log).with_clock(clock));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .map_err(|source| Error::Bind {
            addr: config.http_addr.clone(),
            source,
        })?;
    info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    // The router owned the last sender; the batcher flushes and exits
    if let Some(handle) = batcher_handle {
        if tokio::time::timeout(BATCHER_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("Batcher did not drain within {:?}", BATCHER_DRAIN_TIMEOUT);
        }
    }

    Ok(())
}
