use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use gateway::config::GatewayConfig;
use gateway::errors::{Error, Result};
use gateway::{metrics, HttpForwarder, MqttBridge, Pipeline, UdpListener};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(config).await {
        error!("Gateway failed: {}", e);
        std::process::exit(1);
    }

    info!("Gateway stopped");
}

async fn run(config: GatewayConfig) -> Result<()> {
    info!("Starting drone telemetry gateway");
    info!("UDP ingress: {}", config.udp_addr());
    info!("Sink: {}", config.sink_url);
    info!("Max in-flight messages: {}", config.max_in_flight);

    metrics::init_metrics()?;

    let forwarder = HttpForwarder::new(
        &config.sink_url,
        config.forward_timeout(),
        config.retry_policy(),
    )?;
    let pipeline = Pipeline::new(forwarder, config.max_in_flight);
    let cancel = CancellationToken::new();

    let listener = UdpListener::bind(&config.udp_addr(), config.udp_echo).await?;
    let mut udp_handle = tokio::spawn(listener.run(pipeline.clone(), cancel.clone()));

    let bridge_handle = if config.mqtt_enabled {
        let bridge = MqttBridge::new(config.bridge_config());
        Some(tokio::spawn(bridge.run(pipeline.clone(), cancel.clone())))
    } else {
        info!("MQTT bridge disabled");
        None
    };

    let metrics_listener = tokio::net::TcpListener::bind(&config.metrics_addr)
        .await
        .map_err(|source| Error::Bind {
            addr: config.metrics_addr.clone(),
            source,
        })?;
    info!("Metrics server listening on {}", config.metrics_addr);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }));
    let server_cancel = cancel.clone();
    let mut server_handle = tokio::spawn(async move {
        axum::serve(metrics_listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
            .map_err(Error::from)
    });

    let bridge = async move {
        match bridge_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
        joined = &mut udp_handle => {
            Err(Error::unexpected_exit("UDP listener", joined.map(|()| Ok(()))))
        }
        joined = &mut server_handle => Err(Error::unexpected_exit("metrics server", joined)),
        joined = bridge => Err(Error::unexpected_exit("MQTT bridge", joined)),
    };

    info!("Shutting down");
    cancel.cancel();

    if pipeline.shutdown(config.shutdown_grace()).await {
        info!("All in-flight messages drained");
    } else {
        warn!("Shutdown grace period elapsed with messages in flight");
    }

    result
}

async fn metrics_handler() -> (StatusCode, String) {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
