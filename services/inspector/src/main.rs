use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use inspector::supervisor;
use inspector::{
    Config, ConsumerSettings, HttpDispatcher, MetadataResolver, RetryPolicy, S3MetadataSource,
    SqsConsumer, SqsQueue,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    // Fail fast before anything starts
    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        region = %config.aws.region,
        "Starting Inspector"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws.region.clone()))
        .load()
        .await;

    let queue = Arc::new(
        SqsQueue::connect(&sdk_config, &config)
            .await
            .context("Failed to initialize SQS queue")?,
    );

    let storage = Arc::new(S3MetadataSource::new(&sdk_config, &config));

    let collector_url = config
        .collector
        .url
        .as_deref()
        .context("Collector URL is not configured")?;
    let dispatcher = Arc::new(
        HttpDispatcher::new(collector_url, config.request_timeout())
            .context("Failed to initialize size-report dispatcher")?,
    );
    info!(endpoint = %dispatcher.endpoint(), "Size reports will be sent to collector");

    let resolver = MetadataResolver::new(storage, RetryPolicy::from_config(&config));
    let consumer = SqsConsumer::new(
        queue,
        resolver,
        dispatcher,
        ConsumerSettings::from_config(&config),
    );

    let shutdown = CancellationToken::new();

    // Spawn consumer and liveness endpoint
    let service = tokio::spawn(supervisor::run(
        consumer,
        config.liveness.clone(),
        shutdown.clone(),
    ));

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down inspector");

    shutdown.cancel();

    if let Err(e) = service.await {
        error!(error = %e, "Inspector tasks failed");
    }

    info!("Inspector stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
