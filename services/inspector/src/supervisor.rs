use crate::config::LivenessConfig;
use crate::health::start_liveness_server;
use crate::sqs_consumer::SqsConsumer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the consumer loop and the liveness endpoint until `shutdown` is cancelled.
///
/// A liveness failure is logged and leaves the consumer running.
pub async fn run(consumer: SqsConsumer, liveness: LivenessConfig, shutdown: CancellationToken) {
    // Spawn SQS consumer task
    let consumer_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });

    // Spawn liveness endpoint task
    let liveness_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = start_liveness_server(&liveness, shutdown).await {
                error!(error = %e, "Liveness endpoint error");
            }
        }
    });

    info!("Inspector started successfully");

    if let Err(e) = consumer_handle.await {
        error!(error = %e, "SQS consumer task failed");
    }
    if let Err(e) = liveness_handle.await {
        error!(error = %e, "Liveness endpoint task failed");
    }
}
