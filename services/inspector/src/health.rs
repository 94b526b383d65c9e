use crate::config::LivenessConfig;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Body returned by the liveness probe
pub const LIVENESS_BODY: &str = "Inspector is running";

/// Create the liveness router
pub fn create_router() -> Router {
    Router::new()
        .route("/", get(liveness))
        .layer(TraceLayer::new_for_http())
}

/// Liveness endpoint; reports process-up only
async fn liveness() -> &'static str {
    LIVENESS_BODY
}

/// Bind the liveness endpoint and serve it until `shutdown` is cancelled
pub async fn start_liveness_server(
    config: &LivenessConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind liveness endpoint to {addr}"))?;

    serve(listener, shutdown).await
}

/// Serve the liveness endpoint on an already bound listener
pub async fn serve(listener: tokio::net::TcpListener, shutdown: CancellationToken) -> Result<()> {
    let addr = listener
        .local_addr()
        .context("Failed to read liveness endpoint address")?;
    info!(address = %addr, "Starting liveness endpoint");

    axum::serve(listener, create_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Liveness endpoint error")?;

    info!("Liveness endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_liveness_route() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, shutdown.clone()));

        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), LIVENESS_BODY);

        shutdown.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("liveness endpoint did not stop");
        assert!(stopped.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, shutdown.clone()));

        let response = reqwest::get(format!("http://{addr}/size-report"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = LivenessConfig {
            host: "127.0.0.1".to_string(),
            port: occupied.local_addr().unwrap().port(),
        };

        let result = start_liveness_server(&config, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
