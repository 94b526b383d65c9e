use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Path appended to the collector base URL
pub const SIZE_REPORT_PATH: &str = "/size-report";

/// Size report sent to the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeReport {
    /// Object key the report is about
    pub filename: String,
    /// Authoritative object size
    pub size_bytes: u64,
}

/// How the collector responded to a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Collector answered 200
    Ack,
    /// Collector answered with any other status
    Nack { status: u16, body: String },
    /// No response was obtained (connect failure, timeout, ...)
    TransportError(String),
}

impl DispatchOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, DispatchOutcome::Ack)
    }
}

/// Destination for size reports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver one report and classify the result. Never retries.
    async fn dispatch(&self, report: &SizeReport) -> DispatchOutcome;
}

/// [`ReportSink`] that POSTs JSON to `{base_url}/size-report`
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDispatcher {
    /// Create a dispatcher whose requests give up after `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: size_report_endpoint(base_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReportSink for HttpDispatcher {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn dispatch(&self, report: &SizeReport) -> DispatchOutcome {
        let response = match self.client.post(&self.endpoint).json(report).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to reach size-report collector");
                metrics::counter!("inspector.reports.failed").increment(1);
                return DispatchOutcome::TransportError(e.to_string());
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            debug!("Size report accepted");
            metrics::counter!("inspector.reports.acked").increment(1);
            return DispatchOutcome::Ack;
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            status = status.as_u16(),
            body = %body,
            "Size-report collector rejected report"
        );
        metrics::counter!("inspector.reports.nacked").increment(1);

        DispatchOutcome::Nack {
            status: status.as_u16(),
            body,
        }
    }
}

/// Build the report URL from a collector base URL
pub fn size_report_endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), SIZE_REPORT_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode as HttpStatus, routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone)]
    struct Collector {
        status: HttpStatus,
        delay: Duration,
        received: Arc<Mutex<Vec<SizeReport>>>,
    }

    async fn collect(
        State(collector): State<Collector>,
        Json(report): Json<SizeReport>,
    ) -> (HttpStatus, &'static str) {
        tokio::time::sleep(collector.delay).await;
        collector.received.lock().push(report);
        (collector.status, "collector says no")
    }

    async fn spawn_collector(status: HttpStatus, delay: Duration) -> (String, Collector) {
        let collector = Collector {
            status,
            delay,
            received: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route(SIZE_REPORT_PATH, post(collect))
            .with_state(collector.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), collector)
    }

    fn report() -> SizeReport {
        SizeReport {
            filename: "photos/a.png".to_string(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn test_report_wire_format() {
        let value = serde_json::to_value(report()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "filename": "photos/a.png", "size_bytes": 1024 })
        );
    }

    #[test]
    fn test_size_report_endpoint() {
        assert_eq!(
            size_report_endpoint("http://frontend:3000"),
            "http://frontend:3000/size-report"
        );
        assert_eq!(
            size_report_endpoint("http://frontend:3000/"),
            "http://frontend:3000/size-report"
        );
    }

    #[tokio::test]
    async fn test_ok_is_ack() {
        let (url, collector) = spawn_collector(HttpStatus::OK, Duration::ZERO).await;
        let dispatcher = HttpDispatcher::new(&url, Duration::from_secs(5)).unwrap();

        assert_eq!(dispatcher.dispatch(&report()).await, DispatchOutcome::Ack);
        assert_eq!(collector.received.lock().as_slice(), &[report()]);
    }

    #[tokio::test]
    async fn test_server_error_is_nack() {
        let (url, _) = spawn_collector(HttpStatus::INTERNAL_SERVER_ERROR, Duration::ZERO).await;
        let dispatcher = HttpDispatcher::new(&url, Duration::from_secs(5)).unwrap();

        assert_eq!(
            dispatcher.dispatch(&report()).await,
            DispatchOutcome::Nack {
                status: 500,
                body: "collector says no".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_other_success_codes_are_nack() {
        let (url, _) = spawn_collector(HttpStatus::ACCEPTED, Duration::ZERO).await;
        let dispatcher = HttpDispatcher::new(&url, Duration::from_secs(5)).unwrap();

        let outcome = dispatcher.dispatch(&report()).await;
        assert!(matches!(outcome, DispatchOutcome::Nack { status: 202, .. }));
        assert!(!outcome.is_ack());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher =
            HttpDispatcher::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            dispatcher.dispatch(&report()).await,
            DispatchOutcome::TransportError(_)
        ));
    }

    #[tokio::test]
    async fn test_slow_collector_times_out() {
        let (url, _) = spawn_collector(HttpStatus::OK, Duration::from_secs(5)).await;
        let dispatcher = HttpDispatcher::new(&url, Duration::from_millis(100)).unwrap();

        assert!(matches!(
            dispatcher.dispatch(&report()).await,
            DispatchOutcome::TransportError(_)
        ));
    }
}
