use crate::config::Config;
use crate::event_decoder::ObjectReference;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use backoff::backoff::{Backoff, Constant};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Classified failure of a single metadata lookup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Object not found")]
    NotFound,

    #[error("Permanent storage error: {0}")]
    Permanent(String),

    #[error("Transient storage error: {0}")]
    Transient(String),
}

/// Failure of a resolve call after the retry policy has been applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Object {0} not found")]
    NotFound(String),

    #[error("Metadata lookup for {object} failed permanently: {reason}")]
    Permanent { object: String, reason: String },

    #[error("Metadata lookup for {object} gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        object: String,
        attempts: u32,
        last_error: String,
    },
}

impl ResolverError {
    /// Whether retrying the same message later cannot change the outcome
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ResolverError::Exhausted { .. })
    }
}

/// Metadata-only object lookup capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectMetadataSource: Send + Sync {
    /// Return the object's size in bytes without transferring its content
    async fn content_length(&self, bucket: &str, key: &str) -> Result<u64, StorageError>;
}

/// [`ObjectMetadataSource`] backed by S3 `HeadObject`
pub struct S3MetadataSource {
    client: S3Client,
}

impl S3MetadataSource {
    /// Create an S3 client from the shared AWS configuration
    pub fn new(sdk_config: &SdkConfig, config: &Config) -> Self {
        let mut s3_config_builder = S3ConfigBuilder::from(sdk_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.aws.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.storage.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = %config.aws.region,
            bucket = config.storage.bucket_name.as_deref().unwrap_or("<any>"),
            "S3 metadata source initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectMetadataSource for S3MetadataSource {
    async fn content_length(&self, bucket: &str, key: &str) -> Result<u64, StorageError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify_head_object_error)?;

        let length = output.content_length().ok_or_else(|| {
            StorageError::Permanent("HeadObject response has no content length".to_string())
        })?;

        u64::try_from(length)
            .map_err(|_| StorageError::Permanent(format!("negative content length {length}")))
    }
}

fn classify_head_object_error(err: SdkError<HeadObjectError>) -> StorageError {
    match &err {
        SdkError::ServiceError(service) => {
            if service.err().is_not_found() {
                return StorageError::NotFound;
            }
            let status = service.raw().status().as_u16();
            classify_status(status, DisplayErrorContext(&err).to_string())
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient(DisplayErrorContext(&err).to_string())
        }
        _ => StorageError::Permanent(DisplayErrorContext(&err).to_string()),
    }
}

/// Map an HTTP status from the storage service onto a retry class
pub fn classify_status(status: u16, message: String) -> StorageError {
    match status {
        404 => StorageError::NotFound,
        408 | 429 => StorageError::Transient(message),
        400..=499 => StorageError::Permanent(message),
        _ => StorageError::Transient(message),
    }
}

/// Attempt budget for a single lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Constant delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.storage.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Resolves object sizes with bounded retry on transient failures
pub struct MetadataResolver {
    source: Arc<dyn ObjectMetadataSource>,
    policy: RetryPolicy,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn ObjectMetadataSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Look up the authoritative size of `object`.
    ///
    /// Not-found and other permanent failures return after the first attempt;
    /// transient failures are retried until `max_attempts` is reached.
    #[instrument(skip(self), fields(bucket = %object.bucket, key = %object.key))]
    pub async fn resolve(&self, object: &ObjectReference) -> Result<u64, ResolverError> {
        let started = Instant::now();
        let mut backoff = Constant::new(self.policy.delay);
        let mut attempt = 0u32;

        let result = loop {
            attempt += 1;
            metrics::counter!("inspector.resolve.attempts").increment(1);

            match self
                .source
                .content_length(&object.bucket, &object.key)
                .await
            {
                Ok(size_bytes) => {
                    debug!(attempt, size_bytes, "Object size resolved");
                    break Ok(size_bytes);
                }
                Err(StorageError::NotFound) => {
                    warn!(attempt, "Object not found");
                    break Err(ResolverError::NotFound(object.to_string()));
                }
                Err(StorageError::Permanent(reason)) => {
                    error!(attempt, error = %reason, "Metadata lookup failed permanently");
                    break Err(ResolverError::Permanent {
                        object: object.to_string(),
                        reason,
                    });
                }
                Err(StorageError::Transient(reason)) => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            error = %reason,
                            "Metadata lookup attempts exhausted"
                        );
                        break Err(ResolverError::Exhausted {
                            object: object.to_string(),
                            attempts: attempt,
                            last_error: reason,
                        });
                    }

                    let delay = backoff.next_backoff().unwrap_or(self.policy.delay);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Metadata lookup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        metrics::histogram!("inspector.resolve.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::types::error::NotFound;
    use aws_smithy_runtime_api::client::result::ConnectorError;
    use aws_smithy_runtime_api::http::{Response as HttpResponse, StatusCode};
    use aws_smithy_types::body::SdkBody;
    use tokio_test::{assert_err, assert_ok};

    fn object() -> ObjectReference {
        ObjectReference {
            bucket: "b1".to_string(),
            key: "photos/a.png".to_string(),
            size_hint: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        }
    }

    fn resolver(source: MockObjectMetadataSource) -> MetadataResolver {
        MetadataResolver::new(Arc::new(source), fast_policy())
    }

    #[tokio::test]
    async fn test_resolves_on_first_attempt() {
        let mut source = MockObjectMetadataSource::new();
        source
            .expect_content_length()
            .withf(|bucket, key| bucket.to_string() == "b1" && key.to_string() == "photos/a.png")
            .times(1)
            .returning(|_, _| Ok(1024));

        let size = assert_ok!(resolver(source).resolve(&object()).await);
        assert_eq!(size, 1024);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        for succeed_on in 1..=5u32 {
            let mut source = MockObjectMetadataSource::new();
            let mut calls = 0u32;
            source
                .expect_content_length()
                .times(succeed_on as usize)
                .returning(move |_, _| {
                    calls += 1;
                    if calls < succeed_on {
                        Err(StorageError::Transient("SlowDown".to_string()))
                    } else {
                        Ok(42)
                    }
                });

            let size = assert_ok!(resolver(source).resolve(&object()).await);
            assert_eq!(size, 42);
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut source = MockObjectMetadataSource::new();
        source
            .expect_content_length()
            .times(5)
            .returning(|_, _| Err(StorageError::Transient("ServiceUnavailable".to_string())));

        let err = assert_err!(resolver(source).resolve(&object()).await);
        assert_eq!(
            err,
            ResolverError::Exhausted {
                object: "s3://b1/photos/a.png".to_string(),
                attempts: 5,
                last_error: "ServiceUnavailable".to_string(),
            }
        );
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_not_found_fails_fast() {
        let mut source = MockObjectMetadataSource::new();
        source
            .expect_content_length()
            .times(1)
            .returning(|_, _| Err(StorageError::NotFound));

        let err = assert_err!(resolver(source).resolve(&object()).await);
        assert_eq!(err, ResolverError::NotFound("s3://b1/photos/a.png".to_string()));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_permanent_error_fails_fast() {
        let mut source = MockObjectMetadataSource::new();
        source
            .expect_content_length()
            .times(1)
            .returning(|_, _| Err(StorageError::Permanent("AccessDenied".to_string())));

        let err = assert_err!(resolver(source).resolve(&object()).await);
        assert!(matches!(err, ResolverError::Permanent { .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let mut source = MockObjectMetadataSource::new();
        source
            .expect_content_length()
            .times(1)
            .returning(|_, _| Err(StorageError::Transient("timeout".to_string())));

        let resolver = MetadataResolver::new(
            Arc::new(source),
            RetryPolicy {
                max_attempts: 1,
                delay: Duration::from_millis(1),
            },
        );
        let err = assert_err!(resolver.resolve(&object()).await);
        assert!(matches!(err, ResolverError::Exhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(404, String::new()), StorageError::NotFound);
        assert_eq!(
            classify_status(403, "AccessDenied".to_string()),
            StorageError::Permanent("AccessDenied".to_string())
        );
        assert!(matches!(
            classify_status(429, String::new()),
            StorageError::Transient(_)
        ));
        assert!(matches!(
            classify_status(408, String::new()),
            StorageError::Transient(_)
        ));
        assert!(matches!(
            classify_status(503, String::new()),
            StorageError::Transient(_)
        ));
    }

    fn http_response(status: u16) -> HttpResponse {
        HttpResponse::new(StatusCode::try_from(status).unwrap(), SdkBody::empty())
    }

    #[test]
    fn test_classify_head_object_errors() {
        let timeout = SdkError::timeout_error("operation timed out");
        assert!(matches!(
            classify_head_object_error(timeout),
            StorageError::Transient(_)
        ));

        let dispatch = SdkError::dispatch_failure(ConnectorError::io("connection reset".into()));
        assert!(matches!(
            classify_head_object_error(dispatch),
            StorageError::Transient(_)
        ));

        let not_found = SdkError::service_error(
            HeadObjectError::NotFound(NotFound::builder().build()),
            http_response(404),
        );
        assert_eq!(classify_head_object_error(not_found), StorageError::NotFound);

        let forbidden = SdkError::service_error(
            HeadObjectError::generic(ErrorMetadata::builder().code("Forbidden").build()),
            http_response(403),
        );
        assert!(matches!(
            classify_head_object_error(forbidden),
            StorageError::Permanent(_)
        ));

        let throttled = SdkError::service_error(
            HeadObjectError::generic(ErrorMetadata::builder().code("SlowDown").build()),
            http_response(503),
        );
        assert!(matches!(
            classify_head_object_error(throttled),
            StorageError::Transient(_)
        ));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = Config::from_env(Default::default()).unwrap();
        config.storage.max_attempts = 3;
        config.storage.retry_delay_ms = 250;

        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(250));
        assert_eq!(RetryPolicy::default().max_attempts, 5);
    }
}
