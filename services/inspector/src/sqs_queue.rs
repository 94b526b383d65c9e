use crate::config::Config;
use async_trait::async_trait;
use aws_sdk_sqs::config::Builder as SqsConfigBuilder;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use aws_types::SdkConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Longest long-poll wait SQS accepts
const MAX_WAIT_TIME_SECS: u64 = 20;

/// Errors from the queue service
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to resolve queue URL for {name}: {message}")]
    Resolve { name: String, message: String },

    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to delete message: {0}")]
    Delete(String),
}

/// A received queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Queue-assigned message ID, used for logging only
    pub message_id: Option<String>,
    /// Raw message body
    pub body: String,
    /// Acknowledgment token required to delete the message
    pub receipt_handle: String,
}

impl QueueMessage {
    /// Convert an SDK message; messages without a receipt handle cannot be
    /// acknowledged and are left to the queue.
    pub fn from_sdk(message: &Message) -> Option<Self> {
        let Some(receipt_handle) = message.receipt_handle() else {
            warn!(
                message_id = message.message_id().unwrap_or_default(),
                "Received message without receipt handle"
            );
            return None;
        };

        Some(Self {
            message_id: message.message_id().map(String::from),
            body: message.body().unwrap_or_default().to_string(),
            receipt_handle: receipt_handle.to_string(),
        })
    }
}

/// Receive/delete capability of the message queue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receive up to `max_messages`, waiting at most `wait_time` for one to arrive
    async fn receive(
        &self,
        max_messages: i32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete (acknowledge) a received message
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// [`MessageQueue`] backed by Amazon SQS
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsQueue {
    /// Build the SQS client and resolve the queue URL.
    ///
    /// A configured URL is used as-is; otherwise the queue name is looked up
    /// with `GetQueueUrl`.
    pub async fn connect(sdk_config: &SdkConfig, config: &Config) -> Result<Self, QueueError> {
        let mut sqs_config_builder = SqsConfigBuilder::from(sdk_config);

        // Custom endpoint (LocalStack, ElasticMQ, etc.)
        if let Some(ref endpoint_url) = config.aws.endpoint_url {
            sqs_config_builder = sqs_config_builder.endpoint_url(endpoint_url);
        }

        let client = SqsClient::from_conf(sqs_config_builder.build());

        let queue_url = match (&config.queue.url, &config.queue.name) {
            (Some(url), _) => url.clone(),
            (None, Some(name)) => Self::resolve_queue_url(&client, name).await?,
            (None, None) => {
                return Err(QueueError::Resolve {
                    name: String::new(),
                    message: "neither queue URL nor queue name is configured".to_string(),
                })
            }
        };

        info!(queue_url = %queue_url, "SQS queue initialized");

        Ok(Self { client, queue_url })
    }

    async fn resolve_queue_url(client: &SqsClient, name: &str) -> Result<String, QueueError> {
        let output = client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| QueueError::Resolve {
                name: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        output
            .queue_url()
            .map(String::from)
            .ok_or_else(|| QueueError::Resolve {
                name: name.to_string(),
                message: "GetQueueUrl returned no URL".to_string(),
            })
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(
        &self,
        max_messages: i32,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(long_poll_seconds(wait_time))
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(QueueMessage::from_sdk)
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

/// Convert a wait duration to the whole seconds SQS accepts (0-20)
pub fn long_poll_seconds(wait_time: Duration) -> i32 {
    wait_time.as_secs().min(MAX_WAIT_TIME_SECS) as i32
}
