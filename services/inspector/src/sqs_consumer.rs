use crate::config::Config;
use crate::event_decoder::{self, DecodeError};
use crate::metadata_resolver::{MetadataResolver, ResolverError};
use crate::report_dispatcher::{DispatchOutcome, ReportSink, SizeReport};
use crate::sqs_queue::{MessageQueue, QueueMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Polling and acknowledgment settings for the consumer loop
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Messages requested per receive call
    pub max_messages: i32,
    /// Long-poll wait per receive call
    pub wait_time: Duration,
    /// Pause after every poll
    pub poll_interval: Duration,
    /// Pause after a failed receive
    pub error_cooldown: Duration,
    /// Delete messages whose metadata lookup ran out of attempts
    pub delete_on_resolver_exhaustion: bool,
    /// Retain messages unless the collector acknowledged the report
    pub require_ack: bool,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_messages: config.queue.max_messages,
            wait_time: config.wait_time(),
            poll_interval: config.poll_interval(),
            error_cooldown: config.error_cooldown(),
            delete_on_resolver_exhaustion: config.queue.delete_on_resolver_exhaustion,
            require_ack: config.collector.require_ack,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            error_cooldown: Duration::from_secs(5),
            delete_on_resolver_exhaustion: false,
            require_ack: false,
        }
    }
}

/// Result of processing one delivery of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Size was resolved and a report was sent
    Reported {
        report: SizeReport,
        dispatch: DispatchOutcome,
    },
    /// Body could not be decoded
    Rejected(DecodeError),
    /// Object size could not be resolved
    Unresolvable(ResolverError),
}

/// SQS consumer relaying object-created events to the size-report collector
pub struct SqsConsumer {
    queue: Arc<dyn MessageQueue>,
    resolver: MetadataResolver,
    dispatcher: Arc<dyn ReportSink>,
    settings: ConsumerSettings,
}

impl SqsConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        resolver: MetadataResolver,
        dispatcher: Arc<dyn ReportSink>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            resolver,
            dispatcher,
            settings,
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Cancellation interrupts the long poll and the pauses between polls but
    /// never a message that is already being processed.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            max_messages = self.settings.max_messages,
            wait_time_secs = self.settings.wait_time.as_secs(),
            max_attempts = self.resolver.policy().max_attempts,
            "Starting SQS consumer"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.settings.max_messages, self.settings.wait_time) => received,
            };

            let pause = match received {
                Ok(messages) => {
                    if messages.is_empty() {
                        debug!("No messages received");
                    }
                    for message in &messages {
                        self.handle_message(message).await;
                    }
                    self.settings.poll_interval
                }
                Err(e) => {
                    error!(
                        error = %e,
                        cooldown_ms = self.settings.error_cooldown.as_millis() as u64,
                        "Failed to receive messages"
                    );
                    metrics::counter!("inspector.queue.errors").increment(1);
                    self.settings.error_cooldown
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("SQS consumer stopped");
    }

    /// Process one message and delete it if the outcome is terminal
    #[instrument(skip(self, message), fields(message_id = message.message_id.as_deref().unwrap_or_default()))]
    pub async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome {
        metrics::counter!("inspector.messages.received").increment(1);

        let outcome = self.process(message).await;

        if self.should_delete(&outcome) {
            match self.queue.delete(&message.receipt_handle).await {
                Ok(()) => {
                    debug!("Message deleted");
                    metrics::counter!("inspector.messages.deleted").increment(1);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to delete message");
                    metrics::counter!("inspector.queue.errors").increment(1);
                }
            }
        } else {
            info!("Message left on queue for redelivery");
            metrics::counter!("inspector.messages.retained").increment(1);
        }

        outcome
    }

    /// Whether `outcome` ends this delivery attempt
    pub fn should_delete(&self, outcome: &MessageOutcome) -> bool {
        match outcome {
            MessageOutcome::Reported { dispatch, .. } => {
                !self.settings.require_ack || dispatch.is_ack()
            }
            MessageOutcome::Rejected(_) => true,
            MessageOutcome::Unresolvable(e) => {
                e.is_permanent() || self.settings.delete_on_resolver_exhaustion
            }
        }
    }

    async fn process(&self, message: &QueueMessage) -> MessageOutcome {
        let object = match event_decoder::decode(message.body.as_bytes()) {
            Ok(object) => object,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable message");
                metrics::counter!("inspector.messages.rejected").increment(1);
                return MessageOutcome::Rejected(e);
            }
        };

        let size_bytes = match self.resolver.resolve(&object).await {
            Ok(size_bytes) => size_bytes,
            Err(e) => {
                warn!(error = %e, "Could not resolve object size");
                return MessageOutcome::Unresolvable(e);
            }
        };

        info!(
            bucket = %object.bucket,
            key = %object.key,
            size_bytes,
            size_hint = ?object.size_hint,
            "Resolved object size"
        );

        let report = SizeReport {
            filename: object.key,
            size_bytes,
        };
        let dispatch = self.dispatcher.dispatch(&report).await;

        MessageOutcome::Reported { report, dispatch }
    }
}
