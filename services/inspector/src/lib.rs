//! Inspector
//!
//! Relays object-created events to a size-report collector. The service
//! long-polls an SQS queue fed by S3 event notifications (directly or through
//! SNS) and by the upload frontend, looks up each new object's size with a
//! metadata-only `HeadObject`, and POSTs `{filename, size_bytes}` to the
//! collector.
//!
//! ## Delivery
//!
//! - **At-least-once**: a message is deleted only when its outcome is terminal
//!   (reported, undecodable, or the object is permanently unresolvable).
//!   Duplicates are reported again; the collector must tolerate them.
//! - **Bounded lookups**: transient S3 failures are retried a fixed number of
//!   times with a constant delay. Not-found fails fast.
//! - **Best-effort reports**: collector rejections and transport failures are
//!   logged and do not hold the message back unless `collector.require_ack`
//!   is set.
//!
//! ## Architecture
//!
//! ```text
//!  SQS Queue              S3                     Collector
//! ┌──────────────┐       ┌──────────────┐       ┌──────────────┐
//! │ object       │       │ HeadObject   │       │ POST         │
//! │ created      │       │              │       │ /size-report │
//! │ events       │       └──────────────┘       └──────────────┘
//! └──────────────┘              ▲                      ▲
//!   │        ▲                  │                      │
//!   │        │ delete           │                      │
//!   ▼        │                  │                      │
//! ┌──────────────┐       ┌──────────────┐       ┌──────────────┐
//! │ SQS          │──────▶│ Metadata     │──────▶│ Report       │
//! │ Consumer     │       │ Resolver     │       │ Dispatcher   │
//! └──────────────┘       └──────────────┘       └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │ Event        │            ┌──────────────┐
//! │ Decoder      │            │ Liveness     │  GET /
//! └──────────────┘            └──────────────┘
//! ```

pub mod config;
pub mod event_decoder;
pub mod health;
pub mod metadata_resolver;
pub mod report_dispatcher;
pub mod sqs_consumer;
pub mod sqs_queue;
pub mod supervisor;

pub use config::Config;
pub use event_decoder::{decode, DecodeError, ObjectReference};
pub use metadata_resolver::{
    MetadataResolver, ObjectMetadataSource, ResolverError, RetryPolicy, S3MetadataSource,
    StorageError,
};
pub use report_dispatcher::{DispatchOutcome, HttpDispatcher, ReportSink, SizeReport};
pub use sqs_consumer::{ConsumerSettings, MessageOutcome, SqsConsumer};
pub use sqs_queue::{MessageQueue, QueueError, QueueMessage, SqsQueue};
