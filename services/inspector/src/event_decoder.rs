//! Decoding of queue message bodies into object references.
//!
//! Three body shapes are accepted without any hint about which one arrived:
//!
//! - a flat `{"bucket": ..., "key": ...}` object, as published by the upload
//!   frontend;
//! - an S3 event notification wrapped in a pub/sub envelope, where one string
//!   field (SNS uses `Message`) holds the notification JSON;
//! - a bare S3 event notification with a top-level `Records` array, as
//!   delivered when S3 publishes straight to SQS.
//!
//! Only the first record of a notification is read. A flat body whose fields
//! are unusable still falls through to the notification shapes.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Envelope field checked first for an embedded notification
const ENVELOPE_MESSAGE_FIELD: &str = "Message";

/// Errors that can occur while decoding a message body.
///
/// Every variant is permanent: redelivering the same body cannot fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("Message body is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Event notification contains no records")]
    EmptyRecords,

    #[error("Object key is not valid URL encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Message body matches no known event shape")]
    UnrecognizedShape,
}

/// Object named by a creation event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    /// Bucket holding the object
    pub bucket: String,
    /// Object key, already URL-decoded
    pub key: String,
    /// Size carried by the notification itself, if any
    pub size_hint: Option<u64>,
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// S3 event notification document; records stay untyped until picked
#[derive(Debug, Deserialize)]
struct S3EventNotification {
    #[serde(rename = "Records", default)]
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    #[serde(default)]
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    #[serde(default)]
    bucket: Option<S3Bucket>,
    #[serde(default)]
    object: Option<S3Object>,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    size: Option<Value>,
}

/// Decode a raw message body into an [`ObjectReference`].
pub fn decode(body: &[u8]) -> Result<ObjectReference, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::EmptyBody);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    // A flat body with unusable fields may still carry a nested notification
    let flat_error = if object.contains_key("bucket") && object.contains_key("key") {
        match decode_flat(object) {
            Ok(reference) => return Ok(reference),
            Err(e) => Some(e),
        }
    } else {
        None
    };

    if object.contains_key("Records") {
        return decode_notification(value);
    }

    match find_embedded_notification(object) {
        Some(notification) => decode_notification(notification),
        None => Err(flat_error.unwrap_or(DecodeError::UnrecognizedShape)),
    }
}

fn decode_flat(object: &Map<String, Value>) -> Result<ObjectReference, DecodeError> {
    let bucket = non_empty_str(object.get("bucket")).ok_or(DecodeError::MissingField("bucket"))?;
    let key = non_empty_str(object.get("key")).ok_or(DecodeError::MissingField("key"))?;

    Ok(ObjectReference {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size_hint: None,
    })
}

/// Look for a string field whose content is itself a notification document
fn find_embedded_notification(object: &Map<String, Value>) -> Option<Value> {
    let preferred = object.get(ENVELOPE_MESSAGE_FIELD).into_iter();
    let others = object
        .iter()
        .filter(|(name, _)| name.as_str() != ENVELOPE_MESSAGE_FIELD)
        .map(|(_, value)| value);

    preferred
        .chain(others)
        .filter_map(Value::as_str)
        .filter_map(|text| serde_json::from_str::<Value>(text).ok())
        .find(|inner| inner.get("Records").is_some())
}

fn decode_notification(notification: Value) -> Result<ObjectReference, DecodeError> {
    let notification: S3EventNotification = serde_json::from_value(notification)
        .map_err(|e| DecodeError::MalformedJson(e.to_string()))?;

    // Only the first record is relevant; S3 emits one record per event.
    let first = notification
        .records
        .into_iter()
        .next()
        .ok_or(DecodeError::EmptyRecords)?;
    let record: S3EventRecord =
        serde_json::from_value(first).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;
    let entity = record.s3.ok_or(DecodeError::MissingField("s3"))?;

    let bucket = entity
        .bucket
        .and_then(|b| b.name)
        .filter(|name| !name.is_empty())
        .ok_or(DecodeError::MissingField("s3.bucket.name"))?;
    let object = entity.object.ok_or(DecodeError::MissingField("s3.object"))?;
    let raw_key = object
        .key
        .filter(|key| !key.is_empty())
        .ok_or(DecodeError::MissingField("s3.object.key"))?;

    Ok(ObjectReference {
        bucket,
        key: decode_object_key(&raw_key)?,
        size_hint: object.size.as_ref().and_then(Value::as_u64),
    })
}

/// Undo the form-style URL encoding S3 applies to keys in notifications
pub fn decode_object_key(raw: &str) -> Result<String, DecodeError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|e| DecodeError::InvalidKeyEncoding(e.to_string()))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
