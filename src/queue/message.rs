//! Message types carried by queue rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::headers;
use crate::error::{TransportError, TransportResult};

/// Header map. `None` values are kept distinct from absent keys and from
/// empty strings through serialization.
pub type Headers = HashMap<String, Option<String>>;

/// A message on its way into a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: Uuid,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(message_id: Uuid, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            message_id,
            headers,
            body,
        }
    }

    /// New message with a fresh identity and no headers
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Uuid::new_v4(), Headers::new(), body.into())
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), Some(value.into()));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|value| value.as_deref())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header(headers::CORRELATION_ID)
    }

    pub fn reply_to_address(&self) -> Option<&str> {
        self.header(headers::REPLY_TO_ADDRESS)
    }

    /// Messages are durable unless explicitly marked otherwise
    pub fn recoverable(&self) -> bool {
        !matches!(self.header(headers::RECOVERABLE), Some(value) if value.eq_ignore_ascii_case("false"))
    }
}

/// A message successfully read (and removed) from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub message_id: Uuid,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub expires: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|value| value.as_deref())
    }

    /// Re-wrap for sending onwards with identity, headers and body intact
    pub fn into_outgoing(self) -> OutgoingMessage {
        OutgoingMessage::new(self.message_id, self.headers, self.body)
    }
}

/// A raw row exactly as stored, before header deserialization
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub correlation_id: Option<String>,
    pub reply_to_address: Option<String>,
    pub recoverable: bool,
    pub expires: Option<DateTime<Utc>>,
    pub headers: String,
    pub body: Option<Vec<u8>>,
}

impl MessageRow {
    /// Deserialize headers into an [`IncomingMessage`]
    pub fn try_into_message(&self) -> TransportResult<IncomingMessage> {
        let headers = deserialize_headers(&self.headers)?;
        Ok(IncomingMessage {
            message_id: self.id,
            headers,
            body: self.body.clone().unwrap_or_default(),
            expires: self.expires,
        })
    }
}

/// Outcome of a single receive attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// No live row was available
    Empty,
    /// A row was removed and parsed
    Delivered(IncomingMessage),
    /// A row was removed but could not be parsed; forward it verbatim
    Poison { row: MessageRow, reason: String },
}

pub fn serialize_headers(headers: &Headers) -> TransportResult<String> {
    Ok(serde_json::to_string(headers)?)
}

pub fn deserialize_headers(raw: &str) -> TransportResult<Headers> {
    Ok(serde_json::from_str(raw)?)
}
