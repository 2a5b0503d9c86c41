//! JSON control messages exchanged over a transport's text channel.
//!
//! ## Requests
//! ```text
//! {"type":"subscribe","channel":"device_1","fps":5,"requestId":1}
//! {"type":"unsubscribe","channel":"device_1","requestId":2}
//! {"type":"publish","channel":"room1","data":{"msg":"hi"},"requestId":3}
//! {"type":"get","channel":"room1","requestId":4}
//! {"type":"inspect","requestId":5}
//! ```
//!
//! ## Responses
//! ```text
//! {"type":"subscribed","requestId":1,"channel":"device_1","data":null}
//! {"type":"data","requestId":0,"channel":"room1","data":{"msg":"hi"}}
//! {"type":"error","requestId":4,"channel":"","data":null,"error":"channel not found"}
//! ```
//!
//! Every field is optional on the wire; missing fields take their zero
//! value. A missing or unrecognised `type` is answered with
//! `"unknown message type"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::RegcastError;

/// Error text for a `get` on a channel with no cached value.
pub const ERR_CHANNEL_NOT_FOUND: &str = "channel not found";

/// Error text for an unrecognised request type.
pub const ERR_UNKNOWN_TYPE: &str = "unknown message type";

// ── RequestKind ──────────────────────────────────────────────────

/// The `type` of an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
    Publish,
    Get,
    Inspect,
    #[default]
    #[serde(other)]
    Unknown,
}

// ── Request ──────────────────────────────────────────────────────

/// An inbound control message.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Ignored by the server; the connection's own id always wins.
    pub client_id: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
    pub request_id: i64,
    /// Requested delivery rate; `<= 0` means unspecified.
    pub fps: i64,
}

impl Request {
    /// Parse a request from JSON text.
    pub fn parse(text: &str) -> Result<Self, RegcastError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn new(kind: RequestKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: i64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_fps(mut self, fps: i64) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_data(mut self, data: Box<RawValue>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn to_json(&self) -> Result<String, RegcastError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── ResponseKind ─────────────────────────────────────────────────

/// The `type` of an outbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Subscribed,
    Unsubscribed,
    Published,
    Data,
    Inspect,
    Error,
}

// ── Response ─────────────────────────────────────────────────────

/// An outbound control message.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    #[serde(default)]
    pub request_id: i64,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn new(kind: ResponseKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: 0,
            channel: channel.into(),
            data: None,
            error: None,
        }
    }

    /// A `data` message carrying a cached or freshly published payload.
    pub fn data(channel: impl Into<String>, payload: Box<RawValue>) -> Self {
        Self {
            data: Some(payload),
            ..Self::new(ResponseKind::Data, channel)
        }
    }

    /// An `error` message with no channel.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(ResponseKind::Error, "")
        }
    }

    pub fn with_request_id(mut self, request_id: i64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    pub fn to_json(&self) -> Result<String, RegcastError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(text: &str) -> Result<Self, RegcastError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ── InspectReport ────────────────────────────────────────────────

/// Debug view of the service, carried in an `inspect` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub channels: InspectChannels,
    pub total_channels: usize,
    pub total_data: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectChannels {
    /// Subscriber count per channel.
    pub subscriber_counts: BTreeMap<String, usize>,
    /// Raw JSON text of each cached generic payload.
    pub data_store: BTreeMap<String, String>,
}

/// Serialize a value into a raw JSON payload.
pub fn to_raw<T: Serialize + ?Sized>(value: &T) -> Result<Box<RawValue>, RegcastError> {
    Ok(serde_json::value::to_raw_value(value)?)
}

// ── Tests ────────────────────────────────────────────────────────
