//! Protocol message types for WebSocket communication.
//!
//! This module defines all message types exchanged with tracker clients:
//! - Server → Client: Hello, Device, Error
//! - Client → Server: Subscribe, Unsubscribe
//!
//! Messages are serialized as JSON over WebSocket text frames.

use btbb_core::{Field, FieldRequest, PROTOCOL_BTBBDEV};
use serde::{Deserialize, Serialize};

/// Subscription request message.
///
/// # Example
/// ```json
/// {"subscribe": "BTBBDEV", "fields": ["bdaddr", "lasttime", 3]}
/// ```
///
/// An empty or missing field list selects every field in wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Protocol to subscribe to; only "BTBBDEV" is published.
    pub subscribe: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSelector>,
}

impl SubscribeRequest {
    /// Subscribe to BTBBDEV with the given fields.
    pub fn btbbdev(fields: Vec<FieldSelector>) -> Self {
        Self {
            subscribe: PROTOCOL_BTBBDEV.to_string(),
            fields,
        }
    }

    /// Resolve the selection. Unknown entries are kept so the failure shows
    /// up when a record is formatted.
    pub fn field_requests(&self) -> Vec<FieldRequest> {
        if self.fields.is_empty() {
            FieldRequest::all()
        } else {
            self.fields.iter().map(FieldSelector::resolve).collect()
        }
    }
}

/// A field named by token or by its index in the wire enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSelector {
    Index(u64),
    Token(String),
}

impl FieldSelector {
    pub fn resolve(&self) -> FieldRequest {
        match self {
            FieldSelector::Index(index) => FieldRequest::from_index(*index),
            FieldSelector::Token(token) => FieldRequest::from_token(token),
        }
    }
}

impl From<Field> for FieldSelector {
    fn from(field: Field) -> Self {
        FieldSelector::Token(field.token().to_string())
    }
}

/// Unsubscribe request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub unsubscribe: String,
}

// ============================================================================
// Hello Message (Server → Client on connect)
// ============================================================================

/// Hello message sent by server immediately on WebSocket connection.
///
/// Announces the published protocol and its field enumeration, so clients can
/// select fields by index.
///
/// # Example
/// ```json
/// {
///   "name": "btbb-tracker",
///   "version": "0.1.0",
///   "protocol": "BTBBDEV",
///   "fields": ["bdaddr", "firsttime", "lasttime", "packets", "..."],
///   "timestamp": "2024-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Server name identifier.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Published protocol name.
    pub protocol: String,

    /// Field tokens in wire order.
    pub fields: Vec<String>,

    /// Current server timestamp in ISO 8601 format.
    pub timestamp: String,
}

impl HelloMessage {
    /// Create a new Hello message.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            protocol: PROTOCOL_BTBBDEV.to_string(),
            fields: Field::tokens().into_iter().map(String::from).collect(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// One formatted device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMessage {
    pub protocol: String,

    /// Rendered values, one per requested field, in request order.
    pub values: Vec<String>,
}

impl DeviceMessage {
    pub fn btbbdev(values: Vec<String>) -> Self {
        Self {
            protocol: PROTOCOL_BTBBDEV.to_string(),
            values,
        }
    }

    /// Legacy line form, e.g. `*BTBBDEV: 00:00:00:AB:CD:EF 100 110 3`.
    pub fn to_legacy_line(&self) -> String {
        format!("*{}: {}", self.protocol, btbb_core::join_record(&self.values))
    }
}

/// Error reported to a client in place of the response it asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Hello message sent on connection.
    Hello(HelloMessage),

    /// A device record.
    Device(DeviceMessage),

    /// Error in place of a response.
    Error(ErrorMessage),
}

/// Messages that can be received from client.
///
/// Uses untagged deserialization - the message type is determined by
/// examining which fields are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Subscribe to live device updates.
    Subscribe(SubscribeRequest),

    /// Stop receiving device updates.
    Unsubscribe(UnsubscribeRequest),
}
