//! WebSocket message codec for the tracker protocol.
//!
//! Messages are JSON over WebSocket text frames. This module provides
//! encoding and decoding utilities for the protocol messages.

use crate::messages::{ClientMessage, ServerMessage};
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// Received binary frame instead of text.
    #[error("Expected text frame, received binary")]
    BinaryFrame,
}

/// Encode a server message to JSON string for WebSocket transmission.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::from)
}

/// Decode a client message from JSON string received over WebSocket.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}

/// Decode a server message; used by clients and tests.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::from)
}
