//! # btbb-protocol
//!
//! BTBB tracker protocol message types and codec.
//!
//! This crate defines the messages exchanged with interactive clients over
//! WebSocket text frames.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
