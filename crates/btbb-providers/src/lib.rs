//! # btbb-providers
//!
//! Sources of decoded packets for the tracker.
//!
//! The demodulator itself lives outside this workspace. What reaches the
//! tracker is a stream of decoded packets, each carrying a LAP, a capture
//! timestamp and an optional positional fix. This crate provides:
//! - The [`PacketSource`] abstraction
//! - A line-oriented text source for replays and piped demodulator output
//! - Clock sources used to stamp packets that arrive without a timestamp

pub mod clock;
pub mod line;

pub use clock::{Clock, ManualClock, SystemClock};
pub use line::{parse_packet_line, LineSource, ParseError};

use btbb_core::DecodedPacket;

/// Anything that yields decoded packets until exhausted.
pub trait PacketSource {
    /// Next packet, or `None` once the source is exhausted.
    fn next_packet(&mut self) -> Option<DecodedPacket>;
}
