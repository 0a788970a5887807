//! Line-oriented packet source.
//!
//! Each non-empty line describes one decoded packet:
//!
//! ```text
//! <lap-hex> [<timestamp>] [<lat> <lon> <alt> <speed>]
//! ```
//!
//! Fields are separated by whitespace. A line without a timestamp is stamped
//! from the source's clock. A line carrying four position values is treated
//! as having a valid fix. Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;

use btbb_core::{DecodedPacket, Fix, Lap, LapError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::PacketSource;

/// Errors raised while parsing a packet line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("bad LAP: {0}")]
    Lap(#[from] LapError),

    #[error("bad number '{0}'")]
    Number(String),

    #[error("expected 1, 2, 5 or 6 fields, found {0}")]
    FieldCount(usize),
}

/// Parse one packet line.
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_packet_line(line: &str, clock: &dyn Clock) -> Result<Option<DecodedPacket>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let lap: Lap = parts[0].parse()?;

    let (timestamp, position) = match parts.len() {
        1 => (clock.now(), None),
        2 => (parse_u64(parts[1])?, None),
        5 => (clock.now(), Some(&parts[1..5])),
        6 => (parse_u64(parts[1])?, Some(&parts[2..6])),
        n => return Err(ParseError::FieldCount(n)),
    };

    let mut packet = DecodedPacket::new(lap, timestamp);
    if let Some(p) = position {
        packet = packet.with_fix(Fix::new(
            parse_f64(p[0])?,
            parse_f64(p[1])?,
            parse_f64(p[2])?,
            parse_f64(p[3])?,
        ));
    }
    Ok(Some(packet))
}

fn parse_u64(s: &str) -> Result<u64, ParseError> {
    s.parse().map_err(|_| ParseError::Number(s.to_string()))
}

fn parse_f64(s: &str) -> Result<f64, ParseError> {
    s.parse().map_err(|_| ParseError::Number(s.to_string()))
}

/// Reads packet lines from any buffered reader.
///
/// Malformed lines are logged and skipped; the source only ends at EOF or on
/// a read error.
pub struct LineSource<R, C> {
    reader: R,
    clock: C,
    line_no: u64,
    rejected: u64,
}

impl<R: BufRead, C: Clock> LineSource<R, C> {
    pub fn new(reader: R, clock: C) -> Self {
        Self {
            reader,
            clock,
            line_no: 0,
            rejected: 0,
        }
    }

    /// Lines skipped because they failed to parse.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl<R: BufRead, C: Clock> PacketSource for LineSource<R, C> {
    fn next_packet(&mut self) -> Option<DecodedPacket> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    debug!("Packet source exhausted after {} lines", self.line_no);
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Packet source read error: {}", e);
                    return None;
                }
            }
            self.line_no += 1;

            match parse_packet_line(&line, &self.clock) {
                Ok(Some(packet)) => return Some(packet),
                Ok(None) => {}
                Err(e) => {
                    self.rejected += 1;
                    warn!("Skipping packet line {}: {}", self.line_no, e);
                }
            }
        }
    }
}

impl<R: BufRead, C: Clock> Iterator for LineSource<R, C> {
    type Item = DecodedPacket;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet()
    }
}
