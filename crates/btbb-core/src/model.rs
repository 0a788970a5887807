//! BTBB data model types.
//!
//! These types describe what the demodulator hands to the tracker:
//! - The 24-bit lower address part (LAP) used as the tracking key
//! - Positional fixes attached to packets
//! - Decoded packets ready for attribution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest value representable in a LAP.
pub const LAP_MAX: u32 = 0x00FF_FFFF;

/// Errors raised while constructing or parsing a [`Lap`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LapError {
    /// Value does not fit in 24 bits.
    #[error("LAP {0:#x} exceeds 24 bits")]
    OutOfRange(u32),

    /// Text is not a hexadecimal LAP.
    #[error("invalid LAP '{0}'")]
    Invalid(String),
}

/// Lower address part of a Bluetooth device address.
///
/// Only the low 24 bits of BD_ADDR survive the air interface, so this is the
/// whole identity of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Lap(u32);

impl Lap {
    /// Create a LAP, rejecting values wider than 24 bits.
    pub fn new(value: u32) -> Result<Self, LapError> {
        if value > LAP_MAX {
            return Err(LapError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Create a LAP from the low 24 bits of `value`.
    pub fn from_low_bits(value: u32) -> Self {
        Self(value & LAP_MAX)
    }

    /// Raw 24-bit value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// BD_ADDR rendering with the unresolved upper bytes zeroed,
    /// e.g. `00:00:00:AB:CD:EF`.
    pub fn bd_addr(self) -> String {
        let v = self.0;
        format!(
            "00:00:00:{:02X}:{:02X}:{:02X}",
            (v >> 16) & 0xFF,
            (v >> 8) & 0xFF,
            v & 0xFF
        )
    }
}

impl fmt::Display for Lap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl FromStr for Lap {
    type Err = LapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let value =
            u32::from_str_radix(digits, 16).map_err(|_| LapError::Invalid(s.to_string()))?;
        Lap::new(value)
    }
}

impl TryFrom<u32> for Lap {
    type Error = LapError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Lap::new(value)
    }
}

impl From<Lap> for u32 {
    fn from(lap: Lap) -> Self {
        lap.0
    }
}

/// A positional sample from the GPS source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Whether the receiver had a fix when the sample was taken.
    pub valid: bool,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
}

impl Fix {
    /// A valid fix at the given coordinates.
    pub fn new(lat: f64, lon: f64, alt: f64, speed: f64) -> Self {
        Self {
            valid: true,
            lat,
            lon,
            alt,
            speed,
        }
    }

    /// Valid and every coordinate finite; only such fixes are aggregated.
    pub fn is_usable(&self) -> bool {
        self.valid
            && self.lat.is_finite()
            && self.lon.is_finite()
            && self.alt.is_finite()
            && self.speed.is_finite()
    }

    /// A sample taken without a fix.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            speed: 0.0,
        }
    }
}

/// A link-layer packet attributed to a LAP by the demodulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPacket {
    pub lap: Lap,

    /// Capture time in seconds since the epoch.
    pub timestamp: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Fix>,
}

impl DecodedPacket {
    pub fn new(lap: Lap, timestamp: u64) -> Self {
        Self {
            lap,
            timestamp,
            fix: None,
        }
    }

    /// Attach a positional fix.
    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }
}
