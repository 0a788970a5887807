//! BTBBDEV field enumeration and record formatting.
//!
//! Clients select which fields of a device record they want, by token or by
//! index. The order of [`Field::ALL`] is part of the wire contract and must
//! never be reordered; new fields may only be appended.
//!
//! Formatting goes through a [`RecordFormatter`], which memoizes each rendered
//! field for the lifetime of one device response. When several subscribers
//! receive the same record with overlapping field lists, every field is
//! rendered at most once.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::aggregate::PositionAggregate;
use crate::device::DeviceRecord;

/// Protocol name under which device records are published.
pub const PROTOCOL_BTBBDEV: &str = "BTBBDEV";

/// Errors raised while formatting a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A requested field is outside the BTBBDEV enumeration.
    #[error("Unknown field requested.")]
    UnknownField(String),
}

/// A field of the BTBBDEV record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Bdaddr,
    Firsttime,
    Lasttime,
    Packets,
    Gpsfixed,
    Minlat,
    Minlon,
    Minalt,
    Minspd,
    Maxlat,
    Maxlon,
    Maxalt,
    Maxspd,
    Agglat,
    Agglon,
    Aggalt,
    Aggpoints,
}

impl Field {
    /// Every field, in wire order.
    pub const ALL: [Field; 17] = [
        Field::Bdaddr,
        Field::Firsttime,
        Field::Lasttime,
        Field::Packets,
        Field::Gpsfixed,
        Field::Minlat,
        Field::Minlon,
        Field::Minalt,
        Field::Minspd,
        Field::Maxlat,
        Field::Maxlon,
        Field::Maxalt,
        Field::Maxspd,
        Field::Agglat,
        Field::Agglon,
        Field::Aggalt,
        Field::Aggpoints,
    ];

    /// Stable wire token.
    pub fn token(self) -> &'static str {
        match self {
            Field::Bdaddr => "bdaddr",
            Field::Firsttime => "firsttime",
            Field::Lasttime => "lasttime",
            Field::Packets => "packets",
            Field::Gpsfixed => "gpsfixed",
            Field::Minlat => "minlat",
            Field::Minlon => "minlon",
            Field::Minalt => "minalt",
            Field::Minspd => "minspd",
            Field::Maxlat => "maxlat",
            Field::Maxlon => "maxlon",
            Field::Maxalt => "maxalt",
            Field::Maxspd => "maxspd",
            Field::Agglat => "agglat",
            Field::Agglon => "agglon",
            Field::Aggalt => "aggalt",
            Field::Aggpoints => "aggpoints",
        }
    }

    /// Position of this field in the wire enumeration.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Field> {
        Field::ALL.get(index).copied()
    }

    /// All tokens in wire order.
    pub fn tokens() -> Vec<&'static str> {
        Field::ALL.iter().map(|f| f.token()).collect()
    }

    fn render(self, record: &DeviceRecord) -> String {
        let gps = record.position();
        match self {
            Field::Bdaddr => record.lap().bd_addr(),
            Field::Firsttime => record.first_seen().to_string(),
            Field::Lasttime => record.last_seen().to_string(),
            Field::Packets => record.packets().to_string(),
            Field::Gpsfixed => {
                let fixed = gps.map(|g| g.is_valid()).unwrap_or(false);
                String::from(if fixed { "1" } else { "0" })
            }
            Field::Minlat => float(gps, PositionAggregate::min_lat),
            Field::Minlon => float(gps, PositionAggregate::min_lon),
            Field::Minalt => float(gps, PositionAggregate::min_alt),
            Field::Minspd => float(gps, PositionAggregate::min_speed),
            Field::Maxlat => float(gps, PositionAggregate::max_lat),
            Field::Maxlon => float(gps, PositionAggregate::max_lon),
            Field::Maxalt => float(gps, PositionAggregate::max_alt),
            Field::Maxspd => float(gps, PositionAggregate::max_speed),
            Field::Agglat => float(gps, PositionAggregate::centroid_lat),
            Field::Agglon => float(gps, PositionAggregate::centroid_lon),
            Field::Aggalt => float(gps, PositionAggregate::centroid_alt),
            Field::Aggpoints => gps.map(|g| g.count()).unwrap_or(0).to_string(),
        }
    }
}

fn float(gps: Option<&PositionAggregate>, get: fn(&PositionAggregate) -> f64) -> String {
    gps.map(get).unwrap_or(0.0).to_string()
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Field {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.token() == s)
            .ok_or_else(|| FormatError::UnknownField(s.to_string()))
    }
}

/// One entry of a client's field selection.
///
/// Selections are resolved when a client subscribes, but an unknown entry is
/// kept rather than rejected: it only fails when a record is formatted, and
/// then fails that whole response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRequest {
    Known(Field),
    Unknown(String),
}

impl FieldRequest {
    /// Resolve a field token.
    pub fn from_token(token: &str) -> Self {
        match token.parse() {
            Ok(field) => FieldRequest::Known(field),
            Err(_) => FieldRequest::Unknown(token.to_string()),
        }
    }

    /// Resolve a field index.
    pub fn from_index(index: u64) -> Self {
        usize::try_from(index)
            .ok()
            .and_then(Field::from_index)
            .map(FieldRequest::Known)
            .unwrap_or_else(|| FieldRequest::Unknown(index.to_string()))
    }

    /// Every known field, in wire order.
    pub fn all() -> Vec<FieldRequest> {
        Field::ALL.iter().copied().map(FieldRequest::Known).collect()
    }
}

impl From<Field> for FieldRequest {
    fn from(field: Field) -> Self {
        FieldRequest::Known(field)
    }
}

/// Renders fields of one device record, caching each rendered value.
pub struct RecordFormatter<'a> {
    record: &'a DeviceRecord,
    cache: HashMap<Field, String>,
}

impl<'a> RecordFormatter<'a> {
    /// Create a formatter with an empty cache.
    pub fn new(record: &'a DeviceRecord) -> Self {
        Self {
            record,
            cache: HashMap::new(),
        }
    }

    pub fn record(&self) -> &DeviceRecord {
        self.record
    }

    /// Render the requested fields in order.
    ///
    /// Any unknown field fails the whole response; no partial output is
    /// returned. Values rendered before the failure stay cached, as they are
    /// correct for this record regardless.
    pub fn format(&mut self, requested: &[FieldRequest]) -> Result<Vec<String>, FormatError> {
        let mut values = Vec::with_capacity(requested.len());

        for request in requested {
            let field = match request {
                FieldRequest::Known(field) => *field,
                FieldRequest::Unknown(token) => {
                    return Err(FormatError::UnknownField(token.clone()))
                }
            };

            let record = self.record;
            let value = self
                .cache
                .entry(field)
                .or_insert_with(|| field.render(record));
            values.push(value.clone());
        }

        Ok(values)
    }

    /// Number of distinct fields rendered so far.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// Legacy wire form: values separated by single spaces.
pub fn join_record(values: &[String]) -> String {
    values.join(" ")
}
