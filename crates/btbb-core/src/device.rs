//! Tracked device records.

use serde::{Deserialize, Serialize};

use crate::aggregate::PositionAggregate;
use crate::model::{Fix, Lap};

/// State accumulated for one LAP.
///
/// A record is created on the first sighting of its LAP and keeps
/// accumulating for the lifetime of the process, whichever registry tier
/// currently owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    lap: Lap,
    first_seen: u64,
    last_seen: u64,
    packets: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<PositionAggregate>,
    #[serde(skip)]
    dirty: bool,
}

impl DeviceRecord {
    /// Create a record for the first packet seen with `lap`.
    pub fn new(lap: Lap, timestamp: u64, fix: Option<&Fix>) -> Self {
        Self {
            lap,
            first_seen: timestamp,
            last_seen: timestamp,
            packets: 1,
            position: fix.and_then(PositionAggregate::from_fix),
            dirty: true,
        }
    }

    /// Attribute one more packet to this device.
    pub fn record_packet(&mut self, timestamp: u64, fix: Option<&Fix>) {
        self.last_seen = self.last_seen.max(timestamp);
        self.packets += 1;

        if let Some(fix) = fix.filter(|f| f.is_usable()) {
            self.position
                .get_or_insert_with(PositionAggregate::new)
                .fold(fix);
        }

        self.dirty = true;
    }

    pub fn lap(&self) -> Lap {
        self.lap
    }

    pub fn first_seen(&self) -> u64 {
        self.first_seen
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Aggregated position, present once a valid fix has been attributed.
    pub fn position(&self) -> Option<&PositionAggregate> {
        self.position.as_ref()
    }

    /// Whether the record changed since it was last broadcast.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the record as published.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lap() -> Lap {
        Lap::new(0x9E8B33).unwrap()
    }

    #[test]
    fn test_new_record() {
        let record = DeviceRecord::new(lap(), 100, None);
        assert_eq!(record.first_seen(), 100);
        assert_eq!(record.last_seen(), 100);
        assert_eq!(record.packets(), 1);
        assert!(record.position().is_none());
        assert!(record.is_dirty());
    }

    #[test]
    fn test_new_record_with_invalid_fix_has_no_position() {
        let record = DeviceRecord::new(lap(), 100, Some(&Fix::invalid()));
        assert!(record.position().is_none());
    }

    #[test]
    fn test_last_seen_never_goes_backwards() {
        let mut record = DeviceRecord::new(lap(), 100, None);
        record.record_packet(120, None);
        record.record_packet(90, None);

        assert_eq!(record.first_seen(), 100);
        assert_eq!(record.last_seen(), 120);
        assert_eq!(record.packets(), 3);
    }

    #[test]
    fn test_dirty_cycle() {
        let mut record = DeviceRecord::new(lap(), 100, None);
        record.clear_dirty();
        assert!(!record.is_dirty());

        record.record_packet(101, Some(&Fix::invalid()));
        assert!(record.is_dirty());
        assert!(record.position().is_none());

        record.record_packet(102, Some(&Fix::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(record.position().map(|p| p.count()), Some(1));
    }
}
