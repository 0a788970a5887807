//! Sighting registry.
//!
//! Poor error correction on the air interface means a LAP decoded from a
//! single packet very likely does not exist. The registry therefore keeps two
//! tiers:
//! - *provisional*: LAPs seen exactly once, never published
//! - *confirmed*: LAPs seen at least twice, the only records ever published
//!
//! A record is created in the provisional tier and moved (not copied) into
//! the confirmed tier on its second sighting. Confirmed records are kept for
//! the lifetime of the registry.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::collections::{HashMap, VecDeque};

use crate::device::DeviceRecord;
use crate::model::{Fix, Lap};

/// Registry tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Maximum number of provisional records. `None` keeps every single
    /// sighting forever; `Some(n)` evicts the oldest first sighting once `n`
    /// is reached. A capacity of zero is treated as one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisional_capacity: Option<usize>,
}

/// Which tier owns a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Provisional,
    Confirmed,
}

/// What an `observe` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// LAP was unknown; a provisional record was created.
    FirstSighting,
    /// LAP was provisional and has been moved to the confirmed tier.
    Promoted,
    /// LAP was already confirmed.
    Updated,
}

/// Result of attributing one packet.
#[derive(Debug)]
pub struct Observed<'a> {
    pub observation: Observation,
    pub record: &'a DeviceRecord,
    /// Provisional LAP dropped to make room for this one, if any.
    pub evicted: Option<Lap>,
}

/// Record counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub provisional: usize,
    pub confirmed: usize,
    pub evicted: u64,
}

/// Single-sighting candidates, optionally bounded.
#[derive(Debug, Default)]
struct ProvisionalTier {
    records: HashMap<Lap, DeviceRecord>,
    /// Arrival order of provisional LAPs, oldest first. Only maintained when
    /// bounded; entries for LAPs that have since been promoted are skipped.
    arrival: VecDeque<Lap>,
    capacity: Option<usize>,
    evicted: u64,
}

impl ProvisionalTier {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.map(|c| c.max(1)),
            ..Default::default()
        }
    }

    fn insert(&mut self, record: DeviceRecord) -> (Option<Lap>, &mut DeviceRecord) {
        let lap = record.lap();
        let mut evicted = None;

        if let Some(capacity) = self.capacity {
            if self.records.len() >= capacity {
                evicted = self.evict_oldest();
            }
            if self.arrival.len() >= capacity * 2 {
                let records = &self.records;
                self.arrival.retain(|l| records.contains_key(l));
            }
            self.arrival.push_back(lap);
        }

        (evicted, self.records.entry(lap).or_insert(record))
    }

    fn evict_oldest(&mut self) -> Option<Lap> {
        while let Some(lap) = self.arrival.pop_front() {
            if self.records.remove(&lap).is_some() {
                self.evicted += 1;
                return Some(lap);
            }
        }
        None
    }

    fn remove(&mut self, lap: &Lap) -> Option<DeviceRecord> {
        self.records.remove(lap)
    }
}

/// Two-tier registry of every device the tracker has heard.
#[derive(Debug)]
pub struct SightingRegistry {
    provisional: ProvisionalTier,
    confirmed: BTreeMap<Lap, DeviceRecord>,
}

impl Default for SightingRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SightingRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            provisional: ProvisionalTier::new(config.provisional_capacity),
            confirmed: BTreeMap::new(),
        }
    }

    /// Attribute one packet seen at `timestamp` to `lap`.
    ///
    /// Invalid fixes are ignored; they never reset an existing aggregate.
    pub fn observe(&mut self, lap: Lap, timestamp: u64, fix: Option<&Fix>) -> Observed<'_> {
        if let Some(mut record) = self.provisional.remove(&lap) {
            record.record_packet(timestamp, fix);
            let record = self.confirmed.entry(lap).or_insert(record);
            return Observed {
                observation: Observation::Promoted,
                record,
                evicted: None,
            };
        }

        match self.confirmed.entry(lap) {
            btree_map::Entry::Occupied(entry) => {
                let record = entry.into_mut();
                record.record_packet(timestamp, fix);
                Observed {
                    observation: Observation::Updated,
                    record,
                    evicted: None,
                }
            }
            btree_map::Entry::Vacant(_) => {
                let (evicted, record) = self
                    .provisional
                    .insert(DeviceRecord::new(lap, timestamp, fix));
                Observed {
                    observation: Observation::FirstSighting,
                    record,
                    evicted,
                }
            }
        }
    }

    /// Look up a record in either tier.
    pub fn get(&self, lap: Lap) -> Option<&DeviceRecord> {
        self.confirmed
            .get(&lap)
            .or_else(|| self.provisional.records.get(&lap))
    }

    /// Which tier currently owns `lap`.
    pub fn tier_of(&self, lap: Lap) -> Option<Tier> {
        if self.confirmed.contains_key(&lap) {
            Some(Tier::Confirmed)
        } else if self.provisional.records.contains_key(&lap) {
            Some(Tier::Provisional)
        } else {
            None
        }
    }

    /// Confirmed records in ascending LAP order.
    pub fn confirmed(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.confirmed.values()
    }

    /// Confirmed records in ascending LAP order, mutably.
    pub fn confirmed_mut(&mut self) -> impl Iterator<Item = &mut DeviceRecord> {
        self.confirmed.values_mut()
    }

    /// Mark a confirmed record as published. Returns false if `lap` is not
    /// confirmed.
    pub fn clear_dirty(&mut self, lap: Lap) -> bool {
        match self.confirmed.get_mut(&lap) {
            Some(record) => {
                record.clear_dirty();
                true
            }
            None => false,
        }
    }

    pub fn provisional_len(&self) -> usize {
        self.provisional.records.len()
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            provisional: self.provisional_len(),
            confirmed: self.confirmed_len(),
            evicted: self.provisional.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lap(v: u32) -> Lap {
        Lap::new(v).unwrap()
    }

    #[test]
    fn test_single_sighting_stays_provisional() {
        let mut registry = SightingRegistry::default();
        let observed = registry.observe(lap(0xABCDEF), 100, None);

        assert_eq!(observed.observation, Observation::FirstSighting);
        assert_eq!(observed.record.packets(), 1);
        assert_eq!(registry.tier_of(lap(0xABCDEF)), Some(Tier::Provisional));
        assert_eq!(registry.confirmed().count(), 0);
    }

    #[test]
    fn test_promotion_example() {
        let mut registry = SightingRegistry::default();
        let id = lap(0xABCDEF);

        registry.observe(id, 100, None);
        assert_eq!(registry.tier_of(id), Some(Tier::Provisional));

        let observed = registry.observe(id, 105, None);
        assert_eq!(observed.observation, Observation::Promoted);
        assert_eq!(observed.record.packets(), 2);
        assert_eq!(observed.record.first_seen(), 100);
        assert_eq!(observed.record.last_seen(), 105);
        assert_eq!(registry.tier_of(id), Some(Tier::Confirmed));
        assert_eq!(registry.provisional_len(), 0);

        let fix = Fix::new(10.0, 20.0, 5.0, 1.0);
        let observed = registry.observe(id, 110, Some(&fix));
        assert_eq!(observed.observation, Observation::Updated);
        assert_eq!(observed.record.packets(), 3);

        let agg = observed.record.position().unwrap();
        assert_eq!(agg.count(), 1);
        assert_eq!(
            (agg.min_lat(), agg.max_lat(), agg.centroid_lat()),
            (10.0, 10.0, 10.0)
        );
        assert_eq!(
            (agg.min_lon(), agg.max_lon(), agg.centroid_lon()),
            (20.0, 20.0, 20.0)
        );
        assert_eq!((agg.min_alt(), agg.max_alt(), agg.centroid_alt()), (5.0, 5.0, 5.0));
        assert_eq!((agg.min_speed(), agg.max_speed()), (1.0, 1.0));
    }

    #[test]
    fn test_promotion_keeps_first_sighting_state() {
        let mut registry = SightingRegistry::default();
        let id = lap(0x000001);
        let fix = Fix::new(1.0, 2.0, 3.0, 0.5);

        registry.observe(id, 50, Some(&fix));
        registry.observe(id, 60, None);

        let record = registry.get(id).unwrap();
        assert_eq!(record.first_seen(), 50);
        assert_eq!(record.position().map(|p| p.count()), Some(1));
    }

    #[test]
    fn test_packet_count_matches_observations() {
        let mut registry = SightingRegistry::default();
        let id = lap(0x123456);
        let mut last_seen = 0;
        let mut last_packets = 0;

        for (i, t) in [10u64, 12, 11, 15, 15, 20].iter().enumerate() {
            let observed = registry.observe(id, *t, None);
            assert!(observed.record.last_seen() >= last_seen);
            assert!(observed.record.packets() > last_packets);
            assert_eq!(observed.record.packets(), i as u64 + 1);
            last_seen = observed.record.last_seen();
            last_packets = observed.record.packets();
        }

        assert_eq!(registry.tier_of(id), Some(Tier::Confirmed));
        assert_eq!(registry.provisional_len(), 0);
        assert_eq!(registry.get(id).unwrap().last_seen(), 20);
    }

    #[test]
    fn test_confirmed_iterates_in_lap_order() {
        let mut registry = SightingRegistry::default();
        for v in [0x300000, 0x100000, 0x200000] {
            registry.observe(lap(v), 1, None);
            registry.observe(lap(v), 2, None);
        }
        registry.observe(lap(0x050000), 1, None);

        let laps: Vec<u32> = registry.confirmed().map(|r| r.lap().value()).collect();
        assert_eq!(laps, vec![0x100000, 0x200000, 0x300000]);
    }

    #[test]
    fn test_clear_dirty() {
        let mut registry = SightingRegistry::default();
        let id = lap(0x00AA00);
        registry.observe(id, 1, None);
        assert!(!registry.clear_dirty(id));

        registry.observe(id, 2, None);
        assert!(registry.clear_dirty(id));
        assert!(!registry.get(id).unwrap().is_dirty());

        registry.observe(id, 3, None);
        assert!(registry.get(id).unwrap().is_dirty());
    }

    #[test]
    fn test_unbounded_by_default() {
        let mut registry = SightingRegistry::default();
        for v in 0..1000 {
            registry.observe(lap(v), 1, None);
        }
        assert_eq!(registry.provisional_len(), 1000);
        assert_eq!(registry.stats().evicted, 0);
    }

    #[test]
    fn test_bounded_provisional_evicts_oldest() {
        let mut registry = SightingRegistry::new(RegistryConfig {
            provisional_capacity: Some(2),
        });

        registry.observe(lap(1), 1, None);
        registry.observe(lap(2), 2, None);
        let observed = registry.observe(lap(3), 3, None);
        assert_eq!(observed.evicted, Some(lap(1)));

        assert_eq!(registry.tier_of(lap(1)), None);
        assert_eq!(registry.tier_of(lap(2)), Some(Tier::Provisional));
        assert_eq!(registry.tier_of(lap(3)), Some(Tier::Provisional));
        assert_eq!(registry.stats().evicted, 1);

        // An evicted LAP starts over as a first sighting.
        let observed = registry.observe(lap(1), 4, None);
        assert_eq!(observed.observation, Observation::FirstSighting);
        assert_eq!(observed.record.first_seen(), 4);
        assert_eq!(observed.evicted, Some(lap(2)));
    }

    #[test]
    fn test_bounded_provisional_skips_promoted() {
        let mut registry = SightingRegistry::new(RegistryConfig {
            provisional_capacity: Some(2),
        });

        registry.observe(lap(1), 1, None);
        registry.observe(lap(2), 2, None);
        registry.observe(lap(1), 3, None); // promote 1
        registry.observe(lap(3), 4, None);
        let observed = registry.observe(lap(4), 5, None);

        assert_eq!(observed.evicted, Some(lap(2)));
        assert_eq!(registry.tier_of(lap(1)), Some(Tier::Confirmed));
        assert_eq!(registry.provisional_len(), 2);
    }

    #[test]
    fn test_bounded_provisional_under_churn() {
        let mut registry = SightingRegistry::new(RegistryConfig {
            provisional_capacity: Some(8),
        });

        for v in 0..500u32 {
            registry.observe(lap(v), v as u64, None);
            if v % 3 == 0 {
                registry.observe(lap(v), v as u64 + 1, None);
            }
            assert!(registry.provisional_len() <= 8);
        }

        let stats = registry.stats();
        assert_eq!(stats.confirmed, 167);
        assert_eq!(stats.provisional, 8);
    }
}
