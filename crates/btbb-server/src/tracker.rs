//! Tracker state.
//!
//! [`Tracker`] owns the sighting registry and the subscriber set. It is plain
//! synchronous state with no runtime dependency; the tokio service drives it
//! from a single task, so nothing here is shared or locked.

use btbb_core::{DecodedPacket, DeviceRecord, Lap, Observation, RegistryConfig, RegistryStats, SightingRegistry};
use tracing::{debug, info, warn};

use crate::publisher::{self, PublishReport};
use crate::subscriber::{Subscriber, SubscriberId, SubscriberSet};

#[derive(Debug)]
pub struct Tracker {
    registry: SightingRegistry,
    subscribers: SubscriberSet,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Tracker {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            registry: SightingRegistry::new(config),
            subscribers: SubscriberSet::new(),
        }
    }

    /// Attribute one decoded packet to its device.
    pub fn observe(&mut self, packet: &DecodedPacket) -> Observation {
        let observed = self
            .registry
            .observe(packet.lap, packet.timestamp, packet.fix.as_ref());

        if let Some(evicted) = observed.evicted {
            debug!("Evicted provisional LAP {}", evicted);
        }
        match observed.observation {
            Observation::FirstSighting => debug!("First sighting of LAP {}", packet.lap),
            Observation::Promoted => info!(
                "New device {} ({} packets)",
                packet.lap.bd_addr(),
                observed.record.packets()
            ),
            Observation::Updated => {}
        }

        observed.observation
    }

    /// Add a subscriber and bring it up to date with every confirmed device.
    ///
    /// A subscriber that cannot take its whole snapshot is not kept. Dropping
    /// it releases its sink, which ends the connection instead of leaving the
    /// client with a partial view.
    pub fn subscribe(&mut self, subscriber: Subscriber) -> PublishReport {
        let id = subscriber.id();
        let report = publisher::snapshot_to(&self.registry, &subscriber);

        if report.dropped.contains(&id) {
            warn!(
                "Subscriber {} dropped, snapshot stopped after {} of {} devices",
                id,
                report.sent,
                self.registry.confirmed_len()
            );
            self.subscribers.remove(id);
        } else {
            info!(
                "Subscriber {} added, snapshot of {} devices",
                id, report.sent
            );
            self.subscribers.insert(subscriber);
        }
        report
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            info!("Subscriber {} removed", id);
        }
        removed
    }

    /// Publish every changed device to every subscriber.
    pub fn broadcast_changed(&mut self) -> PublishReport {
        publisher::broadcast_changed(&mut self.registry, &mut self.subscribers)
    }

    pub fn registry(&self) -> &SightingRegistry {
        &self.registry
    }

    pub fn device(&self, lap: Lap) -> Option<&DeviceRecord> {
        self.registry.get(lap)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
