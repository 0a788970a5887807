//! Device publishing.
//!
//! Two ways to push confirmed devices to subscribers:
//! - [`broadcast_changed`]: the periodic delta sweep. Only dirty records are
//!   formatted and offered to every subscriber; a record's dirty flag is
//!   cleared once all subscribers accepted it.
//! - [`snapshot_to`]: brings one newly joined subscriber up to date with every
//!   confirmed record, dirty or not.
//!
//! Both stop at the first failed send. Remaining records stay dirty and are
//! retried on the next sweep. Delivery never blocks (see [`MessageSink`]), so
//! a sweep never waits on a slow client. A subscriber whose queue is full or
//! closed is dropped from the set: keeping it would halt every later sweep on
//! the same record. Dropping its sink ends the connection.
//!
//! [`MessageSink`]: crate::subscriber::MessageSink

use btbb_core::{FieldRequest, RecordFormatter, SightingRegistry};
use btbb_protocol::{DeviceMessage, ErrorMessage, ServerMessage};
use tracing::{debug, warn};

use crate::subscriber::{Subscriber, SubscriberId, SubscriberSet};

/// Outcome of one publish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Records delivered.
    pub sent: usize,
    /// Clean records skipped by a delta sweep.
    pub skipped: usize,
    /// Whether the pass stopped early on a send failure.
    pub halted: bool,
    /// Subscribers dropped during the pass, either disconnected or not
    /// keeping up.
    pub dropped: Vec<SubscriberId>,
}

/// Build the message for one subscriber from a shared per-record formatter.
fn render(formatter: &mut RecordFormatter<'_>, fields: &[FieldRequest]) -> ServerMessage {
    match formatter.format(fields) {
        Ok(values) => ServerMessage::Device(DeviceMessage::btbbdev(values)),
        Err(e) => ServerMessage::Error(ErrorMessage::new(e.to_string())),
    }
}

/// Send every dirty confirmed record to every subscriber.
///
/// For each dirty record, in LAP order, one formatter is shared by all
/// subscribers. If every subscriber accepts the record its dirty flag is
/// cleared; otherwise the record stays dirty and the sweep halts. Every
/// subscriber that failed a send is removed from `subscribers`, so the next
/// sweep reaches the remaining ones.
pub fn broadcast_changed(
    registry: &mut SightingRegistry,
    subscribers: &mut SubscriberSet,
) -> PublishReport {
    let mut report = PublishReport::default();

    for record in registry.confirmed_mut() {
        if !record.is_dirty() {
            report.skipped += 1;
            continue;
        }

        let mut failed = false;
        {
            let mut formatter = RecordFormatter::new(record);
            for subscriber in subscribers.iter() {
                let message = render(&mut formatter, subscriber.fields());
                if let Err(e) = subscriber.send(message) {
                    warn!(
                        "Broadcast of {} to subscriber {} failed: {}",
                        formatter.record().lap(),
                        subscriber.id(),
                        e
                    );
                    report.dropped.push(subscriber.id());
                    failed = true;
                }
            }
        }

        if failed {
            report.halted = true;
            break;
        }

        record.clear_dirty();
        report.sent += 1;
    }

    for id in &report.dropped {
        subscribers.remove(*id);
    }

    if report.sent > 0 || report.halted {
        debug!(
            "Broadcast sent {} devices, skipped {}, halted: {}",
            report.sent, report.skipped, report.halted
        );
    }

    report
}

/// Send every confirmed record to one subscriber. Dirty flags are untouched.
///
/// A halted snapshot leaves the subscriber with a partial view that later
/// deltas would never complete, so the subscriber is reported as dropped.
pub fn snapshot_to(registry: &SightingRegistry, subscriber: &Subscriber) -> PublishReport {
    let mut report = PublishReport::default();

    for record in registry.confirmed() {
        let mut formatter = RecordFormatter::new(record);
        let message = render(&mut formatter, subscriber.fields());

        if let Err(e) = subscriber.send(message) {
            warn!(
                "Snapshot to subscriber {} stopped after {} devices: {}",
                subscriber.id(),
                report.sent,
                e
            );
            report.dropped.push(subscriber.id());
            report.halted = true;
            break;
        }
        report.sent += 1;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::testing::{subscriber, RecordingSink};
    use crate::subscriber::SendError;
    use btbb_core::{Field, Fix, Lap};

    fn lap(v: u32) -> Lap {
        Lap::new(v).unwrap()
    }

    /// Registry with the given LAPs confirmed and dirty.
    fn registry_with(laps: &[u32]) -> SightingRegistry {
        let mut registry = SightingRegistry::default();
        for &v in laps {
            registry.observe(lap(v), 100, None);
            registry.observe(lap(v), 105, None);
        }
        registry
    }

    fn device_values(msg: &ServerMessage) -> &[String] {
        match msg {
            ServerMessage::Device(device) => &device.values,
            other => panic!("Expected device message, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_sends_dirty_and_clears() {
        let mut registry = registry_with(&[0x000002, 0x000001]);
        registry.observe(lap(0x000003), 100, None); // provisional only

        let mut subscribers = SubscriberSet::new();
        let (sub, sink) = subscriber(vec![Field::Bdaddr.into(), Field::Packets.into()]);
        subscribers.insert(sub);

        let report = broadcast_changed(&mut registry, &mut subscribers);
        assert_eq!(report.sent, 2);
        assert!(!report.halted);
        assert!(registry.confirmed().all(|r| !r.is_dirty()));

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(device_values(&messages[0]), ["00:00:00:00:00:01", "2"]);
        assert_eq!(device_values(&messages[1]), ["00:00:00:00:00:02", "2"]);
    }

    #[test]
    fn test_broadcast_skips_clean_records() {
        let mut registry = registry_with(&[1, 2, 3]);
        let mut subscribers = SubscriberSet::new();
        let (sub, sink) = subscriber(FieldRequest::all());
        subscribers.insert(sub);

        broadcast_changed(&mut registry, &mut subscribers);
        assert_eq!(sink.len(), 3);

        registry.observe(lap(2), 110, None);
        let report = broadcast_changed(&mut registry, &mut subscribers);

        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(sink.len(), 4);
        assert_eq!(device_values(&sink.messages()[3])[2], "110");
    }

    #[test]
    fn test_broadcast_without_subscribers_clears_dirty() {
        let mut registry = registry_with(&[1]);
        let report = broadcast_changed(&mut registry, &mut SubscriberSet::new());

        assert_eq!(report.sent, 1);
        assert!(!registry.get(lap(1)).unwrap().is_dirty());
    }

    #[test]
    fn test_stalled_subscriber_does_not_block_others() {
        let mut registry = registry_with(&[1, 2, 3]);
        let mut subscribers = SubscriberSet::new();

        let (healthy, healthy_sink) = subscriber(vec![Field::Bdaddr.into()]);
        subscribers.insert(healthy);
        let stalled_id = SubscriberId::next();
        subscribers.insert(Subscriber::new(
            stalled_id,
            FieldRequest::all(),
            Box::new(RecordingSink::with_capacity(0)),
        ));

        let report = broadcast_changed(&mut registry, &mut subscribers);
        assert!(report.halted);
        assert_eq!(report.sent, 0);
        assert_eq!(report.dropped, vec![stalled_id]);
        assert!(!subscribers.contains(stalled_id));
        assert!(registry.confirmed().all(|r| r.is_dirty()));

        let report = broadcast_changed(&mut registry, &mut subscribers);
        assert!(!report.halted);
        assert_eq!(report.sent, 3);
        assert!(registry.confirmed().all(|r| !r.is_dirty()));

        let mut received: Vec<String> = healthy_sink
            .messages()
            .iter()
            .map(|m| device_values(m)[0].clone())
            .collect();
        received.dedup();
        assert_eq!(
            received,
            ["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03"]
        );
    }

    #[test]
    fn test_broadcast_keeps_later_records_dirty_after_halt() {
        let mut registry = registry_with(&[1, 2, 3]);
        let mut subscribers = SubscriberSet::new();
        let slow_id = SubscriberId::next();
        subscribers.insert(Subscriber::new(
            slow_id,
            FieldRequest::all(),
            Box::new(RecordingSink::with_capacity(1)),
        ));

        let report = broadcast_changed(&mut registry, &mut subscribers);

        assert!(report.halted);
        assert_eq!(report.sent, 1);
        assert_eq!(report.dropped, vec![slow_id]);
        assert!(!registry.get(lap(1)).unwrap().is_dirty());
        assert!(registry.get(lap(2)).unwrap().is_dirty());
        assert!(registry.get(lap(3)).unwrap().is_dirty());
    }

    #[test]
    fn test_broadcast_prunes_closed_subscriber() {
        let mut registry = registry_with(&[1, 2]);
        let mut subscribers = SubscriberSet::new();
        let (gone, gone_sink) = subscriber(FieldRequest::all());
        let gone_id = gone.id();
        gone_sink.fail(SendError::Closed);
        subscribers.insert(gone);

        let report = broadcast_changed(&mut registry, &mut subscribers);
        assert!(report.halted);
        assert_eq!(report.dropped, vec![gone_id]);
        assert!(subscribers.is_empty());
        assert!(registry.get(lap(1)).unwrap().is_dirty());

        let report = broadcast_changed(&mut registry, &mut subscribers);
        assert_eq!(report.sent, 2);
    }

    #[test]
    fn test_unknown_field_sends_error_without_failing_sweep() {
        let mut registry = registry_with(&[1]);
        let mut subscribers = SubscriberSet::new();
        let (bad, bad_sink) = subscriber(vec![
            Field::Bdaddr.into(),
            FieldRequest::Unknown("rssi".to_string()),
        ]);
        let (good, good_sink) = subscriber(vec![Field::Bdaddr.into()]);
        subscribers.insert(bad);
        subscribers.insert(good);

        let report = broadcast_changed(&mut registry, &mut subscribers);

        assert_eq!(report.sent, 1);
        assert_eq!(
            bad_sink.messages(),
            vec![ServerMessage::Error(ErrorMessage::new(
                "Unknown field requested."
            ))]
        );
        assert_eq!(device_values(&good_sink.messages()[0]), ["00:00:00:00:00:01"]);
    }

    #[test]
    fn test_snapshot_sends_everything_and_keeps_dirty() {
        let mut registry = registry_with(&[1, 2, 3]);
        registry.observe(lap(9), 100, None); // provisional
        let mut subscribers = SubscriberSet::new();
        broadcast_changed(&mut registry, &mut subscribers);
        registry.observe(
            lap(2),
            120,
            Some(&Fix::new(10.0, 20.0, 5.0, 1.0)),
        );

        let (sub, sink) = subscriber(vec![Field::Bdaddr.into(), Field::Gpsfixed.into()]);
        let report = snapshot_to(&registry, &sub);

        assert_eq!(report.sent, 3);
        assert!(!report.halted);
        let values: Vec<Vec<String>> = sink
            .messages()
            .iter()
            .map(|m| device_values(m).to_vec())
            .collect();
        assert_eq!(
            values,
            vec![
                vec!["00:00:00:00:00:01", "0"],
                vec!["00:00:00:00:00:02", "1"],
                vec!["00:00:00:00:00:03", "0"],
            ]
        );

        assert!(!registry.get(lap(1)).unwrap().is_dirty());
        assert!(registry.get(lap(2)).unwrap().is_dirty());
    }

    #[test]
    fn test_snapshot_stops_on_failure() {
        let registry = registry_with(&[1, 2, 3]);
        let sink = RecordingSink::with_capacity(2);
        let sub = Subscriber::new(SubscriberId::next(), FieldRequest::all(), Box::new(sink.clone()));

        let report = snapshot_to(&registry, &sub);
        assert!(report.halted);
        assert_eq!(report.sent, 2);
        assert_eq!(report.dropped, vec![sub.id()]);
        assert_eq!(sink.len(), 2);
        assert!(registry.confirmed().all(|r| r.is_dirty()));
    }
}
