//! Tracker service task.
//!
//! A single tokio task owns the [`Tracker`]. Packet producers, connections
//! and queries talk to it through a [`TrackerHandle`], which wraps the
//! sending half of one event channel. Periodic work (the publish sweep and
//! stats logging) runs in the same task, between events, so observing and
//! publishing never interleave.

use std::time::Duration;

use btbb_core::{DecodedPacket, DeviceRecord, Lap, RegistryConfig, RegistryStats};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::schedule::{BroadcastTask, PacketConsumer, PeriodicTask, Scheduler, StatsTask};
use crate::subscriber::{Subscriber, SubscriberId};
use crate::tracker::Tracker;

const EVENT_QUEUE: usize = 1024;

/// Errors returned by [`TrackerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("tracker service stopped")]
    ServiceStopped,
}

impl<T> From<mpsc::error::SendError<T>> for TrackerError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        TrackerError::ServiceStopped
    }
}

impl From<oneshot::error::RecvError> for TrackerError {
    fn from(_: oneshot::error::RecvError) -> Self {
        TrackerError::ServiceStopped
    }
}

/// Events processed by the tracker task.
#[derive(Debug)]
pub enum TrackerEvent {
    /// A decoded packet to attribute.
    Packet(DecodedPacket),
    /// Register a subscriber and send it a snapshot.
    Subscribe(Subscriber),
    /// Drop a subscriber.
    Unsubscribe(SubscriberId),
    /// Report registry and subscriber counts.
    Stats(oneshot::Sender<TrackerStats>),
    /// Look up one device in either tier.
    Device {
        lap: Lap,
        reply: oneshot::Sender<Option<DeviceRecord>>,
    },
    /// Stop the service loop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub registry: RegistryStats,
    pub subscribers: usize,
}

/// Tracker service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub registry: RegistryConfig,
    /// Delta broadcast interval.
    pub publish_interval: Duration,
    /// How often registry size is logged.
    pub stats_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            publish_interval: Duration::from_millis(btbb_core::config::DEFAULT_PUBLISH_INTERVAL_MS),
            stats_interval: StatsTask::DEFAULT_PERIOD,
        }
    }
}

/// The task that owns tracker state.
pub struct TrackerService {
    tracker: Tracker,
    tasks: Vec<Box<dyn PeriodicTask>>,
    event_tx: mpsc::Sender<TrackerEvent>,
    event_rx: mpsc::Receiver<TrackerEvent>,
}

impl TrackerService {
    pub fn new(config: ServiceConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let tasks: Vec<Box<dyn PeriodicTask>> = vec![
            Box::new(BroadcastTask::new(config.publish_interval)),
            Box::new(StatsTask::new(config.stats_interval)),
        ];

        Self {
            tracker: Tracker::new(config.registry),
            tasks,
            event_tx,
            event_rx,
        }
    }

    /// Schedule an extra periodic task.
    pub fn with_task(mut self, task: Box<dyn PeriodicTask>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Get a handle for talking to the service.
    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            tx: self.event_tx.clone(),
        }
    }

    /// Process events until shutdown or until every handle is dropped.
    pub async fn run(self) {
        let TrackerService {
            mut tracker,
            tasks,
            event_tx,
            mut event_rx,
        } = self;
        drop(event_tx);

        let mut scheduler = Scheduler::new();
        let start = Instant::now().into_std();
        for task in tasks {
            debug!("Scheduling {} every {:?}", task.name(), task.period());
            scheduler.add(task, start);
        }

        info!("Tracker service started");
        loop {
            let deadline = scheduler.next_deadline().map(Instant::from_std);

            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(TrackerEvent::Shutdown) => {
                            info!("Tracker service shutting down");
                            break;
                        }
                        Some(event) => handle_event(&mut tracker, event),
                        None => {
                            info!("All tracker handles dropped");
                            break;
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    scheduler.run_due(Instant::now().into_std(), &mut tracker);
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn handle_event(tracker: &mut Tracker, event: TrackerEvent) {
    match event {
        TrackerEvent::Packet(packet) => {
            tracker.observe(&packet);
        }
        TrackerEvent::Subscribe(subscriber) => {
            tracker.subscribe(subscriber);
        }
        TrackerEvent::Unsubscribe(id) => {
            tracker.unsubscribe(id);
        }
        TrackerEvent::Stats(reply) => {
            let _ = reply.send(TrackerStats {
                registry: tracker.stats(),
                subscribers: tracker.subscriber_count(),
            });
        }
        TrackerEvent::Device { lap, reply } => {
            let _ = reply.send(tracker.device(lap).cloned());
        }
        TrackerEvent::Shutdown => {}
    }
}

/// Cloneable sender side of the tracker service.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerEvent>,
}

impl TrackerHandle {
    pub async fn observe(&self, packet: DecodedPacket) -> Result<(), TrackerError> {
        self.tx.send(TrackerEvent::Packet(packet)).await?;
        Ok(())
    }

    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<(), TrackerError> {
        self.tx.send(TrackerEvent::Subscribe(subscriber)).await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), TrackerError> {
        self.tx.send(TrackerEvent::Unsubscribe(id)).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<TrackerStats, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerEvent::Stats(reply)).await?;
        Ok(rx.await?)
    }

    pub async fn device(&self, lap: Lap) -> Result<Option<DeviceRecord>, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerEvent::Device { lap, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        self.tx.send(TrackerEvent::Shutdown).await?;
        Ok(())
    }

    /// Resolves once the service task has exited.
    pub async fn stopped(&self) {
        self.tx.closed().await
    }
}

/// Feeds packets from a blocking source such as stdin. Must not be used from
/// within an async context; run it under `spawn_blocking`.
impl PacketConsumer for TrackerHandle {
    fn consume(&mut self, packet: DecodedPacket) -> bool {
        match self.tx.blocking_send(TrackerEvent::Packet(packet)) {
            Ok(()) => true,
            Err(_) => {
                warn!("Tracker service stopped, dropping packet source");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::pump;
    use btbb_core::{FieldRequest, Fix};
    use btbb_protocol::ServerMessage;
    use btbb_providers::{LineSource, ManualClock};
    use std::io::Cursor;

    fn packet(lap: u32, ts: u64) -> DecodedPacket {
        DecodedPacket::new(Lap::new(lap).unwrap(), ts)
    }

    fn start(config: ServiceConfig) -> (TrackerHandle, tokio::task::JoinHandle<()>) {
        let service = TrackerService::new(config);
        let handle = service.handle();
        (handle, tokio::spawn(service.run()))
    }

    #[tokio::test]
    async fn test_observe_and_query() {
        let (handle, task) = start(ServiceConfig::default());

        handle.observe(packet(0xABCDEF, 100)).await.unwrap();
        handle.observe(packet(0xABCDEF, 105)).await.unwrap();
        handle
            .observe(packet(0xABCDEF, 110).with_fix(Fix::new(10.0, 20.0, 5.0, 1.0)))
            .await
            .unwrap();
        handle.observe(packet(0x123456, 111)).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.registry.confirmed, 1);
        assert_eq!(stats.registry.provisional, 1);
        assert_eq!(stats.subscribers, 0);

        let record = handle
            .device(Lap::new(0xABCDEF).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.packets(), 3);
        assert_eq!(record.last_seen(), 110);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.stats().await, Err(TrackerError::ServiceStopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_then_periodic_delta() {
        let (handle, _task) = start(ServiceConfig {
            publish_interval: Duration::from_secs(1),
            ..Default::default()
        });

        handle.observe(packet(1, 100)).await.unwrap();
        handle.observe(packet(1, 101)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        handle
            .subscribe(Subscriber::new(
                SubscriberId::next(),
                FieldRequest::all(),
                Box::new(tx),
            ))
            .await
            .unwrap();

        // Snapshot arrives without waiting for the sweep.
        let snapshot = rx.recv().await.unwrap();
        match snapshot {
            ServerMessage::Device(device) => assert_eq!(device.values[3], "2"),
            other => panic!("Expected device, got {:?}", other),
        }

        // The same record is still dirty, so the first sweep sends it again.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::Device(_)));

        handle.observe(packet(1, 150)).await.unwrap();
        match rx.recv().await.unwrap() {
            ServerMessage::Device(device) => assert_eq!(device.values[2], "150"),
            other => panic!("Expected device, got {:?}", other),
        }

        assert_eq!(handle.stats().await.unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let (handle, _task) = start(ServiceConfig {
            publish_interval: Duration::from_millis(10),
            ..Default::default()
        });

        let (tx, rx) = mpsc::channel(16);
        handle
            .subscribe(Subscriber::new(SubscriberId::next(), FieldRequest::all(), Box::new(tx)))
            .await
            .unwrap();
        assert_eq!(handle.stats().await.unwrap().subscribers, 1);
        drop(rx);

        handle.observe(packet(5, 1)).await.unwrap();
        handle.observe(packet(5, 2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.stats().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let (handle, task) = start(ServiceConfig::default());
        handle.observe(packet(9, 1)).await.unwrap();

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.stopped())
            .await
            .expect("service should stop");
        task.await.unwrap();

        assert!(matches!(
            handle.observe(packet(9, 2)).await,
            Err(TrackerError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn test_blocking_pump_from_line_source() {
        let (handle, _task) = start(ServiceConfig::default());

        let mut consumer = handle.clone();
        let consumed = tokio::task::spawn_blocking(move || {
            let input = "abcdef 100\nabcdef 105\n# noise\n123456\n";
            let mut source = LineSource::new(Cursor::new(input), ManualClock::new(200));
            pump(&mut source, &mut consumer)
        })
        .await
        .unwrap();

        assert_eq!(consumed, 3);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.registry.confirmed, 1);
        assert_eq!(stats.registry.provisional, 1);
    }
}
