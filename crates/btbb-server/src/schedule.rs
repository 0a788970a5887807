//! Packet pumping and periodic work.
//!
//! Packets flow from a [`PacketSource`] into a [`PacketConsumer`] via
//! [`pump`]. Timed work implements [`PeriodicTask`] and is driven by a
//! [`Scheduler`], which only tracks deadlines; the caller decides how to
//! sleep until [`Scheduler::next_deadline`].

use std::time::{Duration, Instant};

use btbb_core::DecodedPacket;
use btbb_providers::PacketSource;
use tracing::{debug, info};

use crate::tracker::Tracker;

/// Receives decoded packets.
pub trait PacketConsumer {
    /// Take one packet. Returning false stops the pump.
    fn consume(&mut self, packet: DecodedPacket) -> bool;
}

impl PacketConsumer for Tracker {
    fn consume(&mut self, packet: DecodedPacket) -> bool {
        self.observe(&packet);
        true
    }
}

/// Move packets from `source` to `consumer` until either side stops.
///
/// Returns the number of packets consumed.
pub fn pump<S, C>(source: &mut S, consumer: &mut C) -> u64
where
    S: PacketSource + ?Sized,
    C: PacketConsumer + ?Sized,
{
    let mut count = 0;
    while let Some(packet) = source.next_packet() {
        if !consumer.consume(packet) {
            debug!("Packet consumer stopped after {} packets", count);
            break;
        }
        count += 1;
    }
    count
}

/// Work run against the tracker at a fixed period.
pub trait PeriodicTask: Send {
    fn name(&self) -> &str;

    fn period(&self) -> Duration;

    fn run(&mut self, tracker: &mut Tracker);
}

/// Publishes changed devices to all subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastTask {
    period: Duration,
}

impl BroadcastTask {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl PeriodicTask for BroadcastTask {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run(&mut self, tracker: &mut Tracker) {
        tracker.broadcast_changed();
    }
}

/// Logs registry size.
#[derive(Debug, Clone)]
pub struct StatsTask {
    period: Duration,
}

impl StatsTask {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for StatsTask {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}

impl PeriodicTask for StatsTask {
    fn name(&self) -> &str {
        "stats"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run(&mut self, tracker: &mut Tracker) {
        let stats = tracker.stats();
        info!(
            "Tracking {} confirmed devices, {} provisional ({} evicted), {} subscribers",
            stats.confirmed,
            stats.provisional,
            stats.evicted,
            tracker.subscriber_count()
        );
    }
}

struct Scheduled {
    task: Box<dyn PeriodicTask>,
    deadline: Instant,
}

/// Deadline bookkeeping for a set of periodic tasks.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Scheduled>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, first due one period after `now`.
    pub fn add(&mut self, task: Box<dyn PeriodicTask>, now: Instant) {
        // A zero period would make the task due forever.
        let deadline = now + task.period().max(Duration::from_millis(1));
        self.tasks.push(Scheduled { task, deadline });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The earliest deadline, if any task is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|s| s.deadline).min()
    }

    /// Run every task due at `now`, in insertion order. Returns how many ran.
    ///
    /// A task that fell more than one period behind runs once and is
    /// rescheduled from `now`; missed runs are not replayed.
    pub fn run_due(&mut self, now: Instant, tracker: &mut Tracker) -> usize {
        let mut ran = 0;
        for scheduled in &mut self.tasks {
            if scheduled.deadline > now {
                continue;
            }
            scheduled.task.run(tracker);
            ran += 1;

            let period = scheduled.task.period().max(Duration::from_millis(1));
            scheduled.deadline += period;
            if scheduled.deadline <= now {
                debug!("Periodic task {} fell behind", scheduled.task.name());
                scheduled.deadline = now + period;
            }
        }
        ran
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tasks.iter().map(|s| (s.task.name(), s.deadline)))
            .finish()
    }
}
