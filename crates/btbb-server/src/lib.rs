//! # btbb-server
//!
//! BTBB device tracker service with pluggable async runtime.
//!
//! The tracking state ([`Tracker`]), the publisher and the periodic
//! scheduler are runtime-agnostic. Enable features based on target platform:
//! - `tokio-runtime` (default) - tracker service task and WebSocket server

pub mod publisher;
pub mod schedule;
pub mod subscriber;
pub mod tracker;

#[cfg(feature = "tokio-runtime")]
pub mod server;
#[cfg(feature = "tokio-runtime")]
pub mod service;

pub use publisher::{broadcast_changed, snapshot_to, PublishReport};
pub use schedule::{pump, BroadcastTask, PacketConsumer, PeriodicTask, Scheduler, StatsTask};
pub use subscriber::{MessageSink, SendError, Subscriber, SubscriberId, SubscriberSet};
pub use tracker::Tracker;

#[cfg(feature = "tokio-runtime")]
pub use server::{ServerConfig, TrackerServer};
#[cfg(feature = "tokio-runtime")]
pub use service::{ServiceConfig, TrackerError, TrackerEvent, TrackerHandle, TrackerService, TrackerStats};
