//! Subscriber management.
//!
//! A subscriber is one client connection that asked for live BTBBDEV
//! updates, together with the fields it selected. Outbound messages go to an
//! opaque [`MessageSink`] owned by the connection layer; delivery into a sink
//! never blocks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use btbb_core::FieldRequest;
use btbb_protocol::ServerMessage;
use thiserror::Error;

/// Why a message could not be handed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The subscriber's queue is full; it is not keeping up.
    #[error("subscriber queue full")]
    Full,

    /// The subscriber's connection is gone.
    #[error("subscriber disconnected")]
    Closed,
}

/// Non-blocking outbound path to one connection.
pub trait MessageSink: Send {
    fn try_send(&self, message: ServerMessage) -> Result<(), SendError>;
}

#[cfg(feature = "tokio-runtime")]
impl MessageSink for tokio::sync::mpsc::Sender<ServerMessage> {
    fn try_send(&self, message: ServerMessage) -> Result<(), SendError> {
        use tokio::sync::mpsc::error::TrySendError;

        tokio::sync::mpsc::Sender::try_send(self, message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Connection handle identifying a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A client subscribed to device updates.
pub struct Subscriber {
    id: SubscriberId,
    fields: Vec<FieldRequest>,
    sink: Box<dyn MessageSink>,
}

impl Subscriber {
    pub fn new(id: SubscriberId, fields: Vec<FieldRequest>, sink: Box<dyn MessageSink>) -> Self {
        Self { id, fields, sink }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Requested fields, in the order the client asked for them.
    pub fn fields(&self) -> &[FieldRequest] {
        &self.fields
    }

    pub fn send(&self, message: ServerMessage) -> Result<(), SendError> {
        self.sink.try_send(message)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Every connection currently subscribed, keyed by id.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, replacing any previous subscription with the same id.
    pub fn insert(&mut self, subscriber: Subscriber) -> Option<Subscriber> {
        self.subscribers.insert(subscriber.id(), subscriber)
    }

    /// Remove a subscriber. Removing an unknown id is not an error.
    pub fn remove(&mut self, id: SubscriberId) -> Option<Subscriber> {
        self.subscribers.remove(&id)
    }

    pub fn get(&self, id: SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
