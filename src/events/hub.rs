//! Bounded event buffer with broadcast to observers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::events::entry::{HubMessage, LogEntry};
use crate::events::sink::LogSink;
use crate::observability::metrics;

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 500;

/// A live observer registration.
///
/// The first message received is always [`HubMessage::History`]. Dropping the
/// receiver is enough to unsubscribe; the hub prunes it on the next append.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<HubMessage>,
}

struct Ring {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// Ring buffer of [`LogEntry`] plus the fan-out set.
///
/// Appends and subscriptions are serialized on the ring lock, so every
/// observer sees history followed by each later entry exactly once, in
/// append order.
pub struct EventHub {
    ring: Mutex<Ring>,
    subscribers: DashMap<u64, mpsc::UnboundedSender<HubMessage>>,
    next_id: AtomicU64,
    sink: Option<LogSink>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
            }),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            sink: None,
        }
    }

    /// Attach a write-behind file sink.
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Record an entry and broadcast it.
    pub fn append(&self, entry: LogEntry) {
        metrics::record_log_entry(entry.level.as_str());

        let mut ring = self.lock();
        ring.push(entry.clone());
        if let Some(sink) = &self.sink {
            sink.offer(&entry);
        }

        let mut closed = Vec::new();
        for subscriber in self.subscribers.iter() {
            if subscriber.value().send(HubMessage::Log(entry.clone())).is_err() {
                closed.push(*subscriber.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(subscriber = id, "Observer disconnected");
        }
        metrics::set_observers(self.subscribers.len());
    }

    /// Register an observer; it immediately receives the retained history.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let ring = self.lock();
        let history = ring.entries.iter().cloned().collect();
        // Receiver is alive in this scope; send cannot fail.
        let _ = tx.send(HubMessage::History(history));
        self.subscribers.insert(id, tx);
        drop(ring);

        metrics::set_observers(self.subscribers.len());
        tracing::debug!(subscriber = id, "Observer connected");
        Subscription { id, rx }
    }

    /// Remove an observer explicitly.
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            metrics::set_observers(self.subscribers.len());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Copy of the retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Drop all retained entries. Live observers are unaffected.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ring> {
        // A panic while holding the lock leaves the ring structurally valid.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
