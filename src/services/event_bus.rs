//! Event Bus: bounded broadcast of lifecycle events with drop-counting
//! backpressure (spec.md §4.1).
//!
//! Grounded in the teacher's `EventBus` (sequence-numbered envelope,
//! broadcast fan-out) but re-scoped to the bounded, 100ms-retry-then-drop
//! semantics spec.md actually specifies — the teacher's `tokio::broadcast`
//! channel never blocks a slow subscriber out, it silently lags it, which
//! does not match the drop-counter contract this spec requires. Fan-out is
//! therefore implemented with one bounded `mpsc` channel per subscriber.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::domain::event::{Event, EventPayload, SequenceCounter};

const SEND_RETRY_WINDOW: Duration = Duration::from_millis(100);

/// Bounded, drop-counting publisher of [`Event`]s.
pub struct EventBus {
    capacity: usize,
    subscribers: RwLock<Vec<mpsc::Sender<Event>>>,
    sequence: SequenceCounter,
    emitted: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: RwLock::new(Vec::new()),
            sequence: SequenceCounter::new(),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new subscriber with its own bounded mailbox.
    pub async fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().await.push(tx);
        rx
    }

    /// Non-blocking attempt to each subscriber, then a single 100ms bounded
    /// retry, then drop with a counted, periodically-logged warning
    /// (spec.md §4.1). Emitting after [`close`](Self::close) is treated as
    /// an immediate drop rather than a panic.
    pub async fn emit(&self, payload: EventPayload) {
        self.emitted.fetch_add(1, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            self.record_drop();
            return;
        }

        let sequence = self.sequence.next();
        let event = Event::new(sequence, payload);

        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            self.send_one(subscriber, event.clone()).await;
        }
    }

    async fn send_one(&self, subscriber: &mpsc::Sender<Event>, event: Event) {
        match subscriber.try_send(event) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Closed(_)) => return,
            Err(mpsc::error::TrySendError::Full(event)) => {
                if timeout(SEND_RETRY_WINDOW, subscriber.send(event)).await.is_ok() {
                    return;
                }
            }
        }
        self.record_drop();
    }

    fn record_drop(&self) {
        let count = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
        if count % 10 == 0 {
            tracing::warn!(dropped = count, "event bus dropped its 10th event since last log");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Idempotent: repeated calls are a no-op.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.write().await.clear();
    }
}
