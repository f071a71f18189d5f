//! Event Hub — single-process pub/sub fan-out for stream events.
//!
//! Generalizes the bounded single-consumer channel pair used elsewhere in
//! this codebase into a multi-subscriber broadcaster: every subscriber gets
//! its own bounded queue, and a slow subscriber has events dropped (counted,
//! logged) rather than blocking the producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

pub struct EventHub<T: Clone + Send + 'static> {
    subscribers: RwLock<Vec<mpsc::Sender<T>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T: Clone + Send + 'static> EventHub<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EventHub {
            subscribers: RwLock::new(Vec::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber and return its receiver.
    pub async fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().await.push(tx);
        rx
    }

    /// Publish an event to every live subscriber. Never blocks: a full
    /// subscriber queue has the event dropped and the counter bumped.
    pub async fn publish(&self, event: T) {
        let mut guard = self.subscribers.write().await;
        guard.retain(|tx| !tx.is_closed());
        for tx in guard.iter() {
            if tx.try_send(event.clone()).is_err() {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = total, "event hub subscriber queue full, dropping event");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl<T: Clone + Send + 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedEventHub<T> = Arc<EventHub<T>>;
