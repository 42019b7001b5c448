//! Fan-out of discovered record batches to subscribers

use crate::record::RecordBatch;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Consumer of discovered records
///
/// Batches arrive one at a time, in the order they were published.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_batch(&self, batch: RecordBatch);
}

/// Handle returned by [`Publisher::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Hands batches to every subscriber without waiting on any of them
///
/// Each subscriber owns an unbounded queue, so [`Publisher::publish`] never
/// blocks the watch callback that produced the batch and a slow subscriber
/// only delays itself.
#[derive(Clone, Default)]
pub struct Publisher {
    subscribers: Arc<DashMap<SubscriptionId, mpsc::UnboundedSender<RecordBatch>>>,
    next_id: Arc<AtomicU64>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; a task drains its queue in order
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let publisher = Publisher::new();
    /// publisher.subscribe(RouteTable::new());
    /// ```
    pub fn subscribe<S>(&self, subscriber: S) -> SubscriptionId
    where
        S: Subscriber + 'static,
    {
        let (id, mut rx) = self.register();
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                subscriber.on_batch(batch).await;
            }
            trace!("Subscriber {:?} drained", id);
        });
        id
    }

    /// Register a channel subscriber and return its receiving end
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<RecordBatch> {
        self.register().1
    }

    fn register(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RecordBatch>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        debug!("Subscribed {:?}", id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscribers.remove(&id).is_some() {
            debug!("Unsubscribed {:?}", id);
        }
    }

    /// Queue `batch` for every subscriber, returning how many accepted it
    ///
    /// Empty batches are dropped. Subscribers whose receiving end is gone
    /// are forgotten.
    pub fn publish(&self, batch: RecordBatch) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(batch.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }

        trace!(
            "Published {} {} record(s) to {} subscriber(s)",
            batch.len(),
            batch.kind(),
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
