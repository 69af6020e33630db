//! Subscriber Fan-out
//!
//! Distributes decoded price updates to every registered subscriber.
//!
//! # Architecture
//!
//! Each subscriber owns a bounded `mpsc` channel. Publishing snapshots the
//! registry, releases the lock, then `try_send`s into every channel, so a
//! subscriber registering or leaving mid-publish never blocks delivery.
//!
//! - A full channel drops that update for that subscriber only.
//! - A closed channel (receiver dropped) is pruned from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::config::BroadcastSettings;
use super::metrics;
use crate::domain::price::PriceUpdate;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for subscriber channels.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Buffered updates per subscriber before updates are dropped.
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1_024,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            subscriber_capacity: settings.subscriber_capacity,
        }
    }
}

// =============================================================================
// Subscriber Identity
// =============================================================================

/// Opaque identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Outcome of publishing one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers that received the update.
    pub delivered: usize,
    /// Subscribers whose buffer was full.
    pub dropped: usize,
    /// Subscribers pruned because their receiver was gone.
    pub pruned: usize,
}

/// Registry of price subscribers.
///
/// # Example
///
/// ```rust
/// use price_stream_client::PriceUpdate;
/// use price_stream_client::infrastructure::broadcast::{BroadcastConfig, PriceBroadcaster};
///
/// let broadcaster = PriceBroadcaster::new(BroadcastConfig::default());
/// let (_id, mut rx) = broadcaster.subscribe();
///
/// let report = broadcaster.publish(&PriceUpdate::now("AAPL", 185.5));
/// assert_eq!(report.delivered, 1);
/// assert_eq!(rx.try_recv().unwrap().symbol, "AAPL");
/// ```
#[derive(Debug)]
pub struct PriceBroadcaster {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<PriceUpdate>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Default for PriceBroadcaster {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

impl PriceBroadcaster {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            capacity: config.subscriber_capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. Never blocks; no history is replayed.
    #[must_use]
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<PriceUpdate>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        metrics::set_subscribers(count);
        tracing::debug!(subscriber = %id, subscribers = count, "Subscriber registered");

        (id, rx)
    }

    /// Remove a subscriber, ending its stream.
    ///
    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            metrics::set_subscribers(count);
            tracing::debug!(subscriber = %id, subscribers = count, "Subscriber removed");
        }
        removed
    }

    /// Deliver one update to every subscriber registered right now.
    pub fn publish(&self, update: &PriceUpdate) -> DeliveryReport {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<PriceUpdate>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        for (id, tx) in snapshot {
            match tx.try_send(update.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::warn!(
                        subscriber = %id,
                        symbol = %update.symbol,
                        "Subscriber lagging, update dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let count = {
                let mut subscribers = self.subscribers.write();
                for id in &closed {
                    subscribers.remove(id);
                }
                subscribers.len()
            };
            report.pruned = closed.len();
            metrics::set_subscribers(count);
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        metrics::record_updates_delivered(report.delivered as u64);
        if report.dropped > 0 {
            metrics::record_updates_dropped(report.dropped as u64);
        }

        report
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Get delivery statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Updates delivered across all subscribers.
    pub delivered: u64,
    /// Updates dropped for lagging subscribers.
    pub dropped: u64,
}

// =============================================================================
// Tests
// =============================================================================
