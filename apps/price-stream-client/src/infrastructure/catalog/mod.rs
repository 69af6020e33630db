//! Tracked Symbol Catalog
//!
//! In-memory `TrackedItemSource` seeded with the default sample symbols.
//! Inbound updates can be folded back in with [`StaticItemSource::record`],
//! which keeps the last known price per symbol and reports the move.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::TrackedItemSource;
use crate::domain::price::{PriceChange, PriceUpdate, TrackedItem};

/// Default symbols and their starting prices.
pub const SAMPLE_SYMBOLS: [(&str, f64); 25] = [
    ("NVDA", 875.20),
    ("TMO", 568.90),
    ("COST", 785.60),
    ("ADBE", 578.25),
    ("UNH", 512.40),
    ("META", 485.60),
    ("NFLX", 445.80),
    ("MA", 445.75),
    ("BRK.B", 445.30),
    ("MSFT", 420.85),
    ("HD", 385.20),
    ("CRM", 285.40),
    ("V", 275.80),
    ("TSLA", 238.75),
    ("AAPL", 185.50),
    ("ABBV", 178.90),
    ("PEP", 172.35),
    ("PG", 168.45),
    ("AMZN", 156.90),
    ("JNJ", 152.90),
    ("GOOG", 142.30),
    ("XOM", 118.75),
    ("DIS", 112.75),
    ("KO", 64.20),
    ("BAC", 42.85),
];

/// Fixed set of tracked symbols.
#[derive(Debug)]
pub struct StaticItemSource {
    items: RwLock<Vec<TrackedItem>>,
}

impl Default for StaticItemSource {
    fn default() -> Self {
        Self::new(
            SAMPLE_SYMBOLS
                .iter()
                .map(|(symbol, price)| TrackedItem::new(*symbol, *price))
                .collect(),
        )
    }
}

impl StaticItemSource {
    /// Create a source over the given items.
    #[must_use]
    pub const fn new(items: Vec<TrackedItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.items.read().len()
    }

    /// Fold an inbound update into the catalog.
    ///
    /// Returns `None` for symbols that are not tracked.
    pub fn record(&self, update: &PriceUpdate) -> Option<PriceChange> {
        self.items
            .write()
            .iter_mut()
            .find_map(|item| item.apply(update))
    }
}

#[async_trait]
impl TrackedItemSource for StaticItemSource {
    async fn tracked_items(&self) -> Vec<TrackedItem> {
        self.items.read().clone()
    }
}
