//! Tracked Item Source Port
//!
//! Supplies the symbols the presentation layer is tracking.

use async_trait::async_trait;

use crate::domain::price::TrackedItem;

/// Source of tracked items.
#[async_trait]
pub trait TrackedItemSource: Send + Sync {
    /// All tracked items with their last known prices.
    async fn tracked_items(&self) -> Vec<TrackedItem>;

    /// Look up one item by symbol, case-insensitively.
    async fn find(&self, symbol: &str) -> Option<TrackedItem> {
        self.tracked_items()
            .await
            .into_iter()
            .find(|item| item.symbol.eq_ignore_ascii_case(symbol))
    }
}
