//! Price Sink Port
//!
//! Outbound destination for synthesized price updates.

use async_trait::async_trait;

use crate::domain::connection::ErrorKind;
use crate::domain::price::PriceUpdate;

/// Publishes price updates to the feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSink: Send + Sync {
    /// Check if updates can currently be published.
    fn is_connected(&self) -> bool;

    /// Validate, encode and write one update.
    async fn publish(&self, update: PriceUpdate) -> Result<(), ErrorKind>;
}
