//! Price Types
//!
//! The wire-level price update, the tracked-item projection supplied by the
//! presentation layer, and the validity rules shared by the send and receive
//! paths.
//!
//! # Wire Format
//!
//! ```json
//! {"symbol":"AAPL","price":185.5,"timestamp":"2025-08-22T10:15:30.123Z"}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Price validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriceError {
    /// Symbol is empty.
    #[error("symbol is empty")]
    EmptySymbol,

    /// Symbol contains characters other than letters and `.`.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Price is NaN or infinite.
    #[error("price is not finite")]
    NotFinite,

    /// Price lies outside the configured bounds.
    #[error("price {price} outside [{min}, {max}]")]
    OutOfBounds {
        /// Rejected price.
        price: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Bounds are not finite, not positive, or not ascending.
    #[error("invalid price bounds [{min}, {max}]")]
    InvalidBounds {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Timestamp is not ISO-8601.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

// =============================================================================
// Price Bounds
// =============================================================================

/// Inclusive price range accepted on the wire and produced by the generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBounds {
    min: f64,
    max: f64,
}

impl Default for PriceBounds {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 10_000.0,
        }
    }
}

impl PriceBounds {
    /// Create bounds, rejecting non-finite, non-positive or inverted ranges.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::InvalidBounds` when `0 < min < max` does not hold.
    pub fn new(min: f64, max: f64) -> Result<Self, PriceError> {
        if !min.is_finite() || !max.is_finite() || min <= 0.0 || min >= max {
            return Err(PriceError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Check a price against the bounds.
    ///
    /// # Errors
    ///
    /// Returns `NotFinite` or `OutOfBounds`.
    pub fn check(&self, price: f64) -> Result<(), PriceError> {
        if !price.is_finite() {
            return Err(PriceError::NotFinite);
        }
        if price < self.min || price > self.max {
            return Err(PriceError::OutOfBounds {
                price,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Clamp a price into the bounds. Non-finite input maps to the nearest
    /// bound (NaN maps to `min`).
    #[must_use]
    pub fn clamp(&self, price: f64) -> f64 {
        if price.is_nan() {
            return self.min;
        }
        price.clamp(self.min, self.max)
    }
}

// =============================================================================
// Symbol Validation
// =============================================================================

/// Validate a ticker symbol: non-empty, letters and `.` only (e.g. `BRK.B`).
///
/// # Errors
///
/// Returns `EmptySymbol` or `InvalidSymbol`.
pub fn validate_symbol(symbol: &str) -> Result<(), PriceError> {
    if symbol.is_empty() {
        return Err(PriceError::EmptySymbol);
    }
    if !symbol.chars().all(|c| c.is_alphabetic() || c == '.') {
        return Err(PriceError::InvalidSymbol(symbol.to_string()));
    }
    Ok(())
}

// =============================================================================
// Price Update
// =============================================================================

/// A single price observation, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceUpdate {
    /// Ticker symbol.
    pub symbol: String,
    /// Price.
    pub price: f64,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

impl PriceUpdate {
    /// Create an update with an explicit timestamp.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp: timestamp.into(),
        }
    }

    /// Create an update stamped with the current UTC time.
    #[must_use]
    pub fn now(symbol: impl Into<String>, price: f64) -> Self {
        Self::new(
            symbol,
            price,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }

    /// Parse the timestamp.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTimestamp` if the string is not RFC 3339 / ISO-8601.
    pub fn parsed_timestamp(&self) -> Result<DateTime<Utc>, PriceError> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| PriceError::InvalidTimestamp(format!("{}: {e}", self.timestamp)))
    }

    /// Validate symbol, price and timestamp.
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails.
    pub fn validate(&self, bounds: &PriceBounds) -> Result<(), PriceError> {
        validate_symbol(&self.symbol)?;
        bounds.check(self.price)?;
        self.parsed_timestamp()?;
        Ok(())
    }
}

// =============================================================================
// Tracked Items
// =============================================================================

/// Direction of the most recent price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceDirection {
    /// Price went up.
    Up,
    /// Price went down.
    Down,
    /// Price unchanged.
    #[default]
    Neutral,
}

impl PriceDirection {
    /// Direction from `previous` to `current`.
    #[must_use]
    pub fn between(previous: f64, current: f64) -> Self {
        if current > previous {
            Self::Up
        } else if current < previous {
            Self::Down
        } else {
            Self::Neutral
        }
    }

    /// Arrow glyph for log output.
    #[must_use]
    pub const fn arrow(self) -> &'static str {
        match self {
            Self::Up => "↑",
            Self::Down => "↓",
            Self::Neutral => "→",
        }
    }
}

/// Movement recorded when an update is applied to a tracked item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceChange {
    /// Price before the update.
    pub previous: f64,
    /// Price after the update.
    pub current: f64,
    /// Direction of the move.
    pub direction: PriceDirection,
}

impl PriceChange {
    /// Absolute change.
    #[must_use]
    pub fn amount(&self) -> f64 {
        self.current - self.previous
    }

    /// Percentage change relative to the previous price (0 when previous is 0).
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.previous > 0.0 {
            self.amount() / self.previous * 100.0
        } else {
            0.0
        }
    }
}

/// Minimal projection of a symbol the presentation layer tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedItem {
    /// Ticker symbol.
    pub symbol: String,
    /// Last known price.
    pub current_price: f64,
}

impl TrackedItem {
    /// Create a tracked item.
    #[must_use]
    pub fn new(symbol: impl Into<String>, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            current_price,
        }
    }

    /// Apply an update for this symbol and report the move.
    ///
    /// Returns `None` if the update is for another symbol.
    pub fn apply(&mut self, update: &PriceUpdate) -> Option<PriceChange> {
        if update.symbol != self.symbol {
            return None;
        }
        let previous = self.current_price;
        self.current_price = update.price;
        Some(PriceChange {
            previous,
            current: update.price,
            direction: PriceDirection::between(previous, update.price),
        })
    }
}
