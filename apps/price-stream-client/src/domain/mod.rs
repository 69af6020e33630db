//! Domain Layer - Core streaming types.
//!
//! Connection state vocabulary and price values. Nothing here performs I/O.

/// Connection states and classified failures.
pub mod connection;

/// Price updates, tracked items and validity rules.
pub mod price;
