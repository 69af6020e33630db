//! Reachability Port (Driven Port)
//!
//! Boolean signal for whether the network path is currently usable.

use tokio::sync::watch;

/// Network availability signal.
///
/// Sampled before each connection attempt and watched while connected.
pub trait Reachability: Send + Sync {
    /// Current availability.
    fn is_available(&self) -> bool;

    /// Receiver that observes every availability change.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
