//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport` / `TransportFactory`: raw bidirectional frame I/O
//! - `Reachability`: network-path availability signal
//!
//! ## Driver Ports (Inbound)
//!
//! - `PriceSink`: where synthesized price updates are published
//! - `TrackedItemSource`: the symbols the presentation layer tracks

mod item_source_port;
mod price_sink_port;
mod reachability_port;
mod transport_port;

pub use item_source_port::TrackedItemSource;
#[cfg(test)]
pub use price_sink_port::MockPriceSink;
pub use price_sink_port::PriceSink;
pub use reachability_port::Reachability;
pub use transport_port::{Frame, FrameStream, Transport, TransportFactory};
