//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (transport, reachability, sinks).
pub mod ports;

/// Connection, streaming and generation services.
pub mod services;
