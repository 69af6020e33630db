#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream Client - Resilient Real-Time Price Feed
//!
//! Keeps a single WebSocket connection to a price feed alive, decodes the
//! JSON price updates it carries and fans them out to any number of
//! subscribers. A periodic generator publishes synthetic random-walk prices
//! for the tracked symbols through the same connection.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `connection`: Connection states and classified failures
//!   - `price`: Price updates, bounds, tracked items
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, reachability, price sink, tracked item source
//!   - `services`: Retry policy, connection state machine, streaming client,
//!     periodic generator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: `tokio-tungstenite` transport, JSON codec, TCP reachability probe
//!   - `broadcast`: Bounded per-subscriber fan-out
//!   - `catalog`: Default tracked symbols
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                       +--------------------+
//! PriceGenerator ------>|                    |---- send ----> feed (WS)
//!   (every tick)        |  StreamingClient   |
//!                       |  + state machine   |<--- frames --- feed (WS)
//!                       +---------+----------+
//!                                 | decode + validate
//!                                 v
//!                       +--------------------+
//!                       |  PriceBroadcaster  |--> Subscriber 1
//!                       |                    |--> Subscriber N
//!                       +--------------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Connection and price types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ErrorKind};
pub use domain::price::{
    PriceBounds, PriceChange, PriceDirection, PriceError, PriceUpdate, TrackedItem,
};

// Ports
pub use application::ports::{PriceSink, Reachability, TrackedItemSource, Transport, TransportFactory};

// Services
pub use application::services::{
    ConnectionConfig, ConnectionStateMachine, GeneratorConfig, GeneratorError, GeneratorState,
    PriceGenerator, PriceStream, RetryConfig, RetryPolicy, StreamingClient, StreamingConfig,
    SubscriptionHandle,
};

// WebSocket adapters
pub use infrastructure::websocket::{
    ManualReachability, PriceCodec, ProbeConfig, ProbeReachability, WebSocketConfig,
    WebSocketTransportFactory,
};

// Broadcast
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastStats, PriceBroadcaster};

// Catalog
pub use infrastructure::catalog::{SAMPLE_SYMBOLS, StaticItemSource};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ClientConfig, ConfigError, ConnectionSettings, GeneratorSettings,
    ServerSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
