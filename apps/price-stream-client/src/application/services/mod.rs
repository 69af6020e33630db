//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RetryPolicy`: whether and when to retry a failed connection
//! - `ConnectionStateMachine`: owns the connection and its transitions
//! - `StreamingClient`: connect, send, subscribe facade
//! - `PriceGenerator`: periodic synthetic price publisher

mod connection;
mod generator;
mod retry_policy;
mod streaming;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{ConnectionConfig, ConnectionStateMachine, DEFAULT_URL};
pub use generator::{
    GeneratorConfig, GeneratorError, GeneratorState, PriceGenerator, TickReport, advance_prices,
    next_price, run_tick,
};
pub use retry_policy::{RetryConfig, RetryPolicy};
pub use streaming::{PriceStream, StreamingClient, StreamingConfig, SubscriptionHandle};
