//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// WebSocket transport, frame codec and network reachability adapters.
pub mod websocket;

/// Fan-out of decoded price updates to subscribers.
pub mod broadcast;

/// Default tracked symbol catalog.
pub mod catalog;

/// Configuration loading and validation.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
