//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames, decode failures, outbound sends
//! - **Delivery**: updates delivered to and dropped for subscribers
//! - **Connection**: current state, errors by kind, reconnect attempts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::{ConnectionState, ErrorKind};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Inbound
    describe_counter!(
        "price_stream_frames_received_total",
        "Total frames received from the feed"
    );
    describe_counter!(
        "price_stream_decode_failures_total",
        "Total inbound frames skipped because they failed to decode"
    );

    // Delivery
    describe_counter!(
        "price_stream_updates_delivered_total",
        "Total price updates delivered to subscribers"
    );
    describe_counter!(
        "price_stream_updates_dropped_total",
        "Total price updates dropped for slow subscribers"
    );
    describe_gauge!(
        "price_stream_subscribers",
        "Number of active price subscribers"
    );

    // Outbound
    describe_counter!(
        "price_stream_sends_total",
        "Total price updates written to the feed"
    );
    describe_counter!(
        "price_stream_send_failures_total",
        "Total price updates that failed to send"
    );

    // Connection
    describe_gauge!(
        "price_stream_connection_state",
        "Current connection state (0=disconnected 1=connecting 2=connected 3=reconnecting 4=failed)"
    );
    describe_counter!(
        "price_stream_connection_errors_total",
        "Total connection failures by kind"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Total reconnection attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn state_code(state: &ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
        ConnectionState::Failed(_) => 4.0,
    }
}

/// Record one frame read from the transport.
pub fn record_frame_received() {
    counter!("price_stream_frames_received_total").increment(1);
}

/// Record an inbound frame that failed to decode or validate.
pub fn record_decode_failure() {
    counter!("price_stream_decode_failures_total").increment(1);
}

/// Record updates handed to subscribers.
pub fn record_updates_delivered(count: u64) {
    counter!("price_stream_updates_delivered_total").increment(count);
}

/// Record updates dropped because a subscriber's buffer was full.
pub fn record_updates_dropped(count: u64) {
    counter!("price_stream_updates_dropped_total").increment(count);
}

/// Update the active subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("price_stream_subscribers").set(count as f64);
}

/// Record the outcome of one outbound send.
pub fn record_send(result: &Result<(), ErrorKind>) {
    counter!("price_stream_sends_total").increment(1);
    if let Err(error) = result {
        counter!(
            "price_stream_send_failures_total",
            "error_type" => error.label()
        )
        .increment(1);
    }
}

/// Publish the current connection state.
pub fn set_connection_state(state: &ConnectionState) {
    gauge!("price_stream_connection_state").set(state_code(state));
}

/// Record a transition into `Failed`.
pub fn record_connection_error(error: &ErrorKind) {
    counter!(
        "price_stream_connection_errors_total",
        "error_type" => error.label()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("price_stream_reconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
