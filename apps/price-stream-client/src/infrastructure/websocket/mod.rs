//! WebSocket Adapters
//!
//! - `transport`: `Transport` over `tokio-tungstenite`
//! - `codec`: JSON `PriceUpdate` frames
//! - `reachability`: TCP-probe and manual network availability signals

pub mod codec;
pub mod reachability;
pub mod transport;

pub use codec::{CodecError, PriceCodec};
pub use reachability::{ManualReachability, ProbeConfig, ProbeReachability};
pub use transport::{WebSocketConfig, WebSocketTransport, WebSocketTransportFactory};
