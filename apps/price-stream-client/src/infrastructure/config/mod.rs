//! Configuration Module
//!
//! Configuration loading for the price stream client.

mod settings;

pub use settings::{
    BroadcastSettings, ClientConfig, ConfigError, ConnectionSettings, GeneratorSettings,
    ServerSettings,
};
