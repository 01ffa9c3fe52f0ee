//! faasgate-core — shared types and configuration for the gateway.
//!
//! Holds the function identity and status model, the environment-driven
//! gateway configuration, and the service-to-service credential reader.
//! Everything here is plain data; the I/O lives in the crates that
//! consume it.

pub mod auth;
pub mod config;
pub mod types;

pub use auth::BasicAuthCredentials;
pub use config::{ConfigError, GatewayConfig, NatsConfig};
pub use types::{FunctionStatus, FunctionTarget};
