//! Core types shared across the bus kernel.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{BusConfig, Config, NetworkConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{InformationId, NodeId, SessionId};
