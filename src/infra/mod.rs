//! Infrastructure - configuration, metrics, and the entity state store
//!
//! - `config` - application configuration (TOML loading, defaults)
//! - `metrics` - lock-free metrics collection
//! - `state_store` - entity states with change notifications

pub mod config;
pub mod metrics;
pub mod state_store;

pub use config::{Config, JourneyConfig, Provider};
pub use metrics::Metrics;
pub use state_store::StateStore;
