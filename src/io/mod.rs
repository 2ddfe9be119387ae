//! IO modules - external system interfaces
//!
//! - `api` - routing provider contract and provider selection
//! - `google` - Google Distance Matrix client
//! - `here` - HERE Routing v8 client (with geocoding for addresses)
//! - `statestream` - MQTT statestream ingest into the state store
//! - `mqtt_egress` - MQTT publisher for sensor state
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod api;
pub mod google;
pub mod here;
pub mod mqtt_egress;
pub mod prometheus;
pub mod statestream;

pub use api::{ApiClient, ApiError, TravelTimeApi};
pub use mqtt_egress::SensorPublisher;
pub use prometheus::JourneyGauge;
