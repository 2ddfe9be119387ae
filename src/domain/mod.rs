//! Domain models - entity states and journey snapshots
//!
//! This module contains the canonical data types used throughout the system:
//! - `EntityState` / `StateChanged` - tracked entities and their change events
//! - `LocationData` - a resolved origin or destination
//! - `TravelTimeData` - a routing provider's measurement and derived delay values
//! - `JourneyData` - the snapshot produced by one update cycle

pub mod journey;
pub mod types;

pub use journey::{JourneyData, LocationData, TravelTimeData};
pub use types::{EntityState, StateChanged};
