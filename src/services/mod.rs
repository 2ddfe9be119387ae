//! Services - journey logic
//!
//! - `resolver` - turns zone names, entities and addresses into locations
//! - `debouncer` - cooldown-based refresh debouncer
//! - `coordinator` - per-journey refresh scheduling and snapshots
//! - `sensor` - travel time sensor built from coordinator snapshots
//! - `setup` - builds and spawns a coordinator and sensor per journey

pub mod coordinator;
pub mod debouncer;
pub mod resolver;
pub mod sensor;
pub mod setup;

pub use coordinator::{CoordinatorSettings, CoordinatorState, JourneyCoordinator, UpdateFailed};
pub use resolver::{find_coordinates, FindCoordinatesError};
pub use sensor::{JourneyTimeSensor, SensorSnapshot};
pub use setup::{check_credentials, start_journeys, JourneyHandle, SetupError};
