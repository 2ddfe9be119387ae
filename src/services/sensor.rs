//! Journey travel time sensor
//!
//! Presents the coordinator's latest snapshot as a number of minutes plus
//! delay and ETA attributes. Read-only: it never writes back into the
//! coordinator.

use crate::domain::journey::JourneyData;
use crate::infra::state_store::StateStore;
use crate::services::coordinator::CoordinatorState;
use chrono::{DateTime, Local, SecondsFormat, TimeDelta};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const UNIT_OF_MEASUREMENT: &str = "min";
pub const ICON: &str = "mdi:timer";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorAttributes {
    pub duration: u64,
    pub duration_in_traffic: u64,
    pub delay_minutes: i64,
    pub delay_factor: i64,
    /// Destination display name
    pub destination: String,
    /// Address reported by the routing provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<String>,
    pub eta: Option<String>,
}

/// Everything a consumer needs to present the sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub unique_id: String,
    pub object_id: String,
    pub name: String,
    pub state: Option<i64>,
    pub unit_of_measurement: &'static str,
    pub icon: &'static str,
    pub available: bool,
    pub attributes: Option<SensorAttributes>,
}

pub struct JourneyTimeSensor {
    entry_id: String,
    journey_name: String,
    /// Configured destination identifier
    destination: String,
    store: Arc<StateStore>,
}

impl JourneyTimeSensor {
    pub fn new(entry_id: &str, journey_name: &str, destination: &str, store: Arc<StateStore>) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            journey_name: journey_name.to_string(),
            destination: destination.to_string(),
            store,
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}-time", self.entry_id)
    }

    pub fn object_id(&self) -> String {
        format!("{}_travel_time", self.entry_id)
    }

    pub fn name(&self) -> String {
        format!("{} Travel Time", self.journey_name)
    }

    /// Friendly name of the destination entity, else the configured value
    pub fn destination_name(&self) -> String {
        match self.store.get(&self.destination) {
            Some(state) => state.name(),
            None => self.destination.clone(),
        }
    }

    /// Traffic-adjusted travel time in minutes
    pub fn state(data: Option<&JourneyData>) -> Option<i64> {
        data.map(|d| d.travel_time.travel_time_traffic_min())
    }

    pub fn extra_state_attributes(
        &self,
        data: &JourneyData,
        now: DateTime<Local>,
    ) -> SensorAttributes {
        let travel_time = &data.travel_time;
        let eta = (travel_time.travel_time_traffic_secs > 0).then(|| {
            let eta = now + TimeDelta::seconds(travel_time.travel_time_traffic_secs as i64);
            eta.to_rfc3339_opts(SecondsFormat::Secs, false)
        });

        SensorAttributes {
            duration: travel_time.travel_time_secs,
            duration_in_traffic: travel_time.travel_time_traffic_secs,
            delay_minutes: travel_time.delay_min(),
            delay_factor: travel_time.delay_factor(),
            destination: self.destination_name(),
            destination_address: travel_time.destination.clone(),
            eta,
        }
    }

    pub fn snapshot(&self, coordinator: &CoordinatorState, now: DateTime<Local>) -> SensorSnapshot {
        let data = coordinator.data.as_deref();
        SensorSnapshot {
            unique_id: self.unique_id(),
            object_id: self.object_id(),
            name: self.name(),
            state: Self::state(data),
            unit_of_measurement: UNIT_OF_MEASUREMENT,
            icon: ICON,
            available: coordinator.last_update_success,
            attributes: data.map(|d| self.extra_state_attributes(d, now)),
        }
    }

    /// Forward a snapshot for every coordinator update until shutdown
    pub async fn run(
        self,
        mut updates: watch::Receiver<CoordinatorState>,
        egress: Option<mpsc::Sender<SensorSnapshot>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(sensor = %self.name(), unique_id = %self.unique_id(), "sensor_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(sensor = %self.name(), "sensor_shutdown");
                        return;
                    }
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        debug!(sensor = %self.name(), "coordinator_gone");
                        return;
                    }
                    let state = updates.borrow_and_update().clone();
                    let snapshot = self.snapshot(&state, Local::now());
                    info!(
                        sensor = %snapshot.name,
                        state = ?snapshot.state,
                        available = %snapshot.available,
                        "sensor_state"
                    );
                    if let Some(ref tx) = egress {
                        if let Err(e) = tx.try_send(snapshot) {
                            warn!(sensor = %self.name(), error = %e, "sensor_egress_dropped");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journey::{LocationData, TravelTimeData};
    use crate::domain::types::{EntityState, ATTR_FRIENDLY_NAME};
    use chrono::TimeZone;

    fn journey(secs: u64, traffic_secs: u64) -> JourneyData {
        JourneyData {
            origin: LocationData::named("Home", "51.5,-0.12"),
            destination: LocationData::named("Work", "51.52,-0.08"),
            travel_time: TravelTimeData {
                origin: Some("1 Home Road".to_string()),
                destination: Some("2 Work Street".to_string()),
                travel_time_secs: secs,
                travel_time_traffic_secs: traffic_secs,
                distance_m: 8000,
            },
        }
    }

    fn sensor(store: Arc<StateStore>) -> JourneyTimeSensor {
        JourneyTimeSensor::new("commute", "Commute", "zone.work", store)
    }

    #[test]
    fn test_names_and_ids() {
        let sensor = sensor(Arc::new(StateStore::new()));
        assert_eq!(sensor.name(), "Commute Travel Time");
        assert_eq!(sensor.unique_id(), "commute-time");
        assert_eq!(sensor.object_id(), "commute_travel_time");
    }

    #[test]
    fn test_destination_name() {
        let store = Arc::new(StateStore::new());
        let sensor = sensor(store.clone());
        assert_eq!(sensor.destination_name(), "zone.work");

        store.insert(EntityState::new("zone.work", "0").with_attribute(ATTR_FRIENDLY_NAME, "Office"));
        assert_eq!(sensor.destination_name(), "Office");
    }

    #[test]
    fn test_attributes() {
        let sensor = sensor(Arc::new(StateStore::new()));
        let now = Local.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();

        let attributes = sensor.extra_state_attributes(&journey(600, 900), now);
        assert_eq!(attributes.duration, 600);
        assert_eq!(attributes.duration_in_traffic, 900);
        assert_eq!(attributes.delay_minutes, 5);
        assert_eq!(attributes.delay_factor, 50);
        assert_eq!(attributes.destination_address.as_deref(), Some("2 Work Street"));

        let eta = DateTime::parse_from_rfc3339(attributes.eta.as_deref().unwrap()).unwrap();
        assert_eq!(eta, now + TimeDelta::minutes(15));
    }

    #[test]
    fn test_no_eta_for_zero_duration() {
        let sensor = sensor(Arc::new(StateStore::new()));
        let attributes = sensor.extra_state_attributes(&journey(0, 0), Local::now());
        assert_eq!(attributes.eta, None);
        assert_eq!(attributes.delay_factor, 0);
    }

    #[test]
    fn test_snapshot_without_data() {
        let sensor = sensor(Arc::new(StateStore::new()));
        let snapshot = sensor.snapshot(&CoordinatorState::default(), Local::now());
        assert_eq!(snapshot.state, None);
        assert!(snapshot.attributes.is_none());
        assert!(!snapshot.available);
    }

    #[test]
    fn test_snapshot_with_data() {
        let sensor = sensor(Arc::new(StateStore::new()));
        let state = CoordinatorState {
            data: Some(Arc::new(journey(600, 900))),
            last_update_success: true,
            last_error: None,
            last_refresh: Some(Local::now()),
        };
        let snapshot = sensor.snapshot(&state, Local::now());
        assert_eq!(snapshot.state, Some(15));
        assert_eq!(snapshot.unit_of_measurement, "min");
        assert!(snapshot.available);
        assert!(snapshot.attributes.is_some());
    }

    #[tokio::test]
    async fn test_run_forwards_snapshots() {
        let sensor = sensor(Arc::new(StateStore::new()));
        let (state_tx, state_rx) = watch::channel(CoordinatorState::default());
        let (egress_tx, mut egress_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(sensor.run(state_rx, Some(egress_tx), shutdown_rx));

        state_tx.send_replace(CoordinatorState {
            data: Some(Arc::new(journey(600, 900))),
            last_update_success: true,
            last_error: None,
            last_refresh: Some(Local::now()),
        });
        let snapshot = egress_rx.recv().await.unwrap();
        assert_eq!(snapshot.state, Some(15));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
