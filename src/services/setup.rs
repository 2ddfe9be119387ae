//! Journey setup
//!
//! Turns each `[[journeys]]` entry into a routing client, a coordinator and
//! a sensor, and spawns their tasks. A journey that fails setup is logged
//! and skipped; the others keep going.

use crate::infra::config::{Config, JourneyConfig};
use crate::infra::metrics::Metrics;
use crate::infra::state_store::StateStore;
use crate::io::api::{ApiClient, ApiError, TravelTimeApi};
use crate::services::coordinator::{CoordinatorSettings, CoordinatorState, JourneyCoordinator};
use crate::services::sensor::{JourneyTimeSensor, SensorSnapshot};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("could not create routing client: {0}")]
    Client(#[source] ApiError),
    /// Credential check failed. The cause is deliberately not surfaced.
    #[error("invalid API credentials")]
    Auth,
}

/// Check that the provider accepts the configured token
pub async fn validate_credentials<C: TravelTimeApi>(client: &C) -> Result<(), SetupError> {
    client.test_credentials().await.map_err(|e| {
        debug!(provider = %client.provider(), error = %e, "credential_check_failed");
        SetupError::Auth
    })
}

pub fn coordinator_settings(journey: &JourneyConfig, config: &Config) -> CoordinatorSettings {
    CoordinatorSettings {
        update_interval: config.scan_interval(),
        request_refresh_cooldown: config.request_refresh_cooldown(),
        ..CoordinatorSettings::new(&journey.name, &journey.origin, &journey.destination)
    }
}

/// Coordinator and sensor for one journey, ready to spawn
pub struct JourneyEntry<C> {
    pub id: String,
    pub coordinator: JourneyCoordinator<C>,
    pub sensor: JourneyTimeSensor,
}

/// Running journey tasks
pub struct JourneyHandle {
    pub id: String,
    pub name: String,
    pub updates: watch::Receiver<CoordinatorState>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl<C: TravelTimeApi + 'static> JourneyEntry<C> {
    pub async fn setup(
        journey: &JourneyConfig,
        client: Arc<C>,
        config: &Config,
        store: Arc<StateStore>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, SetupError> {
        if config.validate_credentials() {
            validate_credentials(client.as_ref()).await?;
        }

        let settings = coordinator_settings(journey, config);
        let coordinator = JourneyCoordinator::new(settings, client, store.clone(), metrics);
        let sensor = JourneyTimeSensor::new(&journey.id, &journey.name, &journey.destination, store);
        Ok(Self { id: journey.id.clone(), coordinator, sensor })
    }

    pub fn spawn(
        self,
        egress: Option<mpsc::Sender<SensorSnapshot>>,
        shutdown: watch::Receiver<bool>,
    ) -> JourneyHandle {
        let name = self.coordinator.name().to_string();
        let updates = self.coordinator.subscribe();

        let sensor_task = tokio::spawn(self.sensor.run(updates.clone(), egress, shutdown.clone()));
        let coordinator_task = tokio::spawn(self.coordinator.run(shutdown));

        JourneyHandle { id: self.id, name, updates, tasks: vec![coordinator_task, sensor_task] }
    }
}

/// Set up and spawn every configured journey
pub async fn start_journeys(
    config: &Config,
    store: Arc<StateStore>,
    metrics: Arc<Metrics>,
    egress: Option<mpsc::Sender<SensorSnapshot>>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JourneyHandle> {
    let mut handles = Vec::with_capacity(config.journeys().len());

    for journey in config.journeys() {
        let client = match ApiClient::new(journey.selected_api, &journey.api_token, config.api_timeout()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!(journey = %journey.id, error = %e, "journey_setup_failed");
                continue;
            }
        };

        match JourneyEntry::setup(journey, client, config, store.clone(), metrics.clone()).await {
            Ok(entry) => {
                info!(journey = %journey.id, provider = %journey.selected_api, "journey_setup_complete");
                handles.push(entry.spawn(egress.clone(), shutdown.clone()));
            }
            Err(e) => {
                error!(journey = %journey.id, error = %e, "journey_setup_failed");
            }
        }
    }

    handles
}

/// Validate every journey's credentials; returns the ids that failed
pub async fn check_credentials(config: &Config) -> Vec<String> {
    let mut failed = Vec::new();

    for journey in config.journeys() {
        let result = match ApiClient::new(journey.selected_api, &journey.api_token, config.api_timeout()) {
            Ok(client) => validate_credentials(&client).await,
            Err(e) => Err(SetupError::Client(e)),
        };
        match result {
            Ok(()) => info!(journey = %journey.id, provider = %journey.selected_api, "credentials_valid"),
            Err(e) => {
                error!(journey = %journey.id, provider = %journey.selected_api, error = %e, "credentials_invalid");
                failed.push(journey.id.clone());
            }
        }
    }

    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journey::TravelTimeData;
    use crate::infra::config::{Provider, ZoneConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubApi {
        valid: bool,
        calls: AtomicUsize,
    }

    impl StubApi {
        fn new(valid: bool) -> Self {
            Self { valid, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl TravelTimeApi for StubApi {
        async fn travel_time(&self, _: &str, _: &str) -> Result<TravelTimeData, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TravelTimeData {
                origin: None,
                destination: None,
                travel_time_secs: 1200,
                travel_time_traffic_secs: 1500,
                distance_m: 20_000,
            })
        }

        async fn test_credentials(&self) -> Result<(), ApiError> {
            if self.valid {
                Ok(())
            } else {
                Err(ApiError::Status {
                    provider: Provider::Here,
                    status: "401".to_string(),
                    message: Some("apiKey invalid".to_string()),
                })
            }
        }

        fn provider(&self) -> Provider {
            Provider::Here
        }
    }

    const CONFIG: &str = r#"
[coordinator]
scan_interval_secs = 120
request_refresh_cooldown_secs = 600

[[zones]]
name = "Home"
latitude = 51.5
longitude = -0.12

[[zones]]
name = "Work"
latitude = 51.52
longitude = -0.08

[[journeys]]
name = "Commute"
origin = "zone.home"
destination = "zone.work"
api_token = "token"
selected_api = "HERE"
"#;

    fn config() -> Config {
        Config::from_toml_str(CONFIG, "test").unwrap()
    }

    fn store(config: &Config) -> Arc<StateStore> {
        let store = Arc::new(StateStore::new());
        config.zones().iter().for_each(|zone: &ZoneConfig| store.add_zone(zone));
        store
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_generic() {
        let err = validate_credentials(&StubApi::new(false)).await.unwrap_err();
        assert!(matches!(err, SetupError::Auth));
        assert_eq!(err.to_string(), "invalid API credentials");
    }

    #[test]
    fn test_settings_follow_config() {
        let config = config();
        let settings = coordinator_settings(&config.journeys()[0], &config);
        assert_eq!(settings.name, "Commute");
        assert_eq!(settings.origin, "zone.home");
        assert_eq!(settings.update_interval, Duration::from_secs(120));
        assert_eq!(settings.request_refresh_cooldown, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_setup_rejects_bad_token() {
        let config = config();
        let result = JourneyEntry::setup(
            &config.journeys()[0],
            Arc::new(StubApi::new(false)),
            &config,
            store(&config),
            Arc::new(Metrics::new()),
        )
        .await;
        assert!(matches!(result, Err(SetupError::Auth)));
    }

    #[tokio::test]
    async fn test_spawned_journey_publishes() {
        let config = config();
        let api = Arc::new(StubApi::new(true));
        let entry = JourneyEntry::setup(
            &config.journeys()[0],
            api.clone(),
            &config,
            store(&config),
            Arc::new(Metrics::new()),
        )
        .await
        .unwrap();
        assert_eq!(entry.id, "commute");

        let (egress_tx, mut egress_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = entry.spawn(Some(egress_tx), shutdown_rx);
        assert_eq!(handle.name, "Commute");

        let snapshot = egress_rx.recv().await.unwrap();
        assert_eq!(snapshot.unique_id, "commute-time");
        assert_eq!(snapshot.state, Some(25));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        for task in handle.tasks {
            task.await.unwrap();
        }
    }
}
