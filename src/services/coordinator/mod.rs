//! Journey update coordination
//!
//! The coordinator owns one journey's refresh schedule:
//! - a fixed interval refresh (default 5 minutes)
//! - origin state changes: forced refresh, or a debounced one when only
//!   attributes changed
//! - destination state changes: always a forced refresh
//!
//! Each refresh resolves both locations, asks the routing client for the
//! travel time and publishes a new `CoordinatorState` on a watch channel.
//! Failures keep the last good snapshot and flip `last_update_success`.


use crate::domain::journey::{JourneyData, TravelTimeData};
use crate::domain::types::StateChanged;
use crate::infra::metrics::Metrics;
use crate::infra::state_store::StateStore;
use crate::io::api::{ApiError, TravelTimeApi};
use crate::services::debouncer::{deadline_after, Debouncer};
use crate::services::resolver::{find_coordinates, FindCoordinatesError};
use chrono::{DateTime, Local};
use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REQUEST_REFRESH_COOLDOWN: Duration = Duration::from_secs(30 * 60);
/// Floor for the interval refresh
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Why an update cycle produced no snapshot
#[derive(Debug, thiserror::Error)]
pub enum UpdateFailed {
    #[error("could not find origin coords: {0}")]
    Origin(#[source] FindCoordinatesError),
    #[error("could not find destination coords: {0}")]
    Destination(#[source] FindCoordinatesError),
    #[error("travel time request failed: {0}")]
    Api(#[source] ApiError),
}

/// What the coordinator publishes after every update cycle
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Last good snapshot, kept across failures
    pub data: Option<Arc<JourneyData>>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
    /// When the last update cycle finished
    pub last_refresh: Option<DateTime<Local>>,
}

/// Per-journey coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub update_interval: Duration,
    pub request_refresh_cooldown: Duration,
}

impl CoordinatorSettings {
    pub fn new(name: &str, origin: &str, destination: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            update_interval: DEFAULT_SCAN_INTERVAL,
            request_refresh_cooldown: DEFAULT_REQUEST_REFRESH_COOLDOWN,
        }
    }
}

pub struct JourneyCoordinator<C> {
    settings: CoordinatorSettings,
    client: Arc<C>,
    store: Arc<StateStore>,
    metrics: Arc<Metrics>,
    debouncer: Debouncer,
    /// Next interval refresh
    next_refresh: Instant,
    state_tx: watch::Sender<CoordinatorState>,
}

impl<C: TravelTimeApi> JourneyCoordinator<C> {
    pub fn new(
        mut settings: CoordinatorSettings,
        client: Arc<C>,
        store: Arc<StateStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        settings.update_interval = settings.update_interval.max(MIN_UPDATE_INTERVAL);
        let (state_tx, _) = watch::channel(CoordinatorState::default());
        let debouncer = Debouncer::new(settings.request_refresh_cooldown, true);
        Self {
            next_refresh: deadline_after(settings.update_interval),
            settings,
            client,
            store,
            metrics,
            debouncer,
            state_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Subscribe to published states
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state_tx.subscribe()
    }

    /// Latest published state
    pub fn state(&self) -> CoordinatorState {
        self.state_tx.borrow().clone()
    }

    /// Latest good snapshot
    pub fn data(&self) -> Option<Arc<JourneyData>> {
        self.state_tx.borrow().data.clone()
    }

    /// Run one update cycle without publishing anything
    pub async fn update(&self) -> Result<JourneyData, UpdateFailed> {
        let origin =
            find_coordinates(&self.store, &self.settings.origin).map_err(UpdateFailed::Origin)?;
        let destination = find_coordinates(&self.store, &self.settings.destination)
            .map_err(UpdateFailed::Destination)?;

        if origin.coords == destination.coords {
            info!(journey = %self.settings.name, coords = %origin.coords, "origin_equals_destination");
            self.metrics.record_stationary();
            return Ok(JourneyData { origin, destination, travel_time: TravelTimeData::stationary() });
        }

        let start = StdInstant::now();
        let result = self.client.travel_time(&origin.coords, &destination.coords).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_api_call(latency_ms, result.is_ok());

        let travel_time = result.map_err(UpdateFailed::Api)?;
        debug!(
            journey = %self.settings.name,
            provider = %self.client.provider(),
            latency_ms = %latency_ms,
            "travel_time_fetched"
        );
        Ok(JourneyData { origin, destination, travel_time })
    }

    /// Forced refresh: drops any pending debounced request and runs now
    pub async fn refresh(&mut self) {
        self.debouncer.cancel();
        self.execute().await;
    }

    /// Debounced refresh: runs now unless a cooldown window is open
    pub async fn request_refresh(&mut self) {
        let run_now = self.debouncer.call();
        self.metrics.record_debounced_request(!run_now);
        if run_now {
            self.execute().await;
            self.debouncer.arm();
        } else {
            debug!(journey = %self.settings.name, "refresh_request_deferred");
        }
    }

    /// Route a state change to the right kind of refresh
    pub async fn handle_state_change(&mut self, event: &StateChanged) {
        if event.entity_id == self.settings.origin {
            if event.is_attribute_only() {
                debug!(journey = %self.settings.name, "origin_updated_without_state_change");
                self.request_refresh().await;
            } else {
                debug!(journey = %self.settings.name, "origin_state_changed");
                self.metrics.record_forced_refresh();
                self.refresh().await;
            }
        } else if event.entity_id == self.settings.destination {
            debug!(journey = %self.settings.name, "destination_state_changed");
            self.metrics.record_forced_refresh();
            self.refresh().await;
        }
    }

    /// The debounce window ended
    async fn on_debounce_timer(&mut self) {
        if self.debouncer.on_timer() {
            debug!(journey = %self.settings.name, "running_deferred_refresh");
            self.execute().await;
            self.debouncer.arm();
        }
    }

    async fn execute(&mut self) {
        self.metrics.record_refresh();
        let result = self.update().await;
        self.next_refresh = deadline_after(self.settings.update_interval);

        let previous_success = self.state_tx.borrow().last_update_success;
        let has_previous = self.state_tx.borrow().last_refresh.is_some();

        match result {
            Ok(data) => {
                if has_previous && !previous_success {
                    info!(journey = %self.settings.name, "journey_update_recovered");
                }
                info!(
                    journey = %self.settings.name,
                    travel_time_min = %data.travel_time.travel_time_min(),
                    traffic_min = %data.travel_time.travel_time_traffic_min(),
                    distance_m = %data.travel_time.distance_m,
                    "journey_updated"
                );
                self.state_tx.send_replace(CoordinatorState {
                    data: Some(Arc::new(data)),
                    last_update_success: true,
                    last_error: None,
                    last_refresh: Some(Local::now()),
                });
            }
            Err(e) => {
                self.metrics.record_update_failure();
                if failure_is_error(&self.state_tx.borrow(), &e) {
                    error!(journey = %self.settings.name, error = %e, "journey_update_failed");
                } else {
                    debug!(journey = %self.settings.name, error = %e, "journey_update_failed");
                }
                self.state_tx.send_modify(|state| {
                    state.last_update_success = false;
                    state.last_error = Some(e.to_string());
                    state.last_refresh = Some(Local::now());
                });
            }
        }
    }

    /// Run until shutdown: first refresh immediately, then interval,
    /// debounce and state-change driven refreshes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.store.subscribe();
        info!(
            journey = %self.settings.name,
            origin = %self.settings.origin,
            destination = %self.settings.destination,
            provider = %self.client.provider(),
            interval_secs = %self.settings.update_interval.as_secs(),
            "coordinator_started"
        );

        self.refresh().await;

        loop {
            let debounce_deadline = self.debouncer.deadline();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(journey = %self.settings.name, "coordinator_shutdown");
                        return;
                    }
                }
                _ = sleep_until(self.next_refresh) => {
                    self.refresh().await;
                }
                _ = sleep_until_opt(debounce_deadline) => {
                    self.on_debounce_timer().await;
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => self.handle_state_change(&event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(journey = %self.settings.name, skipped = %skipped, "state_events_lagged");
                            self.request_refresh().await;
                        }
                        Err(RecvError::Closed) => {
                            info!(journey = %self.settings.name, "state_store_closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Error-level only for the first failure after a success (or of the first
/// cycle). Unresolvable locations before any snapshot stay at debug: the
/// statestream may not have replayed them yet.
fn failure_is_error(previous: &CoordinatorState, err: &UpdateFailed) -> bool {
    let resolution = matches!(err, UpdateFailed::Origin(_) | UpdateFailed::Destination(_));
    if previous.data.is_none() && resolution {
        return false;
    }
    previous.last_update_success || previous.last_refresh.is_none()
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
