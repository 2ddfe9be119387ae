//! In-memory entity state store with change notifications
//!
//! Holds the latest state of every entity seen on the statestream plus the
//! zones seeded from configuration. Every write that changes something is
//! broadcast as a `StateChanged` to all subscribers (coordinators).

use crate::domain::types::{
    EntityState, StateChanged, ATTR_FRIENDLY_NAME, ATTR_LATITUDE, ATTR_LONGITUDE, STATE_UNKNOWN,
};
use crate::infra::config::ZoneConfig;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast buffer; slower subscribers see `Lagged` and force a refresh
const EVENT_BUFFER: usize = 256;

const ZONE_DOMAIN: &str = "zone";

pub struct StateStore {
    states: RwLock<FxHashMap<String, EntityState>>,
    events: broadcast::Sender<StateChanged>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { states: RwLock::new(FxHashMap::default()), events }
    }

    /// Subscribe to state change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.events.subscribe()
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states.read().get(entity_id).cloned()
    }

    /// All entities of one domain (e.g. `zone`)
    pub fn all(&self, domain: &str) -> Vec<EntityState> {
        self.states.read().values().filter(|s| s.domain() == domain).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Replace an entity's state and attributes
    pub fn insert(&self, new_state: EntityState) {
        let entity_id = new_state.entity_id.clone();
        let old_state = {
            let mut states = self.states.write();
            if states.get(&entity_id) == Some(&new_state) {
                return;
            }
            states.insert(entity_id.clone(), new_state.clone())
        };
        self.notify(entity_id, old_state, Some(new_state));
    }

    /// Set the state value, keeping existing attributes
    pub fn set_state(&self, entity_id: &str, state: &str) {
        let (old_state, new_state) = {
            let mut states = self.states.write();
            let old_state = states.get(entity_id).cloned();
            if old_state.as_ref().is_some_and(|s| s.state == state) {
                return;
            }
            let entry = states
                .entry(entity_id.to_string())
                .or_insert_with(|| EntityState::new(entity_id, state));
            entry.state = state.to_string();
            (old_state, entry.clone())
        };
        self.notify(entity_id.to_string(), old_state, Some(new_state));
    }

    /// Set one attribute. Unknown entities are created in the `unknown` state.
    pub fn set_attribute(&self, entity_id: &str, key: &str, value: Value) {
        let (old_state, new_state) = {
            let mut states = self.states.write();
            let old_state = states.get(entity_id).cloned();
            if old_state.as_ref().and_then(|s| s.attributes.get(key)) == Some(&value) {
                return;
            }
            let entry = states
                .entry(entity_id.to_string())
                .or_insert_with(|| EntityState::new(entity_id, STATE_UNKNOWN));
            entry.attributes.insert(key.to_string(), value);
            (old_state, entry.clone())
        };
        self.notify(entity_id.to_string(), old_state, Some(new_state));
    }

    pub fn remove(&self, entity_id: &str) {
        let old_state = self.states.write().remove(entity_id);
        if old_state.is_some() {
            self.notify(entity_id.to_string(), old_state, None);
        }
    }

    /// Insert a configured zone as a `zone.*` entity
    pub fn add_zone(&self, zone: &ZoneConfig) {
        let state = EntityState::new(zone.entity_id(), "0")
            .with_attribute(ATTR_FRIENDLY_NAME, zone.name.as_str())
            .with_attribute(ATTR_LATITUDE, zone.latitude)
            .with_attribute(ATTR_LONGITUDE, zone.longitude)
            .with_attribute("radius", zone.radius);
        self.insert(state);
    }

    /// Coordinates of the zone whose display name is `name`
    pub fn resolve_zone(&self, name: &str) -> Option<String> {
        let states = self.states.read();
        states
            .values()
            .filter(|s| s.domain() == ZONE_DOMAIN)
            .find(|s| s.name() == name)
            .and_then(EntityState::location)
    }

    fn notify(
        &self,
        entity_id: String,
        old_state: Option<EntityState>,
        new_state: Option<EntityState>,
    ) {
        debug!(entity_id = %entity_id, "state_changed");
        // No receivers is fine: nothing is tracking this store yet
        let _ = self.events.send(StateChanged { entity_id, old_state, new_state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn home_zone() -> ZoneConfig {
        ZoneConfig {
            name: "Home".to_string(),
            id: None,
            latitude: 51.5,
            longitude: -0.12,
            radius: 50.0,
        }
    }

    #[test]
    fn test_zone_lookup_by_friendly_name() {
        let store = StateStore::new();
        store.add_zone(&home_zone());

        assert_eq!(store.resolve_zone("Home"), Some("51.5,-0.12".to_string()));
        assert_eq!(store.resolve_zone("home"), None);
        assert!(store.get("zone.home").is_some());
        assert_eq!(store.all("zone").len(), 1);
    }

    #[test]
    fn test_set_state_emits_change() {
        let store = StateStore::new();
        let mut rx = store.subscribe();

        store.set_state("device_tracker.phone", "home");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.entity_id, "device_tracker.phone");
        assert!(event.old_state.is_none());
        assert_eq!(event.new_state.unwrap().state, "home");

        store.set_state("device_tracker.phone", "not_home");
        let event = rx.try_recv().unwrap();
        assert!(!event.is_attribute_only());
    }

    #[test]
    fn test_unchanged_write_is_silent() {
        let store = StateStore::new();
        store.set_state("device_tracker.phone", "home");
        store.set_attribute("device_tracker.phone", "latitude", Value::from(1.0));

        let mut rx = store.subscribe();
        store.set_state("device_tracker.phone", "home");
        store.set_attribute("device_tracker.phone", "latitude", Value::from(1.0));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_attribute_write_keeps_state() {
        let store = StateStore::new();
        store.set_state("device_tracker.phone", "not_home");
        let mut rx = store.subscribe();

        store.set_attribute("device_tracker.phone", "latitude", Value::from(51.0));
        let event = rx.try_recv().unwrap();
        assert!(event.is_attribute_only());
        assert_eq!(store.get("device_tracker.phone").unwrap().state, "not_home");
    }

    #[test]
    fn test_attribute_before_state_creates_unknown() {
        let store = StateStore::new();
        store.set_attribute("person.alex", "friendly_name", Value::from("Alex"));
        let state = store.get("person.alex").unwrap();
        assert_eq!(state.state, STATE_UNKNOWN);
        assert_eq!(state.name(), "Alex");
    }

    #[test]
    fn test_remove() {
        let store = StateStore::new();
        store.set_state("sensor.a", "1");
        let mut rx = store.subscribe();
        store.remove("sensor.a");
        let event = rx.try_recv().unwrap();
        assert!(event.new_state.is_none());
        assert!(store.is_empty());
    }
}
