//! Location resolution
//!
//! Turns a configured origin/destination (zone name, entity id, coordinates
//! or address) into a `LocationData`, following entities whose state names
//! another entity.

use crate::domain::journey::LocationData;
use crate::domain::types::is_valid_entity_id;
use crate::infra::state_store::StateStore;
use smallvec::SmallVec;
use tracing::{debug, error};

/// Maximum number of entity-to-entity hops before giving up
pub const MAX_RESOLUTION_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FindCoordinatesError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("circular reference: state '{state}' of {entity_id} has already been checked")]
    CircularReference { entity_id: String, state: String },
    #[error("gave up resolving '{0}' after {} levels of indirection", MAX_RESOLUTION_DEPTH)]
    TooDeep(String),
}

/// Resolve `name` to a location.
///
/// First match wins:
/// 1. `name` is a zone's friendly name
/// 2. `name` is an entity whose state is a zone object id (`zone.<state>`)
/// 3. the entity's state is a zone's friendly name
/// 4. the entity has `latitude`/`longitude` attributes
/// 5. the entity's state is another entity id: resolve that one instead
/// 6. the raw state, left for the routing provider to interpret
///
/// Strings that are not entity ids at all (coordinates, addresses) are
/// returned verbatim.
///
/// The cycle guard compares each state *value* against the identifiers
/// already visited, so it only catches loops that revisit an entity id.
pub fn find_coordinates(
    store: &StateStore,
    name: &str,
) -> Result<LocationData, FindCoordinatesError> {
    let mut history: SmallVec<[String; 4]> = SmallVec::new();
    let mut current = name.to_string();

    loop {
        if let Some(coords) = store.resolve_zone(&current) {
            debug!(name = %current, "resolved_zone_by_name");
            return Ok(LocationData::named(current, coords));
        }

        let Some(entity) = store.get(&current) else {
            if is_valid_entity_id(&current) {
                debug!(entity_id = %current, "entity_not_found");
                return Err(FindCoordinatesError::UnknownEntity(current));
            }
            debug!(value = %current, "using_raw_location");
            return Ok(LocationData::raw(current));
        };

        let zone = store.get(&format!("zone.{}", entity.state));
        if let Some((zone, coords)) = zone.and_then(|z| z.location().map(|c| (z, c))) {
            debug!(entity_id = %current, zone = %zone.entity_id, "entity_in_zone");
            return Ok(LocationData::named(zone.name(), coords));
        }

        if let Some(coords) = store.resolve_zone(&entity.state) {
            debug!(entity_id = %current, zone = %entity.state, "entity_in_named_zone");
            return Ok(LocationData::named(entity.state, coords));
        }

        if let Some(coords) = entity.location() {
            debug!(entity_id = %current, "entity_has_coordinates");
            return Ok(LocationData::named(entity.name(), coords));
        }

        history.push(current);
        if history.contains(&entity.state) {
            error!(
                entity_id = %entity.entity_id,
                state = %entity.state,
                "circular_reference_resolving_location"
            );
            return Err(FindCoordinatesError::CircularReference {
                entity_id: entity.entity_id,
                state: entity.state,
            });
        }

        if store.get(&entity.state).is_none() {
            debug!(entity_id = %entity.entity_id, state = %entity.state, "using_raw_state");
            return Ok(LocationData::raw(entity.state));
        }

        if history.len() >= MAX_RESOLUTION_DEPTH {
            return Err(FindCoordinatesError::TooDeep(name.to_string()));
        }
        debug!(entity_id = %entity.entity_id, nested = %entity.state, "resolving_nested_entity");
        current = entity.state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EntityState, ATTR_FRIENDLY_NAME, ATTR_LATITUDE, ATTR_LONGITUDE};
    use crate::infra::config::ZoneConfig;

    fn store_with_zones() -> StateStore {
        let store = StateStore::new();
        store.add_zone(&ZoneConfig {
            name: "Home".to_string(),
            id: None,
            latitude: 51.5,
            longitude: -0.12,
            radius: 100.0,
        });
        store.add_zone(&ZoneConfig {
            name: "The Office".to_string(),
            id: Some("work".to_string()),
            latitude: 51.52,
            longitude: -0.08,
            radius: 100.0,
        });
        store
    }

    #[test]
    fn test_zone_friendly_name() {
        let store = store_with_zones();
        let location = find_coordinates(&store, "Home").unwrap();
        assert_eq!(location, LocationData::named("Home", "51.5,-0.12"));
    }

    #[test]
    fn test_entity_state_is_zone_object_id() {
        let store = store_with_zones();
        store.insert(EntityState::new("device_tracker.phone", "work"));

        let location = find_coordinates(&store, "device_tracker.phone").unwrap();
        assert_eq!(location, LocationData::named("The Office", "51.52,-0.08"));
    }

    #[test]
    fn test_entity_state_is_zone_friendly_name() {
        let store = store_with_zones();
        store.insert(EntityState::new("person.alex", "The Office"));

        let location = find_coordinates(&store, "person.alex").unwrap();
        assert_eq!(location, LocationData::named("The Office", "51.52,-0.08"));
    }

    #[test]
    fn test_zone_takes_priority_over_attributes() {
        let store = store_with_zones();
        store.insert(
            EntityState::new("device_tracker.phone", "home")
                .with_attribute(ATTR_LATITUDE, 10.0)
                .with_attribute(ATTR_LONGITUDE, 20.0),
        );

        let location = find_coordinates(&store, "device_tracker.phone").unwrap();
        assert_eq!(location.coords, "51.5,-0.12");
    }

    #[test]
    fn test_entity_with_coordinates() {
        let store = store_with_zones();
        store.insert(
            EntityState::new("device_tracker.phone", "not_home")
                .with_attribute(ATTR_FRIENDLY_NAME, "Phone")
                .with_attribute(ATTR_LATITUDE, 48.85)
                .with_attribute(ATTR_LONGITUDE, 2.35),
        );

        let location = find_coordinates(&store, "device_tracker.phone").unwrap();
        assert_eq!(location, LocationData::named("Phone", "48.85,2.35"));
    }

    #[test]
    fn test_nested_entity_chain() {
        let store = store_with_zones();
        store.insert(EntityState::new("input_select.destination", "sensor.next_stop"));
        store.insert(EntityState::new("sensor.next_stop", "person.alex"));
        store.insert(
            EntityState::new("person.alex", "not_home")
                .with_attribute(ATTR_LATITUDE, 1.5)
                .with_attribute(ATTR_LONGITUDE, 2.5),
        );

        let location = find_coordinates(&store, "input_select.destination").unwrap();
        assert_eq!(location, LocationData::named("alex", "1.5,2.5"));
    }

    #[test]
    fn test_chain_ends_in_raw_state() {
        let store = StateStore::new();
        store.insert(EntityState::new("input_text.a", "input_text.b"));
        store.insert(EntityState::new("input_text.b", "10 Downing Street, London"));

        let location = find_coordinates(&store, "input_text.a").unwrap();
        assert_eq!(location, LocationData::raw("10 Downing Street, London"));
    }

    #[test]
    fn test_chains_up_to_limit_terminate() {
        let store = StateStore::new();
        for depth in 1..MAX_RESOLUTION_DEPTH {
            store.insert(EntityState::new(
                format!("input_text.hop_{}", depth),
                format!("input_text.hop_{}", depth + 1),
            ));
        }
        store.insert(EntityState::new(
            format!("input_text.hop_{}", MAX_RESOLUTION_DEPTH),
            "52.1,4.3",
        ));

        let location = find_coordinates(&store, "input_text.hop_1").unwrap();
        assert_eq!(location, LocationData::raw("52.1,4.3"));
    }

    #[test]
    fn test_chain_too_deep() {
        let store = StateStore::new();
        for depth in 1..=MAX_RESOLUTION_DEPTH + 1 {
            store.insert(EntityState::new(
                format!("input_text.hop_{}", depth),
                format!("input_text.hop_{}", depth + 1),
            ));
        }
        store.insert(EntityState::new(
            format!("input_text.hop_{}", MAX_RESOLUTION_DEPTH + 2),
            "52.1,4.3",
        ));

        let err = find_coordinates(&store, "input_text.hop_1").unwrap_err();
        assert_eq!(err, FindCoordinatesError::TooDeep("input_text.hop_1".to_string()));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let store = StateStore::new();
        store.insert(EntityState::new("input_text.loop", "input_text.loop"));

        let err = find_coordinates(&store, "input_text.loop").unwrap_err();
        assert!(matches!(err, FindCoordinatesError::CircularReference { .. }));
    }

    #[test]
    fn test_two_entity_cycle() {
        let store = StateStore::new();
        store.insert(EntityState::new("input_text.a", "input_text.b"));
        store.insert(EntityState::new("input_text.b", "input_text.a"));

        let err = find_coordinates(&store, "input_text.a").unwrap_err();
        assert_eq!(
            err,
            FindCoordinatesError::CircularReference {
                entity_id: "input_text.b".to_string(),
                state: "input_text.a".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_entity() {
        let store = store_with_zones();
        let err = find_coordinates(&store, "device_tracker.missing").unwrap_err();
        assert_eq!(err, FindCoordinatesError::UnknownEntity("device_tracker.missing".to_string()));
    }

    #[test]
    fn test_raw_identifiers_pass_through() {
        let store = store_with_zones();
        assert_eq!(find_coordinates(&store, "51.5,-0.1").unwrap(), LocationData::raw("51.5,-0.1"));
        assert_eq!(
            find_coordinates(&store, "Buckingham Palace, London").unwrap(),
            LocationData::raw("Buckingham Palace, London")
        );
    }
}
