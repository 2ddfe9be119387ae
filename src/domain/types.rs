//! Shared types for entity states and locations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute holding an entity's display name
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
pub const ATTR_LATITUDE: &str = "latitude";
pub const ATTR_LONGITUDE: &str = "longitude";

/// State assigned to entities seen through an attribute before their state
pub const STATE_UNKNOWN: &str = "unknown";

/// Snapshot of one tracked entity (zone, device tracker, person, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self { entity_id: entity_id.into(), state: state.into(), attributes: Map::new() }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn domain(&self) -> &str {
        split_entity_id(&self.entity_id).map(|(domain, _)| domain).unwrap_or_default()
    }

    pub fn object_id(&self) -> &str {
        split_entity_id(&self.entity_id).map(|(_, object_id)| object_id).unwrap_or(&self.entity_id)
    }

    /// Display name: `friendly_name` attribute, else the object id with spaces
    pub fn name(&self) -> String {
        match self.attributes.get(ATTR_FRIENDLY_NAME).and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.object_id().replace('_', " "),
        }
    }

    /// `"lat,lon"` when the entity carries numeric location attributes
    pub fn location(&self) -> Option<String> {
        let lat = self.attributes.get(ATTR_LATITUDE)?.as_f64()?;
        let lon = self.attributes.get(ATTR_LONGITUDE)?.as_f64()?;
        Some(format_coordinates(lat, lon))
    }
}

/// State change notification fanned out by the state store
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub entity_id: String,
    pub old_state: Option<EntityState>,
    pub new_state: Option<EntityState>,
}

impl StateChanged {
    /// True when only attributes changed (both sides present, same state value)
    pub fn is_attribute_only(&self) -> bool {
        match (&self.old_state, &self.new_state) {
            (Some(old), Some(new)) => old.state == new.state,
            _ => false,
        }
    }
}

/// Split `domain.object_id`
pub fn split_entity_id(entity_id: &str) -> Option<(&str, &str)> {
    entity_id.split_once('.')
}

/// Check the `domain.object_id` shape (lowercase alphanumerics and `_`)
pub fn is_valid_entity_id(entity_id: &str) -> bool {
    fn valid_part(part: &str) -> bool {
        !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    }

    match split_entity_id(entity_id) {
        Some((domain, object_id)) => valid_part(domain) && valid_part(object_id),
        None => false,
    }
}

pub fn format_coordinates(lat: f64, lon: f64) -> String {
    format!("{},{}", lat, lon)
}

/// Parse a `"lat,lon"` pair, rejecting out-of-range values
pub fn parse_coordinates(value: &str) -> Option<(f64, f64)> {
    let (lat, lon) = value.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some((lat, lon))
}

/// Lowercase slug used for object ids and topic segments
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_sep = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}
