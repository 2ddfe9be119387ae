//! MQTT statestream ingest
//!
//! Home Assistant's `mqtt_statestream` mirrors every entity to
//! `<base>/<domain>/<object_id>/state` and one topic per attribute. This
//! task applies those messages to the local state store, which in turn
//! notifies the coordinators.

use crate::domain::types::is_valid_entity_id;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::state_store::StateStore;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Timestamp topics that carry no entity data
const IGNORED_ATTRIBUTES: [&str; 3] = ["last_changed", "last_updated", "last_reported"];

/// A statestream message decoded into a state store write
#[derive(Debug, Clone, PartialEq)]
pub enum StatestreamUpdate {
    State { entity_id: String, state: String },
    Attribute { entity_id: String, key: String, value: Value },
}

impl StatestreamUpdate {
    pub fn apply(self, store: &StateStore) {
        match self {
            StatestreamUpdate::State { entity_id, state } => store.set_state(&entity_id, &state),
            StatestreamUpdate::Attribute { entity_id, key, value } => {
                store.set_attribute(&entity_id, &key, value)
            }
        }
    }
}

/// Decode one statestream message.
///
/// Returns `None` for topics outside `base`, metadata topics and malformed
/// payloads.
pub fn parse_statestream_message(base: &str, topic: &str, payload: &[u8]) -> Option<StatestreamUpdate> {
    let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let (domain, object_id, key) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || IGNORED_ATTRIBUTES.contains(&key) {
        return None;
    }

    let entity_id = format!("{}.{}", domain, object_id);
    if !is_valid_entity_id(&entity_id) {
        return None;
    }

    let text = std::str::from_utf8(payload).ok()?.trim();
    if key == "state" {
        let state = text
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(text);
        return Some(StatestreamUpdate::State { entity_id, state: state.to_string() });
    }

    let value = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
    Some(StatestreamUpdate::Attribute { entity_id, key: key.to_string(), value })
}

/// Subscribe to the statestream and feed the state store until shutdown
pub async fn start_statestream(
    config: &Config,
    store: Arc<StateStore>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("journey-statestream-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let base = config.statestream_base_topic().trim_end_matches('/').to_string();
    let filter = format!("{}/#", base);

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(&filter, QoS::AtLeastOnce).await?;

    info!(topic = %filter, host = %config.mqtt_host(), port = %config.mqtt_port(), "statestream_subscribed");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("statestream_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match parse_statestream_message(&base, &publish.topic, &publish.payload) {
                            Some(update) => {
                                debug!(topic = %publish.topic, "statestream_update");
                                update.apply(&store);
                                metrics.record_state_update();
                            }
                            None => metrics.record_state_update_ignored(),
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(entities = %store.len(), "statestream_connected");
                        // Retained messages replay on every new session
                        if let Err(e) = client.subscribe(&filter, QoS::AtLeastOnce).await {
                            error!(error = %e, "statestream_resubscribe_failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "statestream_connection_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
