//! MQTT publisher for sensor state
//!
//! Every sensor snapshot is published retained with QoS 1 to:
//! - `<base>/<object_id>/state` - minutes, empty when there is no data
//! - `<base>/<object_id>/attributes` - JSON attributes plus unit and icon
//! - `<base>/<object_id>/availability` - `online` / `offline`

use crate::infra::config::Config;
use crate::services::sensor::SensorSnapshot;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

/// One MQTT message derived from a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: String,
}

/// Render a snapshot as its state, attributes and availability messages
pub fn sensor_messages(base: &str, snapshot: &SensorSnapshot) -> Vec<OutgoingMessage> {
    let prefix = format!("{}/{}", base.trim_end_matches('/'), snapshot.object_id);

    let state = snapshot.state.map(|minutes| minutes.to_string()).unwrap_or_default();
    let attributes = json!({
        "friendly_name": snapshot.name,
        "unique_id": snapshot.unique_id,
        "unit_of_measurement": snapshot.unit_of_measurement,
        "icon": snapshot.icon,
        "attributes": snapshot.attributes,
    });
    let availability =
        if snapshot.available { AVAILABILITY_ONLINE } else { AVAILABILITY_OFFLINE };

    vec![
        OutgoingMessage { topic: format!("{}/state", prefix), payload: state },
        OutgoingMessage { topic: format!("{}/attributes", prefix), payload: attributes.to_string() },
        OutgoingMessage {
            topic: format!("{}/availability", prefix),
            payload: availability.to_string(),
        },
    ]
}

/// Publishes sensor snapshots received on the egress channel
pub struct SensorPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<SensorSnapshot>,
    base_topic: String,
}

impl SensorPublisher {
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<SensorSnapshot>) -> Self {
        let client_id = format!("journey-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, base_topic: config.egress_base_topic().to_string() }
    }

    /// Publish until shutdown, then drain what is already queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(base_topic = %self.base_topic, "mqtt_egress_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(snapshot) = self.rx.try_recv() {
                            self.publish(&snapshot).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(snapshot) => self.publish(&snapshot).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn publish(&self, snapshot: &SensorSnapshot) {
        for message in sensor_messages(&self.base_topic, snapshot) {
            if let Err(e) = self
                .client
                .publish(&message.topic, QoS::AtLeastOnce, true, message.payload.into_bytes())
                .await
            {
                error!(topic = %message.topic, error = %e, "mqtt_egress_publish_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sensor::{SensorAttributes, ICON, UNIT_OF_MEASUREMENT};

    fn snapshot(state: Option<i64>, available: bool) -> SensorSnapshot {
        SensorSnapshot {
            unique_id: "commute-time".to_string(),
            object_id: "commute_travel_time".to_string(),
            name: "Commute Travel Time".to_string(),
            state,
            unit_of_measurement: UNIT_OF_MEASUREMENT,
            icon: ICON,
            available,
            attributes: state.map(|_| SensorAttributes {
                duration: 600,
                duration_in_traffic: 900,
                delay_minutes: 5,
                delay_factor: 50,
                destination: "Work".to_string(),
                destination_address: None,
                eta: None,
            }),
        }
    }

    #[test]
    fn test_topics_and_payloads() {
        let messages = sensor_messages("journey/", &snapshot(Some(15), true));
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[0].topic, "journey/commute_travel_time/state");
        assert_eq!(messages[0].payload, "15");
        assert_eq!(messages[1].topic, "journey/commute_travel_time/attributes");
        assert_eq!(messages[2].topic, "journey/commute_travel_time/availability");
        assert_eq!(messages[2].payload, "online");

        let attributes: serde_json::Value = serde_json::from_str(&messages[1].payload).unwrap();
        assert_eq!(attributes["unit_of_measurement"], "min");
        assert_eq!(attributes["attributes"]["delay_factor"], 50);
        assert!(attributes["attributes"].get("destination_address").is_none());
    }

    #[test]
    fn test_unavailable_without_data() {
        let messages = sensor_messages("journey", &snapshot(None, false));
        assert_eq!(messages[0].payload, "");
        assert_eq!(messages[2].payload, "offline");

        let attributes: serde_json::Value = serde_json::from_str(&messages[1].payload).unwrap();
        assert!(attributes["attributes"].is_null());
    }
}
