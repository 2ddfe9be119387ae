//! Google Maps Distance Matrix client
//!
//! One origin, one destination, driving mode, departing now. The response
//! fields consumed are the top-level `status`, the resolved addresses and the
//! single matrix element's `duration`, `duration_in_traffic` and `distance`.

use crate::domain::journey::TravelTimeData;
use crate::infra::config::Provider;
use crate::io::api::{
    http_client, ApiError, TravelTimeApi, CREDENTIAL_CHECK_DESTINATION, CREDENTIAL_CHECK_ORIGIN,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const DISTANCE_MATRIX_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";

const STATUS_OK: &str = "OK";

#[derive(Debug, Deserialize)]
struct DistanceMatrixResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    origin_addresses: Vec<String>,
    #[serde(default)]
    destination_addresses: Vec<String>,
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct Element {
    status: String,
    #[serde(default)]
    duration: Option<TextValue>,
    #[serde(default)]
    duration_in_traffic: Option<TextValue>,
    #[serde(default)]
    distance: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: u64,
}

pub struct GoogleMapsClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GoogleMapsClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: DISTANCE_MATRIX_URL.to_string(),
            http: http_client(timeout)?,
        })
    }

    async fn distance_matrix(&self, origin: &str, destination: &str) -> Result<String, ApiError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("origins", origin),
                ("destinations", destination),
                ("mode", "driving"),
                ("departure_time", "now"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl TravelTimeApi for GoogleMapsClient {
    async fn travel_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<TravelTimeData, ApiError> {
        let body = self.distance_matrix(origin, destination).await?;
        let result = parse_distance_matrix(&body, origin, destination);
        match &result {
            Ok(data) => debug!(
                origin = %origin,
                destination = %destination,
                duration = %data.travel_time_secs,
                duration_in_traffic = %data.travel_time_traffic_secs,
                "google_distance_matrix"
            ),
            Err(e) => error!(error = %e, "google_distance_matrix_failed"),
        }
        result
    }

    async fn test_credentials(&self) -> Result<(), ApiError> {
        let body =
            self.distance_matrix(CREDENTIAL_CHECK_ORIGIN, CREDENTIAL_CHECK_DESTINATION).await?;
        let response: DistanceMatrixResponse = serde_json::from_str(&body)?;
        check_status(&response).inspect_err(|e| {
            error!(error = %e, "google_credentials_invalid");
        })
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }
}

fn check_status(response: &DistanceMatrixResponse) -> Result<(), ApiError> {
    if response.status == STATUS_OK {
        return Ok(());
    }
    Err(ApiError::Status {
        provider: Provider::Google,
        status: response.status.clone(),
        message: response.error_message.clone(),
    })
}

/// Turn a distance matrix response body into a measurement
fn parse_distance_matrix(
    body: &str,
    origin: &str,
    destination: &str,
) -> Result<TravelTimeData, ApiError> {
    let response: DistanceMatrixResponse = serde_json::from_str(body)?;
    check_status(&response)?;

    let no_route =
        || ApiError::NoRoute { origin: origin.to_string(), destination: destination.to_string() };

    let element = response
        .rows
        .first()
        .and_then(|row| row.elements.first())
        .ok_or_else(no_route)?;

    if element.status != STATUS_OK {
        return Err(ApiError::Status {
            provider: Provider::Google,
            status: element.status.clone(),
            message: None,
        });
    }

    let duration = element.duration.as_ref().ok_or_else(no_route)?.value;
    let duration_in_traffic =
        element.duration_in_traffic.as_ref().map(|d| d.value).unwrap_or(duration);
    let distance = element.distance.as_ref().map(|d| d.value).unwrap_or(0);

    Ok(TravelTimeData {
        origin: response.origin_addresses.into_iter().next(),
        destination: response.destination_addresses.into_iter().next(),
        travel_time_secs: duration,
        travel_time_traffic_secs: duration_in_traffic,
        distance_m: distance,
    })
}
