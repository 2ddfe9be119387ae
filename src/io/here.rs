//! HERE Routing v8 client
//!
//! HERE routes between coordinates only, so free-form addresses are geocoded
//! first. Section summaries are summed: `duration` is traffic-aware and
//! `baseDuration` is the nominal time.

use crate::domain::journey::TravelTimeData;
use crate::domain::types::{format_coordinates, parse_coordinates};
use crate::infra::config::Provider;
use crate::io::api::{
    http_client, ApiError, TravelTimeApi, CREDENTIAL_CHECK_DESTINATION, CREDENTIAL_CHECK_ORIGIN,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const ROUTES_URL: &str = "https://router.hereapi.com/v8/routes";
const GEOCODE_URL: &str = "https://geocode.search.hereapi.com/v1/geocode";

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    notices: Vec<Notice>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    sections: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    summary: Summary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    duration: u64,
    #[serde(default)]
    base_duration: Option<u64>,
    #[serde(default)]
    length: u64,
}

#[derive(Debug, Deserialize)]
struct Notice {
    #[serde(default)]
    title: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    items: Vec<GeocodeItem>,
}

#[derive(Debug, Deserialize)]
struct GeocodeItem {
    #[serde(default)]
    title: Option<String>,
    position: Position,
}

#[derive(Debug, Deserialize)]
struct Position {
    lat: f64,
    lng: f64,
}

/// A location ready for routing: coordinates plus a display address
#[derive(Debug, Clone, PartialEq)]
struct Waypoint {
    coords: String,
    address: String,
}

pub struct HereMapsClient {
    api_key: String,
    routes_url: String,
    geocode_url: String,
    http: reqwest::Client,
}

impl HereMapsClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            api_key: api_key.to_string(),
            routes_url: ROUTES_URL.to_string(),
            geocode_url: GEOCODE_URL.to_string(),
            http: http_client(timeout)?,
        })
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                provider: Provider::Here,
                status: status.as_u16().to_string(),
                message: error_description(&body),
            });
        }
        Ok(body)
    }

    /// Coordinates pass through; anything else is geocoded
    async fn waypoint(&self, location: &str) -> Result<Waypoint, ApiError> {
        if let Some((lat, lon)) = parse_coordinates(location) {
            return Ok(Waypoint {
                coords: format_coordinates(lat, lon),
                address: location.to_string(),
            });
        }
        let body = self.get(&self.geocode_url, &[("q", location)]).await?;
        let waypoint = parse_geocode(&body, location)?;
        debug!(query = %location, coords = %waypoint.coords, "here_geocoded");
        Ok(waypoint)
    }

    async fn route(&self, origin: &Waypoint, destination: &Waypoint) -> Result<String, ApiError> {
        self.get(
            &self.routes_url,
            &[
                ("transportMode", "car"),
                ("origin", origin.coords.as_str()),
                ("destination", destination.coords.as_str()),
                ("return", "summary"),
            ],
        )
        .await
    }
}

#[async_trait]
impl TravelTimeApi for HereMapsClient {
    async fn travel_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<TravelTimeData, ApiError> {
        let origin = self.waypoint(origin).await?;
        let destination = self.waypoint(destination).await?;
        let body = self.route(&origin, &destination).await?;
        let result = parse_routes(&body, &origin, &destination);
        match &result {
            Ok(data) => debug!(
                origin = %origin.coords,
                destination = %destination.coords,
                duration = %data.travel_time_secs,
                duration_in_traffic = %data.travel_time_traffic_secs,
                "here_route"
            ),
            Err(e) => error!(error = %e, "here_route_failed"),
        }
        result
    }

    async fn test_credentials(&self) -> Result<(), ApiError> {
        let origin = self.waypoint(CREDENTIAL_CHECK_ORIGIN).await?;
        let destination = self.waypoint(CREDENTIAL_CHECK_DESTINATION).await?;
        self.route(&origin, &destination).await.map(|_| ()).inspect_err(|e| {
            error!(error = %e, "here_credentials_invalid");
        })
    }

    fn provider(&self) -> Provider {
        Provider::Here
    }
}

/// Pull `error_description` (or `title`) out of a HERE error body
fn error_description(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error_description")
        .or_else(|| value.get("title"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn parse_geocode(body: &str, query: &str) -> Result<Waypoint, ApiError> {
    let response: GeocodeResponse = serde_json::from_str(body)?;
    let item = response.items.into_iter().next().ok_or_else(|| ApiError::Geocode(query.to_string()))?;
    Ok(Waypoint {
        coords: format_coordinates(item.position.lat, item.position.lng),
        address: item.title.unwrap_or_else(|| query.to_string()),
    })
}

fn parse_routes(
    body: &str,
    origin: &Waypoint,
    destination: &Waypoint,
) -> Result<TravelTimeData, ApiError> {
    let response: RoutesResponse = serde_json::from_str(body)?;

    let Some(route) = response.routes.first().filter(|r| !r.sections.is_empty()) else {
        if let Some(notice) = response.notices.first() {
            return Err(ApiError::Status {
                provider: Provider::Here,
                status: notice.code.clone(),
                message: Some(notice.title.clone()),
            });
        }
        return Err(ApiError::NoRoute {
            origin: origin.address.clone(),
            destination: destination.address.clone(),
        });
    };

    let (traffic, nominal, length) =
        route.sections.iter().fold((0u64, 0u64, 0u64), |(traffic, nominal, length), section| {
            let summary = &section.summary;
            (
                traffic + summary.duration,
                nominal + summary.base_duration.unwrap_or(summary.duration),
                length + summary.length,
            )
        });

    Ok(TravelTimeData {
        origin: Some(origin.address.clone()),
        destination: Some(destination.address.clone()),
        travel_time_secs: nominal,
        travel_time_traffic_secs: traffic,
        distance_m: length,
    })
}
