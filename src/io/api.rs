//! Routing provider contract and static provider selection

use crate::domain::journey::TravelTimeData;
use crate::infra::config::Provider;
use crate::io::google::GoogleMapsClient;
use crate::io::here::HereMapsClient;
use async_trait::async_trait;
use std::time::Duration;

/// Fixed route used to check credentials
pub(crate) const CREDENTIAL_CHECK_ORIGIN: &str = "51.478,0";
pub(crate) const CREDENTIAL_CHECK_DESTINATION: &str = "51.748,0.02";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// URL stripped: it carries the API key
    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{provider} returned status {status}{}", message_suffix(.message))]
    Status { provider: Provider, status: String, message: Option<String> },
    #[error("no route found between '{origin}' and '{destination}'")]
    NoRoute { origin: String, destination: String },
    #[error("could not geocode '{0}'")]
    Geocode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Http(e.without_url())
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
}

/// A routing provider that measures travel time between two locations.
///
/// Locations are `"lat,lon"` strings or free-form addresses.
#[async_trait]
pub trait TravelTimeApi: Send + Sync {
    async fn travel_time(&self, origin: &str, destination: &str)
        -> Result<TravelTimeData, ApiError>;

    /// Issue a cheap request to check the configured credentials
    async fn test_credentials(&self) -> Result<(), ApiError>;

    fn provider(&self) -> Provider;
}

/// Provider chosen by configuration
pub enum ApiClient {
    Google(GoogleMapsClient),
    Here(HereMapsClient),
}

impl ApiClient {
    pub fn new(provider: Provider, api_token: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(match provider {
            Provider::Google => ApiClient::Google(GoogleMapsClient::new(api_token, timeout)?),
            Provider::Here => ApiClient::Here(HereMapsClient::new(api_token, timeout)?),
        })
    }
}

#[async_trait]
impl TravelTimeApi for ApiClient {
    async fn travel_time(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<TravelTimeData, ApiError> {
        match self {
            ApiClient::Google(client) => client.travel_time(origin, destination).await,
            ApiClient::Here(client) => client.travel_time(origin, destination).await,
        }
    }

    async fn test_credentials(&self) -> Result<(), ApiError> {
        match self {
            ApiClient::Google(client) => client.test_credentials().await,
            ApiClient::Here(client) => client.test_credentials().await,
        }
    }

    fn provider(&self) -> Provider {
        match self {
            ApiClient::Google(_) => Provider::Google,
            ApiClient::Here(_) => Provider::Here,
        }
    }
}

/// Build the shared HTTP client for one provider instance
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("journey/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
