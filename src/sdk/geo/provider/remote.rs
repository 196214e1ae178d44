use super::types::parse_first_position;
use super::GeocodingProvider;
use crate::sdk::geo::distance::Coordinate;
use crate::sdk::geo::error::{GeoError, ProviderErrorPayload};
use crate::sdk::util::rate_limit::Limiter;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openrouteservice.org";

/// HTTP geocoder speaking the Pelias/openrouteservice search API.
pub struct RemoteGeocoder {
    client: Client,
    api_key: String,
    base_url: String,
    limiter: Limiter,
}

impl RemoteGeocoder {
    pub fn new(
        api_key: String,
        base_url: String,
        timeout: Duration,
        limiter: Limiter,
    ) -> Result<Self, GeoError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }
}

#[async_trait]
impl GeocodingProvider for RemoteGeocoder {
    async fn ready(&self) {
        self.limiter.until_ready().await;
    }

    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeoError> {
        let url = format!("{}/geocode/search", self.base_url);
        log::debug!("[PROVIDER] Calling remote geocode for address: \"{}\"", address);

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("text", address)])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Try to parse the structured error first
            if let Ok(payload) = serde_json::from_str::<ProviderErrorPayload>(&text) {
                return Err(GeoError::Api {
                    status: status.as_u16(),
                    code: payload.error.code,
                    message: payload.error.message,
                });
            }
            return Err(GeoError::RawApi {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_first_position(&text).map_err(|e| {
            log::warn!(
                "Failed to parse geocode response. URL: {}\nError: {}. Body: {}",
                url,
                e,
                text
            );
            e
        })
    }
}
