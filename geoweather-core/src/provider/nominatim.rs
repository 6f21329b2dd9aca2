use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::CoordinateQuery,
    provider::fetch_json,
};

/// OpenStreetMap Nominatim reverse geocoding.
#[derive(Debug, Clone)]
pub struct NominatimReverseGeocoder {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl NominatimReverseGeocoder {
    pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
        Self { base_url, http, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    county: Option<String>,
    state: Option<String>,
}

impl NominatimAddress {
    /// Most specific settlement name available.
    fn settlement(self) -> Option<String> {
        [self.city, self.town, self.village, self.municipality, self.county, self.state]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_owned())
            .find(|s| !s.is_empty())
    }
}

#[async_trait]
impl Provider<CoordinateQuery, String> for NominatimReverseGeocoder {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut CoordinateQuery) -> Result<String, ProviderError> {
        let c = query.coordinates;
        let url = format!("{}/reverse", self.base_url);

        let parsed: NominatimResponse = fetch_json(self.http.get(url).query(&[
            ("lat", c.latitude.to_string()),
            ("lon", c.longitude.to_string()),
            ("format", "json".to_string()),
            ("addressdetails", "1".to_string()),
            ("zoom", "10".to_string()),
            ("accept-language", query.locale.as_str().to_string()),
        ]))
        .await?;

        parsed
            .address
            .and_then(NominatimAddress::settlement)
            .ok_or_else(|| ProviderError::schema("no settlement in address"))
    }
}
