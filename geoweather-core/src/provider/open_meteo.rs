use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{Coordinates, Locale, WeatherQuery, WeatherReading},
    provider::fetch_json,
    units,
};

/// Open-Meteo by-name geocoding. Shared by the providers that only accept
/// coordinates.
#[derive(Debug, Clone)]
pub struct OpenMeteoGeocoder {
    base_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    name: String,
    latitude: f64,
    longitude: f64,
}

impl OpenMeteoGeocoder {
    pub fn new(http: Client, base_url: String) -> Self {
        Self { base_url, http }
    }

    /// Best match for `city`, or `None` when the service knows no such place.
    pub async fn search(
        &self,
        city: &str,
        locale: Locale,
    ) -> Result<Option<(String, Coordinates)>, ProviderError> {
        let url = format!("{}/v1/search", self.base_url);

        let parsed: GeocodingResponse = fetch_json(self.http.get(url).query(&[
            ("name", city),
            ("count", "1"),
            ("language", locale.as_str()),
            ("format", "json"),
        ]))
        .await?;

        Ok(parsed.results.into_iter().next().and_then(|r| {
            let coordinates = Coordinates::new(r.latitude, r.longitude);
            coordinates.is_valid().then_some((r.name, coordinates))
        }))
    }
}

/// Make sure `query` carries coordinates, geocoding its city by name at most
/// once per request. The matched name replaces the query city.
pub(crate) async fn ensure_coordinates(
    geocoder: &OpenMeteoGeocoder,
    query: &mut WeatherQuery,
) -> Result<Coordinates, ProviderError> {
    if let Some(coordinates) = query.coordinates {
        return Ok(coordinates);
    }
    if query.geocoded {
        return Err(ProviderError::Unsupported("city could not be geocoded".into()));
    }

    let city = query
        .search_city()
        .map(str::to_owned)
        .ok_or_else(|| ProviderError::Unsupported("needs coordinates or a city name".into()))?;

    query.geocoded = true;
    let (name, coordinates) = geocoder
        .search(&city, query.locale)
        .await?
        .ok_or_else(|| ProviderError::schema(format!("no geocoding match for '{city}'")))?;

    debug!(%city, matched = %name, "geocoded city by name");
    query.city = name;
    query.coordinates = Some(coordinates);
    Ok(coordinates)
}

/// Open-Meteo current conditions. Keyless.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    base_url: String,
    http: Client,
    geocoder: OpenMeteoGeocoder,
    timeout: Duration,
}

impl OpenMeteoProvider {
    pub fn new(http: Client, base_url: String, geocoder: OpenMeteoGeocoder, timeout: Duration) -> Self {
        Self { base_url, http, geocoder, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<Current>,
}

#[derive(Debug, Deserialize)]
struct Current {
    temperature_2m: f64,
    weather_code: i64,
    wind_speed_10m: f64,
    wind_direction_10m: f64,
}

#[async_trait]
impl Provider<WeatherQuery, WeatherReading> for OpenMeteoProvider {
    fn name(&self) -> &'static str {
        "open-meteo"
    }

    fn label(&self) -> &'static str {
        "Open-Meteo"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut WeatherQuery) -> Result<WeatherReading, ProviderError> {
        let c = ensure_coordinates(&self.geocoder, query).await?;
        let url = format!("{}/v1/forecast", self.base_url);

        let parsed: ForecastResponse = fetch_json(self.http.get(url).query(&[
            ("latitude", c.latitude.to_string()),
            ("longitude", c.longitude.to_string()),
            (
                "current",
                "temperature_2m,weather_code,wind_speed_10m,wind_direction_10m".to_string(),
            ),
            ("timezone", "auto".to_string()),
        ]))
        .await?;

        let current = parsed.current.ok_or_else(|| ProviderError::schema("missing 'current'"))?;
        let locale = query.locale;

        Ok(WeatherReading {
            city: None,
            condition: units::wmo_condition(current.weather_code, locale).to_string(),
            temperature: current.temperature_2m.round(),
            wind: units::describe_wind(current.wind_direction_10m, current.wind_speed_10m, locale),
        })
    }
}
