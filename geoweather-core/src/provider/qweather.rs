use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{Coordinates, Locale, WeatherQuery, WeatherReading},
    provider::{fetch_json, parse_number},
    units,
};

/// QWeather: resolve the city to a location id, then fetch live conditions.
///
/// With coordinates the lookup step is skipped; `/v7/weather/now` accepts
/// `lon,lat` directly.
#[derive(Debug, Clone)]
pub struct QWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl QWeatherProvider {
    pub fn new(api_key: String, http: Client, base_url: String, timeout: Duration) -> Self {
        Self { api_key, base_url, http, timeout }
    }

    async fn lookup(&self, city: &str, locale: Locale) -> Result<QwLocation, ProviderError> {
        let url = format!("{}/geo/v2/city/lookup", self.base_url);

        let parsed: QwLookupResponse = fetch_json(self.http.get(url).query(&[
            ("location", city),
            ("key", self.api_key.as_str()),
            ("lang", locale.as_str()),
        ]))
        .await?;

        if parsed.code != "200" {
            return Err(ProviderError::schema(format!(
                "city lookup for '{city}' returned code {}",
                parsed.code
            )));
        }

        parsed
            .location
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::schema(format!("city lookup found no match for '{city}'")))
    }

    async fn now(&self, location: &str, locale: Locale) -> Result<QwNow, ProviderError> {
        let url = format!("{}/v7/weather/now", self.base_url);

        let parsed: QwNowResponse = fetch_json(self.http.get(url).query(&[
            ("location", location),
            ("key", self.api_key.as_str()),
            ("lang", locale.as_str()),
        ]))
        .await?;

        if parsed.code != "200" {
            return Err(ProviderError::schema(format!("live conditions returned code {}", parsed.code)));
        }

        parsed.now.ok_or_else(|| ProviderError::schema("live conditions missing 'now'"))
    }
}

#[derive(Debug, Deserialize)]
struct QwLookupResponse {
    code: String,
    #[serde(default)]
    location: Vec<QwLocation>,
}

#[derive(Debug, Deserialize)]
struct QwLocation {
    id: String,
    name: String,
    lat: Option<String>,
    lon: Option<String>,
}

impl QwLocation {
    fn coordinates(&self) -> Option<Coordinates> {
        let lat = self.lat.as_deref()?.trim().parse().ok()?;
        let lon = self.lon.as_deref()?.trim().parse().ok()?;
        Some(Coordinates::new(lat, lon)).filter(Coordinates::is_valid)
    }
}

#[derive(Debug, Deserialize)]
struct QwNowResponse {
    code: String,
    now: Option<QwNow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QwNow {
    text: String,
    temp: String,
    wind360: String,
    wind_speed: String,
}

#[async_trait]
impl Provider<WeatherQuery, WeatherReading> for QWeatherProvider {
    fn name(&self) -> &'static str {
        "qweather"
    }

    fn label(&self) -> &'static str {
        "QWeather"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut WeatherQuery) -> Result<WeatherReading, ProviderError> {
        let locale = query.locale;
        let city = query.search_city().map(str::to_owned);

        let (location, corrected) = match (query.coordinates, city) {
            (Some(c), _) => (format!("{:.2},{:.2}", c.longitude, c.latitude), None),
            (None, Some(city)) => {
                let found = self.lookup(&city, locale).await?;
                // Later providers benefit from the corrected name even if the next step fails.
                query.city = found.name.clone();
                if let Some(coordinates) = found.coordinates() {
                    query.coordinates = Some(coordinates);
                }
                (found.id, Some(found.name))
            }
            (None, None) => {
                return Err(ProviderError::Unsupported("needs coordinates or a city name".into()));
            }
        };

        let now = self.now(&location, locale).await?;

        if now.text.trim().is_empty() {
            return Err(ProviderError::schema("live conditions missing 'text'"));
        }

        let degrees = parse_number("wind360", &now.wind360)?;
        let speed = parse_number("windSpeed", &now.wind_speed)?;

        Ok(WeatherReading {
            city: corrected,
            condition: now.text,
            temperature: parse_number("temp", &now.temp)?,
            wind: units::describe_wind(degrees, speed, locale),
        })
    }
}
