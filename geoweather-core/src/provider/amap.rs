use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{CoordinateQuery, Locale, WeatherQuery, WeatherReading},
    provider::{fetch_json, parse_number},
    units,
};

/// Amap live weather, queried by city name.
#[derive(Debug, Clone)]
pub struct AmapWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl AmapWeatherProvider {
    pub fn new(api_key: String, http: Client, base_url: String, timeout: Duration) -> Self {
        Self { api_key, base_url, http, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct AmapWeatherResponse {
    status: String,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    lives: Vec<AmapLive>,
}

#[derive(Debug, Deserialize)]
struct AmapLive {
    city: String,
    weather: String,
    temperature: String,
    winddirection: String,
    windpower: String,
}

/// "东北" + "≤3" → "东北风 ≤3级" / "NE Level ≤3".
fn describe_amap_wind(direction: &str, power: &str, locale: Locale) -> String {
    let direction = direction.trim();
    let label = match (units::translate_compass(direction, locale), locale) {
        (Some(point), Locale::Zh) => format!("{point}风"),
        (Some(point), Locale::En) => point.to_string(),
        (None, Locale::Zh) => direction.to_string(),
        (None, Locale::En) => "Variable".to_string(),
    };
    format!("{label} {}", units::scale_label(power.trim(), locale))
}

#[async_trait]
impl Provider<WeatherQuery, WeatherReading> for AmapWeatherProvider {
    fn name(&self) -> &'static str {
        "amap"
    }

    fn label(&self) -> &'static str {
        "Amap"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut WeatherQuery) -> Result<WeatherReading, ProviderError> {
        let city = query
            .search_city()
            .ok_or_else(|| ProviderError::Unsupported("needs a city name".into()))?;

        let url = format!("{}/v3/weather/weatherInfo", self.base_url);
        let parsed: AmapWeatherResponse = fetch_json(self.http.get(url).query(&[
            ("city", city),
            ("key", self.api_key.as_str()),
            ("extensions", "base"),
        ]))
        .await?;

        if parsed.status != "1" {
            return Err(ProviderError::schema(format!(
                "status {} ({})",
                parsed.status,
                parsed.info.unwrap_or_default()
            )));
        }

        let live = parsed
            .lives
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::schema(format!("no live weather for '{city}'")))?;

        if live.weather.trim().is_empty() || live.windpower.trim().is_empty() {
            return Err(ProviderError::schema("live weather missing condition or wind power"));
        }

        Ok(WeatherReading {
            city: Some(live.city).filter(|c| !c.trim().is_empty()),
            condition: units::chinese_condition(&live.weather, query.locale),
            temperature: parse_number("temperature", &live.temperature)?,
            wind: describe_amap_wind(&live.winddirection, &live.windpower, query.locale),
        })
    }
}

/// Amap reverse geocoding (coordinates → city).
#[derive(Debug, Clone)]
pub struct AmapReverseGeocoder {
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl AmapReverseGeocoder {
    pub fn new(api_key: String, http: Client, base_url: String, timeout: Duration) -> Self {
        Self { api_key, base_url, http, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct AmapRegeoResponse {
    status: String,
    regeocode: Option<AmapRegeocode>,
}

#[derive(Debug, Deserialize)]
struct AmapRegeocode {
    #[serde(rename = "addressComponent")]
    address_component: AmapAddressComponent,
}

/// Amap sends `[]` instead of a string for absent components.
#[derive(Debug, Deserialize)]
struct AmapAddressComponent {
    #[serde(default)]
    city: Value,
    #[serde(default)]
    province: Value,
}

fn non_empty_text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
impl Provider<CoordinateQuery, String> for AmapReverseGeocoder {
    fn name(&self) -> &'static str {
        "amap-regeo"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut CoordinateQuery) -> Result<String, ProviderError> {
        let c = query.coordinates;
        let location = format!("{:.6},{:.6}", c.longitude, c.latitude);
        let url = format!("{}/v3/geocode/regeo", self.base_url);

        let parsed: AmapRegeoResponse = fetch_json(
            self.http
                .get(url)
                .query(&[("location", location.as_str()), ("key", self.api_key.as_str())]),
        )
        .await?;

        if parsed.status != "1" {
            return Err(ProviderError::schema(format!("status {}", parsed.status)));
        }

        let component = parsed
            .regeocode
            .map(|r| r.address_component)
            .ok_or_else(|| ProviderError::schema("missing 'regeocode'"))?;

        // Municipalities (北京, 上海, ...) have no city, only a province.
        non_empty_text(&component.city)
            .or_else(|| non_empty_text(&component.province))
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::schema("no city or province for coordinates"))
    }
}
