//! api.vore.top: IP geolocation and city-keyed live weather. Both answer in
//! Chinese and signal success with `code == 200`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{IpQuery, Locale, WeatherQuery, WeatherReading},
    provider::{fetch_json, parse_number},
    units,
};

/// IP geolocation. Returns Chinese region names.
#[derive(Debug, Clone)]
pub struct VoreIpLookup {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl VoreIpLookup {
    pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
        Self { base_url, http, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct VoreResponse {
    code: i64,
    ipdata: Option<VoreIpData>,
}

/// `info1` is the province, `info2` the city.
#[derive(Debug, Deserialize)]
struct VoreIpData {
    #[serde(default)]
    info1: String,
    #[serde(default)]
    info2: String,
}

#[async_trait]
impl Provider<IpQuery, String> for VoreIpLookup {
    fn name(&self) -> &'static str {
        "vore-ip"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut IpQuery) -> Result<String, ProviderError> {
        let url = format!("{}/api/IPdata", self.base_url);
        let parsed: VoreResponse =
            fetch_json(self.http.get(url).query(&[("ip", query.address.as_str())])).await?;

        if parsed.code != 200 {
            return Err(ProviderError::schema(format!("code {}", parsed.code)));
        }

        let data = parsed.ipdata.ok_or_else(|| ProviderError::schema("missing 'ipdata'"))?;
        [data.info2, data.info1]
            .into_iter()
            .map(|s| s.trim().to_owned())
            .find(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::schema("no region for address"))
    }
}

/// Live weather by city name.
#[derive(Debug, Clone)]
pub struct VoreWeatherProvider {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl VoreWeatherProvider {
    pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
        Self { base_url, http, timeout }
    }
}

/// `data` is either the reading itself or wraps it in a `tianqi` object.
#[derive(Debug, Deserialize)]
struct VoreWeatherResponse {
    code: i64,
    data: Option<Value>,
}

/// First non-empty string (or number) among `keys`.
fn text_field(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(key)? {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// "东北风3级" stays as is in Chinese; English gets the compass point only.
fn describe_vore_wind(text: &str, locale: Locale) -> String {
    match locale {
        Locale::Zh => text.to_string(),
        Locale::En => {
            let direction = text
                .split(|c: char| c.is_ascii_digit() || c.is_whitespace() || c == '≤' || c == '<')
                .next()
                .unwrap_or_default();
            units::translate_compass(direction, locale).unwrap_or("Variable").to_string()
        }
    }
}

#[async_trait]
impl Provider<WeatherQuery, WeatherReading> for VoreWeatherProvider {
    fn name(&self) -> &'static str {
        "vore-weather"
    }

    fn label(&self) -> &'static str {
        "Vore"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut WeatherQuery) -> Result<WeatherReading, ProviderError> {
        let city = query
            .search_city()
            .ok_or_else(|| ProviderError::Unsupported("needs a city name".into()))?;

        let url = format!("{}/api/Weather", self.base_url);
        let parsed: VoreWeatherResponse = fetch_json(self.http.get(url).query(&[("city", city)])).await?;

        if parsed.code != 200 {
            return Err(ProviderError::schema(format!("code {}", parsed.code)));
        }

        let data = parsed.data.ok_or_else(|| ProviderError::schema("missing 'data'"))?;
        let live = match data.get("tianqi") {
            Some(nested) if nested.is_object() => nested,
            _ => &data,
        };

        let condition = text_field(live, &["weather", "tianqi"])
            .ok_or_else(|| ProviderError::schema("missing 'weather'"))?;
        let temperature = text_field(live, &["temp", "temperature"])
            .ok_or_else(|| ProviderError::schema("missing 'temp'"))?;
        let wind = text_field(live, &["wind", "winddirection"])
            .ok_or_else(|| ProviderError::schema("missing 'wind'"))?;

        Ok(WeatherReading {
            city: text_field(live, &["city"]).or_else(|| text_field(&data, &["city"])),
            condition: units::chinese_condition(&condition, query.locale),
            temperature: parse_number("temp", temperature.trim_end_matches(['℃', '°', 'C']))?,
            wind: describe_vore_wind(&wind, query.locale),
        })
    }
}
