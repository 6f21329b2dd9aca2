use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{Locale, WeatherQuery, WeatherReading},
    provider::{fetch_json, open_meteo::OpenMeteoGeocoder, open_meteo::ensure_coordinates},
    units,
};

/// 7Timer `civil` product. Coordinates only; city names are geocoded first.
#[derive(Debug, Clone)]
pub struct SevenTimerProvider {
    base_url: String,
    http: Client,
    geocoder: OpenMeteoGeocoder,
    timeout: Duration,
}

impl SevenTimerProvider {
    pub fn new(http: Client, base_url: String, geocoder: OpenMeteoGeocoder, timeout: Duration) -> Self {
        Self { base_url, http, geocoder, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct CivilResponse {
    #[serde(default)]
    dataseries: Vec<CivilPoint>,
}

#[derive(Debug, Deserialize)]
struct CivilPoint {
    weather: String,
    temp2m: f64,
    wind10m: CivilWind,
}

/// `speed` is already a scale level (1..=8), not km/h.
#[derive(Debug, Deserialize)]
struct CivilWind {
    direction: String,
    speed: i64,
}

fn describe_civil_wind(wind: &CivilWind, locale: Locale) -> String {
    let level = wind.speed.to_string();
    match (units::translate_compass(&wind.direction, locale), locale) {
        (Some(point), Locale::Zh) => format!("{point}风 {}", units::scale_label(&level, locale)),
        (Some(point), Locale::En) => format!("{point} {}", units::scale_label(&level, locale)),
        (None, _) => units::scale_label(&level, locale),
    }
}

#[async_trait]
impl Provider<WeatherQuery, WeatherReading> for SevenTimerProvider {
    fn name(&self) -> &'static str {
        "7timer"
    }

    fn label(&self) -> &'static str {
        "7Timer"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut WeatherQuery) -> Result<WeatherReading, ProviderError> {
        let c = ensure_coordinates(&self.geocoder, query).await?;
        let url = format!("{}/bin/api.pl", self.base_url);

        let parsed: CivilResponse = fetch_json(self.http.get(url).query(&[
            ("lon", c.longitude.to_string()),
            ("lat", c.latitude.to_string()),
            ("product", "civil".to_string()),
            ("output", "json".to_string()),
        ]))
        .await?;

        let point = parsed
            .dataseries
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::schema("empty 'dataseries'"))?;
        let locale = query.locale;

        Ok(WeatherReading {
            city: None,
            condition: units::seven_timer_condition(&point.weather, locale).to_string(),
            temperature: point.temp2m,
            wind: describe_civil_wind(&point.wind10m, locale),
        })
    }
}
