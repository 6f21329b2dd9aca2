use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{Locale, WeatherQuery, WeatherReading},
    provider::{fetch_json, parse_number},
    units,
};

/// wttr.in JSON (`format=j1`). Accepts either coordinates or a city name in
/// the path.
#[derive(Debug, Clone)]
pub struct WttrProvider {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl WttrProvider {
    pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
        Self { base_url, http, timeout }
    }

    fn url_for(&self, location: &str, locale: Locale) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Transport(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::Transport("base url cannot carry a path".into()))?
            .pop_if_empty()
            .push(location);
        url.query_pairs_mut().append_pair("format", "j1").append_pair("lang", locale.as_str());
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct WttrResponse {
    #[serde(default)]
    current_condition: Vec<WttrCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WttrCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(default)]
    weather_desc: Vec<WttrText>,
    #[serde(rename = "lang_zh", default)]
    lang_zh: Vec<WttrText>,
    winddir_degree: String,
    windspeed_kmph: String,
}

#[derive(Debug, Deserialize)]
struct WttrText {
    value: String,
}

fn first_text(texts: &[WttrText]) -> Option<&str> {
    texts.iter().map(|t| t.value.trim()).find(|v| !v.is_empty())
}

#[async_trait]
impl Provider<WeatherQuery, WeatherReading> for WttrProvider {
    fn name(&self) -> &'static str {
        "wttr.in"
    }

    fn label(&self) -> &'static str {
        "wttr.in"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut WeatherQuery) -> Result<WeatherReading, ProviderError> {
        let location = match (query.coordinates, query.search_city()) {
            (Some(c), _) => format!("{},{}", c.latitude, c.longitude),
            (None, Some(city)) => city.to_owned(),
            (None, None) => {
                return Err(ProviderError::Unsupported("needs coordinates or a city name".into()));
            }
        };
        let locale = query.locale;

        let parsed: WttrResponse =
            fetch_json(self.http.get(self.url_for(&location, locale)?)).await?;

        let current = parsed
            .current_condition
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::schema("empty 'current_condition'"))?;

        let condition = match locale {
            Locale::Zh => first_text(&current.lang_zh).or_else(|| first_text(&current.weather_desc)),
            Locale::En => first_text(&current.weather_desc),
        }
        .ok_or_else(|| ProviderError::schema("missing 'weatherDesc'"))?
        .to_string();

        let degrees = parse_number("winddirDegree", &current.winddir_degree)?;
        let speed = parse_number("windspeedKmph", &current.windspeed_kmph)?;

        Ok(WeatherReading {
            city: None,
            condition,
            temperature: parse_number("temp_C", &current.temp_c)?,
            wind: units::describe_wind(degrees, speed, locale),
        })
    }
}
