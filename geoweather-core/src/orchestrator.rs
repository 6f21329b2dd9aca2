//! One request, end to end: locate the caller, then fetch their weather.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::{
    Config,
    chain::AttemptTrace,
    error::ConfigError,
    location::LocationResolver,
    model::{Locale, LocationQuery, LocationSource, NormalizedWeather, ResolvedLocation},
    provider::{ProviderChains, http_client},
    weather::WeatherResolver,
};

/// Successful payload: the normalized weather plus where the location came from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    #[serde(flatten)]
    pub weather: NormalizedWeather,
    pub source_label: LocationSource,
    pub client_address: Option<String>,
}

/// Attempts made by both stages of a request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestTrace {
    pub location: AttemptTrace,
    pub weather: AttemptTrace,
}

/// What the caller gets back. Serialized as-is by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<WeatherData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<RequestTrace>,
}

impl WeatherResponse {
    pub fn is_success(&self) -> bool {
        self.success
    }
}

fn unavailable_message(locale: Locale) -> &'static str {
    match locale {
        Locale::Zh => "天气服务暂时不可用",
        Locale::En => "Weather is currently unavailable",
    }
}

#[derive(Debug, Clone)]
pub struct FallbackOrchestrator {
    locations: LocationResolver,
    weather: WeatherResolver,
    request_timeout: Duration,
    expose_trace: bool,
}

impl FallbackOrchestrator {
    pub fn new(
        locations: LocationResolver,
        weather: WeatherResolver,
        request_timeout: Duration,
        expose_trace: bool,
    ) -> Self {
        Self { locations, weather, request_timeout, expose_trace }
    }

    /// Build every provider chain once. Fails if no weather provider is usable.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let http = http_client()?;
        let chains = ProviderChains::from_config(config, &http)?;

        Ok(Self::new(
            LocationResolver::new(chains.reverse_geocoders, chains.ip_lookups, config.fallback_city()),
            WeatherResolver::new(chains.weather, config.display_offset()),
            config.request_timeout(),
            config.expose_trace,
        ))
    }

    /// Location stage only.
    pub async fn locate(&self, query: &LocationQuery) -> ResolvedLocation {
        self.locations.resolve(query, Instant::now() + self.request_timeout).await
    }

    pub async fn handle(&self, query: LocationQuery) -> WeatherResponse {
        let deadline = Instant::now() + self.request_timeout;

        let location = self.locations.resolve(&query, deadline).await;
        let result = self.weather.resolve(&location, query.locale, deadline).await;

        let (data, message, weather_trace) = match result {
            Ok(resolved) => {
                let data = WeatherData {
                    weather: resolved.weather,
                    source_label: location.source,
                    client_address: query.client_address.clone(),
                };
                (Some(data), None, resolved.trace)
            }
            Err(failed) => {
                info!(error = %failed, "responding with unavailable");
                (None, Some(unavailable_message(query.locale).to_string()), failed.trace)
            }
        };

        let trace = self
            .expose_trace
            .then(|| RequestTrace { location: location.trace, weather: weather_trace });

        WeatherResponse { success: data.is_some(), data, message, trace }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{AttemptOutcome, ProviderChain},
        model::{CoordinateQuery, Coordinates, IpQuery, WeatherQuery, WeatherReading},
        testing::{FakeProvider, Script},
    };
    use chrono::FixedOffset;
    use std::sync::{Arc, atomic::Ordering};

    type WeatherFake = FakeProvider<WeatherQuery, WeatherReading>;

    fn reading(city: Option<&str>) -> WeatherReading {
        WeatherReading {
            city: city.map(str::to_string),
            condition: "Cloudy".into(),
            temperature: 18.0,
            wind: "NE 9 km/h".into(),
        }
    }

    fn orchestrator(
        reverse_geocoders: ProviderChain<CoordinateQuery, String>,
        ip_lookups: ProviderChain<IpQuery, String>,
        weather: ProviderChain<WeatherQuery, WeatherReading>,
    ) -> FallbackOrchestrator {
        FallbackOrchestrator::new(
            LocationResolver::new(reverse_geocoders, ip_lookups, "北京".into()),
            WeatherResolver::new(weather, FixedOffset::east_opt(8 * 3600).unwrap()),
            Duration::from_secs(5),
            true,
        )
    }

    #[tokio::test]
    async fn ip_lookup_feeds_the_weather_chain() {
        let o = orchestrator(
            vec![],
            vec![Arc::new(FakeProvider::<IpQuery, String>::new(
                "vore-ip",
                Script::Succeed("Shanghai".into()),
            ))],
            vec![Arc::new(WeatherFake::new("qweather", Script::Succeed(reading(Some("Shanghai"))))
                .refining(|q| assert_eq!(q.city, "Shanghai")))],
        );

        let response = o
            .handle(LocationQuery::new(Locale::En).with_client_address("203.0.113.9"))
            .await;

        let data = response.data.unwrap();
        assert!(response.success);
        assert_eq!(data.weather.city, "Shanghai");
        assert_eq!(data.source_label, LocationSource::IpLookup);
        assert_eq!(data.client_address.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn coordinates_suffice_when_reverse_geocoding_is_down() {
        let o = orchestrator(
            vec![Arc::new(FakeProvider::<CoordinateQuery, String>::new("nominatim", Script::Transport))],
            vec![],
            vec![Arc::new(WeatherFake::new("qweather", Script::Succeed(reading(None))).refining(
                |q| {
                    assert_eq!(q.coordinates, Some(Coordinates::new(39.9, 116.4)));
                    assert!(q.search_city().is_none());
                },
            ))],
        );

        let response = o
            .handle(LocationQuery::new(Locale::En).with_coordinates(Coordinates::new(39.9, 116.4)))
            .await;

        let data = response.data.unwrap();
        assert_eq!(data.source_label, LocationSource::Gps);
        assert_eq!(data.weather.city, "Current Location");
        assert_eq!(data.weather.provider_label, "qweather");
    }

    #[tokio::test]
    async fn all_weather_providers_failing_is_a_structured_failure() {
        let o = orchestrator(
            vec![],
            vec![],
            vec![
                Arc::new(WeatherFake::new("qweather", Script::Transport)),
                Arc::new(WeatherFake::new("open-meteo", Script::Schema("missing 'current'"))),
                Arc::new(
                    WeatherFake::new("wttr.in", Script::Hang).with_timeout(Duration::from_millis(20)),
                ),
            ],
        );

        let response = o.handle(LocationQuery::new(Locale::Zh)).await;

        assert!(!response.is_success());
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("天气服务暂时不可用"));
        let trace = response.trace.unwrap().weather;
        assert_eq!(trace.len(), 3);
        assert!(trace.iter().all(|a| a.outcome != AttemptOutcome::Success));
        assert_eq!(trace.attempts()[2].outcome, AttemptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn second_provider_wins_after_primary_lookup_miss() {
        let primary = WeatherFake::new("qweather", Script::Schema("city lookup found no match"));
        let secondary = WeatherFake::new("amap", Script::Succeed(reading(None)))
            .refining(|q| assert_eq!(q.search_city(), Some("苏州")));
        let tail = WeatherFake::new("open-meteo", Script::Succeed(reading(None)));
        let tail_calls = tail.counter();

        let o = orchestrator(
            vec![],
            vec![],
            vec![Arc::new(primary), Arc::new(secondary), Arc::new(tail)],
        );

        let response = o
            .handle(LocationQuery::new(Locale::En).with_header_city("苏州市"))
            .await;

        let trace = response.trace.clone().unwrap().weather;
        assert!(matches!(trace.attempts()[0].outcome, AttemptOutcome::Failure { .. }));
        assert_eq!(trace.attempts()[1].outcome, AttemptOutcome::Success);
        assert_eq!(response.data.unwrap().weather.provider_label, "amap");
        assert_eq!(tail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trace_is_hidden_unless_exposed() {
        let mut o = orchestrator(
            vec![],
            vec![],
            vec![Arc::new(WeatherFake::new("wttr.in", Script::Succeed(reading(None))))],
        );
        o.expose_trace = false;

        let response = o.handle(LocationQuery::new(Locale::Zh)).await;
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], true);
        assert!(json.get("trace").is_none());
        assert_eq!(json["data"]["city"], "北京");
        assert_eq!(json["data"]["sourceLabel"], "StaticDefault");
        assert_eq!(json["data"]["providerLabel"], "wttr.in");
    }
}
