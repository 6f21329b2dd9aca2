//! Walks the weather chain for a resolved location and normalizes the
//! winning provider's reading.

use chrono::{FixedOffset, Utc};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    chain::{AttemptTrace, ProviderChain, first_success},
    error::{AllProvidersFailed, ProviderError},
    location::usable_city,
    model::{Locale, NormalizedWeather, ResolvedLocation, WeatherQuery, WeatherReading},
    units,
};

/// A successful resolution and the attempts it took.
#[derive(Debug, Clone)]
pub struct ResolvedWeather {
    pub weather: NormalizedWeather,
    pub trace: AttemptTrace,
}

fn accept_reading(reading: &WeatherReading) -> Result<(), ProviderError> {
    if reading.is_complete() {
        Ok(())
    } else {
        Err(ProviderError::schema("incomplete reading"))
    }
}

#[derive(Debug, Clone)]
pub struct WeatherResolver {
    chain: ProviderChain<WeatherQuery, WeatherReading>,
    display_offset: FixedOffset,
}

impl WeatherResolver {
    pub fn new(chain: ProviderChain<WeatherQuery, WeatherReading>, display_offset: FixedOffset) -> Self {
        Self { chain, display_offset }
    }

    pub async fn resolve(
        &self,
        location: &ResolvedLocation,
        locale: Locale,
        deadline: Instant,
    ) -> Result<ResolvedWeather, AllProvidersFailed> {
        let mut query = WeatherQuery::from_location(location, locale);
        let mut trace = AttemptTrace::default();

        let Some(win) = first_success(&self.chain, &mut query, deadline, &mut trace, accept_reading).await
        else {
            warn!(city = %query.city, attempts = trace.len(), "every weather provider failed");
            return Err(AllProvidersFailed { trace });
        };

        // A provider's own city name beats the best-known one carried in the query.
        let city = win
            .value
            .city
            .as_deref()
            .and_then(usable_city)
            .unwrap_or_else(|| query.city.clone());

        info!(provider = win.provider, %city, "weather resolved");

        let reading = win.value;
        Ok(ResolvedWeather {
            weather: NormalizedWeather {
                city,
                condition_text: reading.condition,
                temperature_value: reading.temperature,
                wind_description: reading.wind,
                observed_at_local_time: units::display_time(Utc::now(), self.display_offset),
                provider_label: win.label.to_string(),
            },
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{AttemptOutcome, Provider},
        model::{Coordinates, LocationSource},
        testing::{FakeProvider, Script},
    };
    use std::{
        sync::{Arc, atomic::Ordering},
        time::Duration,
    };

    fn reading(city: Option<&str>) -> WeatherReading {
        WeatherReading {
            city: city.map(str::to_string),
            condition: "晴".into(),
            temperature: 21.0,
            wind: "北风 2级".into(),
        }
    }

    fn location(city: &str) -> ResolvedLocation {
        ResolvedLocation {
            city_search_term: city.into(),
            coordinates: None,
            source: LocationSource::IpLookup,
            placeholder: false,
            trace: AttemptTrace::default(),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn beijing() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[tokio::test]
    async fn first_success_short_circuits_the_chain() {
        let fakes: Vec<FakeProvider<WeatherQuery, WeatherReading>> = vec![
            FakeProvider::<WeatherQuery, WeatherReading>::new("a", Script::Transport),
            FakeProvider::<WeatherQuery, WeatherReading>::new("b", Script::Succeed(reading(None))),
            FakeProvider::<WeatherQuery, WeatherReading>::new("c", Script::Succeed(reading(None))),
            FakeProvider::<WeatherQuery, WeatherReading>::new("d", Script::Succeed(reading(None))),
        ];
        let counters: Vec<_> = fakes.iter().map(FakeProvider::counter).collect();
        let chain: ProviderChain<WeatherQuery, WeatherReading> =
            fakes.into_iter().map(|f| Arc::new(f) as Arc<dyn Provider<_, _>>).collect();

        let resolved = WeatherResolver::new(chain, beijing())
            .resolve(&location("上海"), Locale::Zh, far_deadline())
            .await
            .unwrap();

        let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(calls, vec![1, 1, 0, 0]);
        assert_eq!(resolved.weather.provider_label, "b");
        assert_eq!(resolved.weather.city, "上海");
        assert_eq!(resolved.trace.len(), 2);
    }

    #[tokio::test]
    async fn transport_failures_everywhere_exhaust_the_chain() {
        let chain: ProviderChain<WeatherQuery, WeatherReading> = (0..5)
            .map(|_| {
                Arc::new(FakeProvider::<WeatherQuery, WeatherReading>::new("down", Script::Transport))
                    as Arc<dyn Provider<_, _>>
            })
            .collect();

        let err = WeatherResolver::new(chain, beijing())
            .resolve(&location("上海"), Locale::Zh, far_deadline())
            .await
            .unwrap_err();

        assert_eq!(err.trace.len(), 5);
        assert!(err.trace.iter().all(|a| matches!(a.outcome, AttemptOutcome::Failure { .. })));
    }

    #[tokio::test]
    async fn incomplete_reading_is_a_failure() {
        let partial = WeatherReading { condition: " ".into(), ..reading(None) };
        let chain: ProviderChain<WeatherQuery, WeatherReading> = vec![
            Arc::new(FakeProvider::<WeatherQuery, WeatherReading>::new("partial", Script::Succeed(partial))),
            Arc::new(FakeProvider::<WeatherQuery, WeatherReading>::new("full", Script::Succeed(reading(Some("苏州市"))))),
        ];

        let resolved = WeatherResolver::new(chain, beijing())
            .resolve(&location("苏州"), Locale::Zh, far_deadline())
            .await
            .unwrap();

        assert!(matches!(resolved.trace.attempts()[0].outcome, AttemptOutcome::Failure { .. }));
        assert_eq!(resolved.weather.provider_label, "full");
        assert_eq!(resolved.weather.city, "苏州");
    }

    #[tokio::test]
    async fn best_known_city_survives_a_failed_provider() {
        let chain: ProviderChain<WeatherQuery, WeatherReading> = vec![
            Arc::new(
                FakeProvider::<WeatherQuery, WeatherReading>::new("lookup", Script::Schema("now failed"))
                    .refining(|q| {
                        q.city = "Xi'an".into();
                        q.coordinates = Some(Coordinates::new(34.26, 108.94));
                    }),
            ),
            Arc::new(FakeProvider::<WeatherQuery, WeatherReading>::new("coords", Script::Succeed(reading(None)))),
        ];

        let resolved = WeatherResolver::new(chain, beijing())
            .resolve(&location("xian"), Locale::En, far_deadline())
            .await
            .unwrap();

        assert_eq!(resolved.weather.city, "Xi'an");
    }

    #[tokio::test]
    async fn elapsed_deadline_ends_in_failure() {
        let slow = FakeProvider::<WeatherQuery, WeatherReading>::new("slow", Script::Hang);
        let never = FakeProvider::<WeatherQuery, WeatherReading>::new("never", Script::Succeed(reading(None)));
        let never_calls = never.counter();
        let chain: ProviderChain<WeatherQuery, WeatherReading> = vec![Arc::new(slow), Arc::new(never)];

        let err = WeatherResolver::new(chain, beijing())
            .resolve(&location("上海"), Locale::Zh, Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();

        assert_eq!(err.trace.attempts()[0].outcome, AttemptOutcome::TimedOut);
        assert_eq!(err.trace.len(), 1);
        assert_eq!(never_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn observed_time_is_hh_mm() {
        let chain: ProviderChain<WeatherQuery, WeatherReading> =
            vec![Arc::new(FakeProvider::<WeatherQuery, WeatherReading>::new("ok", Script::Succeed(reading(None))))];

        let resolved = WeatherResolver::new(chain, beijing())
            .resolve(&location("上海"), Locale::Zh, far_deadline())
            .await
            .unwrap();

        let time = resolved.weather.observed_at_local_time;
        assert_eq!(time.len(), 5);
        assert_eq!(&time[2..3], ":");
    }
}
