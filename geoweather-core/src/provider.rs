use crate::{
    Config,
    chain::{Provider, ProviderChain},
    error::{ConfigError, ProviderError},
    model::{CoordinateQuery, IpQuery, WeatherQuery, WeatherReading},
    provider::{
        amap::{AmapReverseGeocoder, AmapWeatherProvider},
        ip_api::IpApiLookup,
        nominatim::NominatimReverseGeocoder,
        open_meteo::{OpenMeteoGeocoder, OpenMeteoProvider},
        qweather::QWeatherProvider,
        seven_timer::SevenTimerProvider,
        vore::{VoreIpLookup, VoreWeatherProvider},
        wttr::WttrProvider,
        xxapi::XxapiIpLookup,
    },
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::{convert::TryFrom, sync::Arc};
use tracing::info;

pub mod amap;
pub mod ip_api;
pub mod nominatim;
pub mod open_meteo;
pub mod qweather;
pub mod seven_timer;
pub mod vore;
pub mod wttr;
pub mod xxapi;

const USER_AGENT: &str = concat!("geoweather/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    QWeather,
    Amap,
    OpenMeteo,
    OpenMeteoGeocoding,
    SevenTimer,
    Wttr,
    Vore,
    Xxapi,
    IpApi,
    Nominatim,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::QWeather => "qweather",
            ProviderId::Amap => "amap",
            ProviderId::OpenMeteo => "open-meteo",
            ProviderId::OpenMeteoGeocoding => "open-meteo-geocoding",
            ProviderId::SevenTimer => "7timer",
            ProviderId::Wttr => "wttr",
            ProviderId::Vore => "vore",
            ProviderId::Xxapi => "xxapi",
            ProviderId::IpApi => "ip-api",
            ProviderId::Nominatim => "nominatim",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::QWeather,
            ProviderId::Amap,
            ProviderId::OpenMeteo,
            ProviderId::OpenMeteoGeocoding,
            ProviderId::SevenTimer,
            ProviderId::Wttr,
            ProviderId::Vore,
            ProviderId::Xxapi,
            ProviderId::IpApi,
            ProviderId::Nominatim,
        ]
    }

    /// Weather chain, in priority order: keyed services first, then public ones.
    pub const fn weather_order() -> &'static [ProviderId] {
        &[
            ProviderId::QWeather,
            ProviderId::Amap,
            ProviderId::OpenMeteo,
            ProviderId::SevenTimer,
            ProviderId::Wttr,
            ProviderId::Vore,
        ]
    }

    pub const fn ip_lookup_order() -> &'static [ProviderId] {
        &[ProviderId::Vore, ProviderId::Xxapi, ProviderId::IpApi]
    }

    pub const fn reverse_geocode_order() -> &'static [ProviderId] {
        &[ProviderId::Amap, ProviderId::Nominatim]
    }

    pub fn requires_key(&self) -> bool {
        matches!(self, ProviderId::QWeather | ProviderId::Amap)
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderId::QWeather => "https://devapi.qweather.com",
            ProviderId::Amap => "https://restapi.amap.com",
            ProviderId::OpenMeteo => "https://api.open-meteo.com",
            ProviderId::OpenMeteoGeocoding => "https://geocoding-api.open-meteo.com",
            ProviderId::SevenTimer => "https://www.7timer.info",
            ProviderId::Wttr => "https://wttr.in",
            ProviderId::Vore => "https://api.vore.top",
            ProviderId::Xxapi => "https://v2.xxapi.cn",
            ProviderId::IpApi => "http://ip-api.com",
            ProviderId::Nominatim => "https://nominatim.openstreetmap.org",
        }
    }

    /// Fragment used in environment variable names, e.g. `OPEN_METEO`.
    pub fn env_name(&self) -> String {
        self.as_str().to_uppercase().replace('-', "_")
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        ProviderId::all().iter().copied().find(|id| id.as_str() == lower).ok_or_else(|| {
            let known: Vec<&str> = ProviderId::all().iter().map(ProviderId::as_str).collect();
            anyhow::anyhow!("Unknown provider '{value}'. Supported providers: {}.", known.join(", "))
        })
    }
}

/// Shared HTTP client: one connection pool per process.
pub fn http_client() -> Result<Client, ConfigError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Every provider chain, in the static order they are consulted.
#[derive(Debug, Clone)]
pub struct ProviderChains {
    pub reverse_geocoders: ProviderChain<CoordinateQuery, String>,
    pub ip_lookups: ProviderChain<IpQuery, String>,
    pub weather: ProviderChain<WeatherQuery, WeatherReading>,
}

impl ProviderChains {
    /// Build all chains. Fails when no weather provider is usable.
    pub fn from_config(config: &Config, http: &Client) -> Result<Self, ConfigError> {
        let geocoder = OpenMeteoGeocoder::new(
            http.clone(),
            config.provider_base_url(ProviderId::OpenMeteoGeocoding)?,
        );

        let mut weather: ProviderChain<WeatherQuery, WeatherReading> = Vec::new();
        for id in ProviderId::weather_order() {
            if config.is_provider_enabled(*id) {
                weather.push(weather_provider(*id, config, http, &geocoder)?);
            }
        }

        if weather.is_empty() {
            return Err(ConfigError::NoWeatherProvider);
        }

        let mut ip_lookups: ProviderChain<IpQuery, String> = Vec::new();
        for id in ProviderId::ip_lookup_order() {
            if !config.is_provider_enabled(*id) {
                continue;
            }
            let base_url = config.provider_base_url(*id)?;
            let timeout = config.provider_timeout(*id);
            let lookup: Arc<dyn Provider<IpQuery, String>> = match id {
                ProviderId::Vore => Arc::new(VoreIpLookup::new(http.clone(), base_url, timeout)),
                ProviderId::Xxapi => Arc::new(XxapiIpLookup::new(http.clone(), base_url, timeout)),
                _ => Arc::new(IpApiLookup::new(http.clone(), base_url, timeout)),
            };
            ip_lookups.push(lookup);
        }

        let mut reverse_geocoders: ProviderChain<CoordinateQuery, String> = Vec::new();
        for id in ProviderId::reverse_geocode_order() {
            if !config.is_provider_enabled(*id) {
                continue;
            }
            let base_url = config.provider_base_url(*id)?;
            let timeout = config.provider_timeout(*id);
            match (id, config.provider_api_key(*id)) {
                (ProviderId::Amap, Some(key)) => reverse_geocoders.push(Arc::new(
                    AmapReverseGeocoder::new(key.to_owned(), http.clone(), base_url, timeout),
                )),
                (ProviderId::Nominatim, _) => reverse_geocoders
                    .push(Arc::new(NominatimReverseGeocoder::new(http.clone(), base_url, timeout))),
                _ => {}
            }
        }

        info!(
            weather = ?names(&weather),
            ip_lookup = ?names(&ip_lookups),
            reverse_geocode = ?names(&reverse_geocoders),
            "provider chains ready"
        );

        Ok(Self { reverse_geocoders, ip_lookups, weather })
    }
}

fn names<Q: Send, T>(chain: &ProviderChain<Q, T>) -> Vec<&'static str> {
    chain.iter().map(|p| p.name()).collect()
}

/// Construct a weather provider from config and explicit ProviderId.
fn weather_provider(
    id: ProviderId,
    config: &Config,
    http: &Client,
    geocoder: &OpenMeteoGeocoder,
) -> Result<Arc<dyn Provider<WeatherQuery, WeatherReading>>, ConfigError> {
    let base_url = config.provider_base_url(id)?;
    let timeout = config.provider_timeout(id);
    let key = || config.provider_api_key(id).unwrap_or_default().to_owned();

    let provider: Arc<dyn Provider<WeatherQuery, WeatherReading>> = match id {
        ProviderId::QWeather => {
            Arc::new(QWeatherProvider::new(key(), http.clone(), base_url, timeout))
        }
        ProviderId::Amap => Arc::new(AmapWeatherProvider::new(key(), http.clone(), base_url, timeout)),
        ProviderId::OpenMeteo => Arc::new(OpenMeteoProvider::new(
            http.clone(),
            base_url,
            geocoder.clone(),
            timeout,
        )),
        ProviderId::SevenTimer => Arc::new(SevenTimerProvider::new(
            http.clone(),
            base_url,
            geocoder.clone(),
            timeout,
        )),
        ProviderId::Wttr => Arc::new(WttrProvider::new(http.clone(), base_url, timeout)),
        ProviderId::Vore => Arc::new(VoreWeatherProvider::new(http.clone(), base_url, timeout)),
        other => return Err(ConfigError::NotAWeatherProvider(other.as_str())),
    };

    Ok(provider)
}

/// Send `request`, require a 2xx status and decode the JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let res = request.send().await?;

    let status = res.status();
    let body = res.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Status { status: status.as_u16(), body: truncate_body(&body) });
    }

    Ok(serde_json::from_str(&body)?)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        let head: String = body.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

/// Parse a numeric field some providers send as a string ("23", "-1.5").
pub(crate) fn parse_number(field: &str, value: &str) -> Result<f64, ProviderError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProviderError::schema(format!("field '{field}' is not a number: {value:?}")))
}
