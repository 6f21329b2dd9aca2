use serde::{Deserialize, Serialize};

use crate::chain::AttemptTrace;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Both components finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Display language for condition text, wind descriptions and placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Zh,
    En,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Zh => "zh",
            Locale::En => "en",
        }
    }

    /// Text used when a provider reports a condition we have no mapping for.
    pub fn unknown(&self) -> &'static str {
        match self {
            Locale::Zh => "未知",
            Locale::En => "Unknown",
        }
    }

    /// Display name used when coordinates are known but could not be named.
    pub fn current_location(&self) -> &'static str {
        match self {
            Locale::Zh => "当前位置",
            Locale::En => "Current Location",
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Locale {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "zh" | "zh-cn" | "zh_cn" | "cn" => Ok(Locale::Zh),
            "en" | "en-us" | "en_us" | "en-gb" => Ok(Locale::En),
            _ => Err(anyhow::anyhow!("Unknown locale '{value}'. Supported locales: zh, en.")),
        }
    }
}

/// Everything known about the caller's whereabouts at request time.
#[derive(Debug, Clone, Default)]
pub struct LocationQuery {
    /// Browser/device supplied coordinates.
    pub coordinates: Option<Coordinates>,
    /// City named explicitly by the caller (`?city=`).
    pub requested_city: Option<String>,
    /// Network origin of the caller.
    pub client_address: Option<String>,
    /// City pre-resolved by an edge network layer in front of us.
    pub header_city: Option<String>,
    /// Coarse city from the edge platform's own geo database.
    pub edge_city: Option<String>,
    pub locale: Locale,
}

impl LocationQuery {
    pub fn new(locale: Locale) -> Self {
        Self { locale, ..Self::default() }
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_requested_city(mut self, city: impl Into<String>) -> Self {
        self.requested_city = Some(city.into());
        self
    }

    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    pub fn with_header_city(mut self, city: impl Into<String>) -> Self {
        self.header_city = Some(city.into());
        self
    }

    pub fn with_edge_city(mut self, city: impl Into<String>) -> Self {
        self.edge_city = Some(city.into());
        self
    }
}

/// Which strategy produced a [`ResolvedLocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    #[serde(rename = "GPS")]
    Gps,
    HeaderHint,
    #[serde(rename = "IPLookup")]
    IpLookup,
    EdgeGeo,
    StaticDefault,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::Gps => "GPS",
            LocationSource::HeaderHint => "HeaderHint",
            LocationSource::IpLookup => "IPLookup",
            LocationSource::EdgeGeo => "EdgeGeo",
            LocationSource::StaticDefault => "StaticDefault",
        }
    }
}

impl std::fmt::Display for LocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the location stage. `city_search_term` is never empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub city_search_term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    pub source: LocationSource,
    /// The city term is a display placeholder, not something a provider can search for.
    pub placeholder: bool,
    #[serde(skip)]
    pub trace: AttemptTrace,
}

/// The stable output contract every weather provider is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedWeather {
    pub city: String,
    pub condition_text: String,
    pub temperature_value: f64,
    pub wind_description: String,
    pub observed_at_local_time: String,
    pub provider_label: String,
}

/// What a weather adapter extracts from its provider.
///
/// The resolver completes it into a [`NormalizedWeather`] by filling in the
/// best-known city, the provider label and the display timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    /// Corrected city name, when the provider reports one.
    pub city: Option<String>,
    pub condition: String,
    pub temperature: f64,
    pub wind: String,
}

impl WeatherReading {
    pub fn is_complete(&self) -> bool {
        !self.condition.trim().is_empty()
            && !self.wind.trim().is_empty()
            && self.temperature.is_finite()
    }
}

/// Per-request context handed down the weather chain.
///
/// Providers that learn a better city name or coordinates write them back
/// here, so later providers start from the best-known location.
#[derive(Debug, Clone)]
pub struct WeatherQuery {
    pub city: String,
    /// `false` when `city` is only a display placeholder.
    pub searchable: bool,
    pub coordinates: Option<Coordinates>,
    pub locale: Locale,
    /// A by-name geocoding sub-call already ran for this request.
    pub geocoded: bool,
}

impl WeatherQuery {
    pub fn from_location(location: &ResolvedLocation, locale: Locale) -> Self {
        Self {
            city: location.city_search_term.clone(),
            searchable: !location.placeholder,
            coordinates: location.coordinates,
            locale,
            geocoded: false,
        }
    }

    /// City name to search by, if there is a real one.
    pub fn search_city(&self) -> Option<&str> {
        if self.searchable && !self.city.trim().is_empty() {
            Some(self.city.as_str())
        } else {
            None
        }
    }
}

/// Input of an IP lookup provider.
#[derive(Debug, Clone)]
pub struct IpQuery {
    pub address: String,
    pub locale: Locale,
}

/// Input of a reverse-geocoding provider.
#[derive(Debug, Clone)]
pub struct CoordinateQuery {
    pub coordinates: Coordinates,
    pub locale: Locale,
}
