use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::{error::ConfigError, model::Locale, provider::ProviderId};

/// Environment variable prefix for every override.
pub const ENV_PREFIX: &str = "GEOWEATHER";

/// Per-provider settings (credentials, private host, timeout).
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override, for self-hosted or private deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { api_key: None, base_url: None, timeout_ms: None, enabled: true }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Keep a short prefix of a secret so operators can tell keys apart.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…")
}

/// Top-level configuration stored on disk, overlaid by the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// City used when nothing better is known.
    pub default_city: String,

    pub locale: Locale,

    /// Offset of the zone `observedAtLocalTime` is rendered in.
    pub utc_offset_minutes: i32,

    /// Overall deadline for one request.
    pub request_timeout_ms: u64,

    /// Timeout for providers without their own `timeout_ms`.
    pub provider_timeout_ms: u64,

    /// Include attempt traces in responses. Keep off in production.
    pub expose_trace: bool,

    /// Include the unauthenticated public providers in the chains.
    pub public_providers: bool,

    pub listen: String,

    /// Request header carrying a city pre-resolved by the edge network.
    pub header_city_header: String,

    /// Request header carrying the edge platform's coarse geo city.
    pub edge_city_header: String,

    /// Example TOML:
    /// [providers.qweather]
    /// api_key = "..."
    /// base_url = "https://devapi.qweather.com"
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_city: "北京".to_string(),
            locale: Locale::Zh,
            utc_offset_minutes: 8 * 60,
            request_timeout_ms: 10_000,
            provider_timeout_ms: 4_000,
            expose_trace: false,
            public_providers: true,
            listen: "127.0.0.1:3000".to_string(),
            header_city_header: "x-vercel-ip-city".to_string(),
            edge_city_header: "cf-ipcity".to_string(),
            providers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Config file plus `GEOWEATHER_*` process environment overrides.
    pub fn from_environment() -> Result<Self> {
        let mut cfg = Self::load()?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file; `GEOWEATHER_CONFIG` overrides the platform default.
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("dev", "geoweather", "geoweather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay environment-style settings. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(city) = var("DEFAULT_CITY") {
            self.default_city = city.trim().to_string();
        }
        if let Some(locale) = var("LOCALE") {
            self.locale = Locale::try_from(locale.as_str())?;
        }
        if let Some(listen) = var("LISTEN") {
            self.listen = listen;
        }
        if let Some(flag) = var("EXPOSE_TRACE") {
            self.expose_trace = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(ms) = var("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}_REQUEST_TIMEOUT_MS: {ms}"))?;
        }

        for id in ProviderId::all() {
            let key = var(&format!("{}_KEY", id.env_name()));
            let base_url = var(&format!("{}_BASE_URL", id.env_name()));

            if key.is_none() && base_url.is_none() {
                continue;
            }

            let entry = self.providers.entry(id.as_str().to_string()).or_default();
            if let Some(key) = key {
                entry.api_key = Some(key.trim().to_string());
            }
            if let Some(url) = base_url {
                entry.base_url = Some(url.trim().to_string());
            }
        }

        Ok(())
    }

    /// Set/replace a provider API key.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.entry(provider_id.as_str().to_string()).or_default().api_key =
            Some(api_key);
    }

    pub fn set_provider_base_url(&mut self, provider_id: ProviderId, base_url: String) {
        self.providers.entry(provider_id.as_str().to_string()).or_default().base_url =
            Some(base_url);
    }

    /// Returns API key for a provider, if present and non-blank.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id)
            .and_then(|cfg| cfg.api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    /// Whether the provider takes part in its chain.
    pub fn is_provider_enabled(&self, provider_id: ProviderId) -> bool {
        let enabled = self.provider_config(provider_id).is_none_or(|cfg| cfg.enabled);
        if !enabled {
            return false;
        }
        if provider_id.requires_key() {
            self.is_provider_configured(provider_id)
        } else {
            self.public_providers
        }
    }

    /// Validated base URL without a trailing slash.
    pub fn provider_base_url(&self, provider_id: ProviderId) -> Result<String, ConfigError> {
        let url = self
            .provider_config(provider_id)
            .and_then(|cfg| cfg.base_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(provider_id.default_base_url());

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl {
                provider: provider_id.to_string(),
                url: url.to_string(),
            });
        }

        Ok(url.trim_end_matches('/').to_string())
    }

    pub fn provider_timeout(&self, provider_id: ProviderId) -> Duration {
        let ms = self
            .provider_config(provider_id)
            .and_then(|cfg| cfg.timeout_ms)
            .unwrap_or(self.provider_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Display zone for timestamps; out-of-range offsets fall back to UTC.
    pub fn display_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    /// Default city with surrounding whitespace removed; never empty.
    pub fn fallback_city(&self) -> String {
        let city = self.default_city.trim();
        if city.is_empty() { Config::default().default_city } else { city.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn set_api_key_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::QWeather, "QW_KEY".into());

        let key = cfg.provider_api_key(ProviderId::QWeather);
        assert_eq!(key, Some("QW_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::QWeather));
        assert!(!cfg.is_provider_configured(ProviderId::Amap));
    }

    #[test]
    fn keyed_providers_need_a_key_public_ones_need_the_switch() {
        let mut cfg = Config::default();
        assert!(!cfg.is_provider_enabled(ProviderId::QWeather));
        assert!(cfg.is_provider_enabled(ProviderId::OpenMeteo));

        cfg.public_providers = false;
        assert!(!cfg.is_provider_enabled(ProviderId::OpenMeteo));

        cfg.upsert_provider_api_key(ProviderId::QWeather, "K".into());
        assert!(cfg.is_provider_enabled(ProviderId::QWeather));

        cfg.providers.get_mut("qweather").unwrap().enabled = false;
        assert!(!cfg.is_provider_enabled(ProviderId::QWeather));
    }

    #[test]
    fn blank_key_is_not_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::Amap, "   ".into());
        assert!(!cfg.is_provider_configured(ProviderId::Amap));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::QWeather, "FROM_FILE".into());

        cfg.apply_env(env(&[
            ("GEOWEATHER_QWEATHER_KEY", "FROM_ENV"),
            ("GEOWEATHER_QWEATHER_BASE_URL", "https://qw.example.com/"),
            ("GEOWEATHER_AMAP_KEY", "AMAP"),
            ("GEOWEATHER_DEFAULT_CITY", " 上海 "),
            ("GEOWEATHER_LOCALE", "en"),
            ("GEOWEATHER_EXPOSE_TRACE", "true"),
        ]))
        .unwrap();

        assert_eq!(cfg.provider_api_key(ProviderId::QWeather), Some("FROM_ENV"));
        assert_eq!(cfg.provider_api_key(ProviderId::Amap), Some("AMAP"));
        assert_eq!(
            cfg.provider_base_url(ProviderId::QWeather).unwrap(),
            "https://qw.example.com"
        );
        assert_eq!(cfg.default_city, "上海");
        assert_eq!(cfg.locale, Locale::En);
        assert!(cfg.expose_trace);
    }

    #[test]
    fn invalid_environment_locale_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_env(env(&[("GEOWEATHER_LOCALE", "klingon")])).unwrap_err();
        assert!(err.to_string().contains("Unknown locale"));
    }

    #[test]
    fn base_url_must_be_http() {
        let mut cfg = Config::default();
        cfg.set_provider_base_url(ProviderId::Wttr, "ftp://wttr.local".into());

        let err = cfg.provider_base_url(ProviderId::Wttr).unwrap_err();
        assert!(err.to_string().contains("Invalid base URL"));
        assert_eq!(cfg.provider_base_url(ProviderId::OpenMeteo).unwrap(), "https://api.open-meteo.com");
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::QWeather, "abcdef0123456789".into());

        let debug = format!("{cfg:?}");
        assert!(debug.contains("abcd…"));
        assert!(!debug.contains("abcdef0123456789"));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            default_city = "杭州"
            expose_trace = true

            [providers.qweather]
            api_key = "KEY"
            timeout_ms = 1500

            [providers.wttr]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.default_city, "杭州");
        assert_eq!(cfg.locale, Locale::Zh);
        assert_eq!(cfg.provider_timeout(ProviderId::QWeather), Duration::from_millis(1500));
        assert_eq!(cfg.provider_timeout(ProviderId::Amap), Duration::from_millis(4000));
        assert!(!cfg.is_provider_enabled(ProviderId::Wttr));
        assert!(cfg.is_provider_enabled(ProviderId::SevenTimer));
    }

    #[test]
    fn display_offset_defaults_to_utc_plus_eight() {
        let cfg = Config::default();
        assert_eq!(cfg.display_offset().local_minus_utc(), 8 * 3600);
    }
}
