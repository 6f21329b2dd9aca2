use anyhow::Context;
use clap::{Parser, Subcommand};
use geoweather_core::{
    Config, Coordinates, FallbackOrchestrator, Locale, LocationQuery, ProviderId, WeatherResponse,
    config::redact,
};
use inquire::{Confirm, Password, Text};

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "geoweather", version, about = "Location-aware weather with provider fallback")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service.
    Serve {
        /// Address to bind, e.g. "0.0.0.0:3000". Defaults to the configured one.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Resolve location and weather once and print the result.
    Show {
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// City to look up by name.
        #[arg(long)]
        city: Option<String>,

        /// Client IP address to geolocate.
        #[arg(long)]
        ip: Option<String>,

        /// City hint, as an edge network would send it.
        #[arg(long)]
        city_hint: Option<String>,

        /// "zh" or "en". Defaults to the configured locale.
        #[arg(long)]
        lang: Option<String>,

        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Configure credentials or a private base URL for a provider.
    Configure {
        /// Provider short name, e.g. "qweather" or "amap".
        provider: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Serve { listen } => {
                let config = Config::from_environment()?;
                let listen = listen.unwrap_or_else(|| config.listen.clone());
                server::serve(&config, &listen).await
            }
            Command::Show { lat, lon, city, ip, city_hint, lang, json } => {
                let config = Config::from_environment()?;
                let locale = match lang {
                    Some(lang) => Locale::try_from(lang.as_str())?,
                    None => config.locale,
                };

                let mut query = LocationQuery::new(locale);
                query.coordinates = lat.zip(lon).map(|(lat, lon)| Coordinates::new(lat, lon));
                query.requested_city = city;
                query.client_address = ip;
                query.header_city = city_hint;

                let orchestrator = FallbackOrchestrator::from_config(&config)
                    .context("Failed to build provider chains")?;
                let response = orchestrator.handle(query).await;

                if json {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                } else {
                    print_human(&response);
                }

                if !response.is_success() {
                    anyhow::bail!("no weather provider succeeded");
                }
                Ok(())
            }
            Command::Configure { provider } => configure(&provider),
        }
    }
}

fn print_human(response: &WeatherResponse) {
    match &response.data {
        Some(data) => {
            let w = &data.weather;
            println!("{} · {} · {}°C", w.city, w.condition_text, w.temperature_value);
            println!("Wind: {}", w.wind_description);
            println!(
                "Observed {} via {} (location: {})",
                w.observed_at_local_time, w.provider_label, data.source_label
            );
        }
        None => {
            println!("{}", response.message.as_deref().unwrap_or("Weather is currently unavailable"));
        }
    }

    if let Some(trace) = &response.trace {
        for attempt in trace.location.iter().chain(trace.weather.iter()) {
            println!("  {:<12} {:?}", attempt.provider, attempt.outcome);
        }
    }
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if id.requires_key() || Confirm::new("Set an API key?").with_default(false).prompt()? {
        let key = Password::new(&format!("{id} API key:"))
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        let key = key.trim().to_string();
        if !key.is_empty() {
            println!("Stored key {}", redact(&key));
            config.upsert_provider_api_key(id, key);
        }
    }

    let base_url = Text::new("Base URL (leave empty for the public endpoint):")
        .with_default(id.default_base_url())
        .prompt()
        .context("Failed to read base URL")?;
    let base_url = base_url.trim();
    if !base_url.is_empty() && base_url != id.default_base_url() {
        config.set_provider_base_url(id, base_url.to_string());
        // Reject a malformed URL before it is written.
        config.provider_base_url(id)?;
    }

    config.save()?;
    println!("Saved {}", Config::config_file_path()?.display());
    Ok(())
}
