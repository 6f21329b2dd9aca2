//! Core library for the `geoweather` service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Provider adapters and the ordered chains they form
//! - Location and weather resolution with provider fallback
//! - Shared domain models (queries, normalized weather, traces)
//!
//! It is used by `geoweather-cli`, but can also be embedded in other services.

pub mod chain;
pub mod config;
pub mod error;
pub mod location;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod units;
pub mod weather;

#[cfg(test)]
mod testing;

pub use chain::{Attempt, AttemptOutcome, AttemptTrace, Provider, ProviderChain};
pub use config::{Config, ProviderConfig};
pub use error::{AllProvidersFailed, ConfigError, ProviderError};
pub use location::LocationResolver;
pub use model::{
    Coordinates, Locale, LocationQuery, LocationSource, NormalizedWeather, ResolvedLocation,
};
pub use orchestrator::{FallbackOrchestrator, RequestTrace, WeatherData, WeatherResponse};
pub use provider::{ProviderChains, ProviderId};
pub use weather::{ResolvedWeather, WeatherResolver};
