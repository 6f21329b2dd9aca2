use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::{IpQuery, Locale},
    provider::fetch_json,
};

/// ip-api.com, free tier.
#[derive(Debug, Clone)]
pub struct IpApiLookup {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl IpApiLookup {
    pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
        Self { base_url, http, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    city: String,
}

#[async_trait]
impl Provider<IpQuery, String> for IpApiLookup {
    fn name(&self) -> &'static str {
        "ip-api"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut IpQuery) -> Result<String, ProviderError> {
        let url = format!("{}/json/{}", self.base_url, query.address);
        let lang = match query.locale {
            Locale::Zh => "zh-CN",
            Locale::En => "en",
        };

        let parsed: IpApiResponse = fetch_json(self.http.get(url).query(&[("lang", lang)])).await?;

        if parsed.status != "success" {
            return Err(ProviderError::schema(
                parsed.message.unwrap_or_else(|| format!("status {}", parsed.status)),
            ));
        }

        Some(parsed.city.trim().to_owned())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::schema("empty 'city'"))
    }
}
