use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    chain::Provider,
    error::ProviderError,
    model::IpQuery,
    provider::fetch_json,
};

/// v2.xxapi.cn IP lookup. The region comes back as one free-form string,
/// e.g. "中国浙江省杭州市 电信".
#[derive(Debug, Clone)]
pub struct XxapiIpLookup {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl XxapiIpLookup {
    pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
        Self { base_url, http, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct XxapiResponse {
    code: i64,
    data: Option<XxapiData>,
}

#[derive(Debug, Deserialize)]
struct XxapiData {
    #[serde(default)]
    address: String,
}

/// Pull the city out of an address string.
///
/// Takes the text after the last province marker, up to and including the
/// first "市". Without a "市" the remainder (or the province) is returned.
fn city_from_address(address: &str) -> Option<String> {
    let region = address.split_whitespace().next()?.trim();
    let region = region.strip_prefix("中国").unwrap_or(region);

    let after_province = ["自治区", "省"]
        .into_iter()
        .filter_map(|marker| region.rfind(marker).map(|i| i + marker.len()))
        .max()
        .map_or(region, |i| &region[i..]);

    let city = match after_province.find('市') {
        Some(i) => &after_province[..i + '市'.len_utf8()],
        None if after_province.is_empty() => region,
        None => after_province,
    };

    Some(city.trim().to_owned()).filter(|c| !c.is_empty())
}

#[async_trait]
impl Provider<IpQuery, String> for XxapiIpLookup {
    fn name(&self) -> &'static str {
        "xxapi-ip"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, query: &mut IpQuery) -> Result<String, ProviderError> {
        let url = format!("{}/api/ip", self.base_url);
        let parsed: XxapiResponse =
            fetch_json(self.http.get(url).query(&[("ip", query.address.as_str())])).await?;

        if parsed.code != 200 {
            return Err(ProviderError::schema(format!("code {}", parsed.code)));
        }

        let address = parsed.data.map(|d| d.address).unwrap_or_default();
        city_from_address(&address)
            .ok_or_else(|| ProviderError::schema(format!("no city in address {address:?}")))
    }
}
