//! Turns whatever the caller knows about itself into a city to search for.
//!
//! Strategies run in a fixed order and the first that yields a usable city
//! wins: GPS coordinates, a city the caller asked for by name, the edge header
//! hint, IP lookup, the coarse edge city, and finally the configured default.
//! Resolution cannot fail.

use std::net::{IpAddr, SocketAddr};

use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    chain::{AttemptTrace, ProviderChain, first_success},
    error::ProviderError,
    model::{CoordinateQuery, IpQuery, LocationQuery, LocationSource, ResolvedLocation},
    units::strip_city_suffix,
};

/// Values some lookups return in place of a real city.
const JUNK_CITIES: [&str; 6] = ["未知", "未知城市", "unknown", "null", "none", "-"];

/// Normalized city name, or `None` if `raw` does not name a place.
pub fn usable_city(raw: &str) -> Option<String> {
    let city = strip_city_suffix(raw);
    if city.is_empty() || JUNK_CITIES.iter().any(|junk| junk.eq_ignore_ascii_case(&city)) {
        None
    } else {
        Some(city)
    }
}

#[allow(clippy::ptr_arg)]
fn accept_city(raw: &String) -> Result<(), ProviderError> {
    usable_city(raw)
        .map(|_| ())
        .ok_or_else(|| ProviderError::schema(format!("not a city: {raw:?}")))
}

/// Parse a forwarded address, tolerating a port ("203.0.113.9:1234") or
/// brackets ("[2001:db8::1]", "[2001:db8::1]:443").
fn parse_address(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
        .or_else(|| raw.strip_prefix('[')?.strip_suffix(']')?.parse().ok())
}

/// The address to hand to IP lookups, if a public service could place it.
fn routable_address(raw: &str) -> Option<IpAddr> {
    let ip = parse_address(raw)?;
    let local = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || v6.is_unique_local() || v6.is_unicast_link_local()
        }
    };
    (!local).then_some(ip)
}

#[derive(Debug, Clone)]
pub struct LocationResolver {
    reverse_geocoders: ProviderChain<CoordinateQuery, String>,
    ip_lookups: ProviderChain<IpQuery, String>,
    default_city: String,
}

impl LocationResolver {
    /// `default_city` must already be non-empty; see [`crate::Config::fallback_city`].
    pub fn new(
        reverse_geocoders: ProviderChain<CoordinateQuery, String>,
        ip_lookups: ProviderChain<IpQuery, String>,
        default_city: String,
    ) -> Self {
        Self { reverse_geocoders, ip_lookups, default_city: strip_city_suffix(&default_city) }
    }

    pub async fn resolve(&self, query: &LocationQuery, deadline: Instant) -> ResolvedLocation {
        let mut trace = AttemptTrace::default();

        let resolved = self.try_strategies(query, deadline, &mut trace).await.unwrap_or_else(|| {
            ResolvedLocation {
                city_search_term: self.default_city.clone(),
                coordinates: None,
                source: LocationSource::StaticDefault,
                placeholder: false,
                trace: AttemptTrace::default(),
            }
        });

        info!(
            city = %resolved.city_search_term,
            source = %resolved.source,
            placeholder = resolved.placeholder,
            attempts = trace.len(),
            "location resolved"
        );

        ResolvedLocation { trace, ..resolved }
    }

    async fn try_strategies(
        &self,
        query: &LocationQuery,
        deadline: Instant,
        trace: &mut AttemptTrace,
    ) -> Option<ResolvedLocation> {
        let found = |city: String, source| ResolvedLocation {
            city_search_term: city,
            coordinates: None,
            source,
            placeholder: false,
            trace: AttemptTrace::default(),
        };

        if let Some(coordinates) = query.coordinates.filter(|c| c.is_valid()) {
            let mut geo_query = CoordinateQuery { coordinates, locale: query.locale };
            let win = first_success(
                &self.reverse_geocoders,
                &mut geo_query,
                deadline,
                trace,
                accept_city,
            )
            .await;

            // Coordinates alone are enough to fetch weather.
            let (city, placeholder) = match win.and_then(|w| usable_city(&w.value)) {
                Some(city) => (city, false),
                None => (query.locale.current_location().to_string(), true),
            };
            return Some(ResolvedLocation {
                city_search_term: city,
                coordinates: Some(coordinates),
                source: LocationSource::Gps,
                placeholder,
                trace: AttemptTrace::default(),
            });
        }

        // An explicit city is a hint like the edge header, only stronger.
        let hinted = [&query.requested_city, &query.header_city]
            .into_iter()
            .find_map(|city| city.as_deref().and_then(usable_city));
        if let Some(city) = hinted {
            return Some(found(city, LocationSource::HeaderHint));
        }

        match query.client_address.as_deref().and_then(routable_address) {
            Some(address) => {
                let mut ip_query = IpQuery { address: address.to_string(), locale: query.locale };
                let win =
                    first_success(&self.ip_lookups, &mut ip_query, deadline, trace, accept_city).await;
                if let Some(city) = win.and_then(|w| usable_city(&w.value)) {
                    return Some(found(city, LocationSource::IpLookup));
                }
            }
            None => debug!(address = ?query.client_address, "no routable client address, skipping IP lookup"),
        }

        query
            .edge_city
            .as_deref()
            .and_then(usable_city)
            .map(|city| found(city, LocationSource::EdgeGeo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{AttemptOutcome, Provider},
        model::{Coordinates, Locale},
        testing::{FakeProvider, Script},
    };
    use std::{
        sync::{Arc, atomic::Ordering},
        time::Duration,
    };

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn geo(name: &'static str, script: Script<String>) -> Arc<dyn Provider<CoordinateQuery, String>> {
        Arc::new(FakeProvider::<CoordinateQuery, String>::new(name, script))
    }

    fn ip(name: &'static str, script: Script<String>) -> Arc<dyn Provider<IpQuery, String>> {
        Arc::new(FakeProvider::<IpQuery, String>::new(name, script))
    }

    fn resolver(
        reverse_geocoders: ProviderChain<CoordinateQuery, String>,
        ip_lookups: ProviderChain<IpQuery, String>,
    ) -> LocationResolver {
        LocationResolver::new(reverse_geocoders, ip_lookups, "北京市".into())
    }

    #[test]
    fn junk_cities_are_rejected() {
        assert_eq!(usable_city(" 深圳市 ").as_deref(), Some("深圳"));
        assert_eq!(usable_city("未知"), None);
        assert_eq!(usable_city("Unknown"), None);
        assert_eq!(usable_city("   "), None);
    }

    #[test]
    fn private_addresses_are_not_routable() {
        let routable = |a: &str| routable_address(a).is_some();
        assert!(routable("203.0.113.9"));
        assert!(routable("2001:db8::1"));
        assert!(!routable("192.168.1.10"));
        assert!(!routable("127.0.0.1"));
        assert!(!routable("::1"));
        assert!(!routable("fd12:3456::1"));
        assert!(!routable("fe80::1"));
        assert!(!routable("not-an-ip"));
    }

    #[test]
    fn forwarded_ports_and_brackets_are_dropped() {
        let ip = |a: &str| routable_address(a).map(|ip| ip.to_string());
        assert_eq!(ip("203.0.113.9:1234").as_deref(), Some("203.0.113.9"));
        assert_eq!(ip("[2001:db8::1]").as_deref(), Some("2001:db8::1"));
        assert_eq!(ip("[2001:db8::1]:443").as_deref(), Some("2001:db8::1"));
        assert_eq!(ip("[fe80::1]:443"), None);
    }

    #[tokio::test]
    async fn ip_lookup_receives_bare_address() {
        let lookup = FakeProvider::<IpQuery, String>::new("ip", Script::Succeed("上海".into()))
            .refining(|q| assert_eq!(q.address, "203.0.113.9"));
        let r = resolver(vec![], vec![Arc::new(lookup)]);
        let q = LocationQuery::new(Locale::Zh).with_client_address("203.0.113.9:51234");

        let loc = r.resolve(&q, far_deadline()).await;
        assert_eq!(loc.source, LocationSource::IpLookup);
    }

    #[tokio::test]
    async fn gps_uses_reverse_geocoded_name() {
        let r = resolver(vec![geo("regeo", Script::Succeed("杭州市".into()))], vec![]);
        let q = LocationQuery::new(Locale::Zh).with_coordinates(Coordinates::new(30.27, 120.15));

        let loc = r.resolve(&q, far_deadline()).await;

        assert_eq!(loc.source, LocationSource::Gps);
        assert_eq!(loc.city_search_term, "杭州");
        assert!(!loc.placeholder);
        assert_eq!(loc.coordinates, Some(Coordinates::new(30.27, 120.15)));
    }

    #[tokio::test]
    async fn gps_keeps_coordinates_when_reverse_geocoding_is_down() {
        let r = resolver(
            vec![geo("amap-regeo", Script::Transport), geo("nominatim", Script::Hang)],
            vec![ip("ip", Script::Succeed("上海".into()))],
        );
        let q = LocationQuery::new(Locale::En)
            .with_coordinates(Coordinates::new(39.9, 116.4))
            .with_client_address("203.0.113.9");

        let loc = r.resolve(&q, Instant::now() + Duration::from_millis(200)).await;

        assert_eq!(loc.source, LocationSource::Gps);
        assert_eq!(loc.city_search_term, "Current Location");
        assert!(loc.placeholder);
        assert_eq!(loc.coordinates, Some(Coordinates::new(39.9, 116.4)));
        assert_eq!(loc.trace.len(), 2);
        assert_eq!(loc.trace.attempts()[1].outcome, AttemptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn invalid_coordinates_are_ignored() {
        let r = resolver(vec![], vec![]);
        let q = LocationQuery::new(Locale::Zh)
            .with_coordinates(Coordinates::new(123.0, 500.0))
            .with_header_city("广州市");

        let loc = r.resolve(&q, far_deadline()).await;
        assert_eq!(loc.source, LocationSource::HeaderHint);
        assert_eq!(loc.city_search_term, "广州");
    }

    #[tokio::test]
    async fn header_hint_skips_ip_lookup() {
        let lookup = FakeProvider::<IpQuery, String>::new("ip", Script::Succeed("上海".into()));
        let calls = lookup.counter();
        let r = resolver(vec![], vec![Arc::new(lookup)]);
        let q = LocationQuery::new(Locale::Zh)
            .with_header_city("成都")
            .with_client_address("203.0.113.9");

        let loc = r.resolve(&q, far_deadline()).await;

        assert_eq!(loc.source, LocationSource::HeaderHint);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn requested_city_outranks_header_hint() {
        let r = resolver(vec![], vec![]);
        let q = LocationQuery::new(Locale::Zh)
            .with_requested_city("杭州市")
            .with_header_city("成都");

        let loc = r.resolve(&q, far_deadline()).await;
        assert_eq!(loc.source, LocationSource::HeaderHint);
        assert_eq!(loc.city_search_term, "杭州");

        let q = LocationQuery::new(Locale::Zh)
            .with_requested_city("  ")
            .with_header_city("成都");
        assert_eq!(r.resolve(&q, far_deadline()).await.city_search_term, "成都");
    }

    #[tokio::test]
    async fn coordinates_outrank_requested_city() {
        let r = resolver(vec![geo("regeo", Script::Succeed("杭州市".into()))], vec![]);
        let q = LocationQuery::new(Locale::Zh)
            .with_coordinates(Coordinates::new(30.27, 120.15))
            .with_requested_city("上海");

        let loc = r.resolve(&q, far_deadline()).await;
        assert_eq!(loc.source, LocationSource::Gps);
        assert_eq!(loc.city_search_term, "杭州");
    }

    #[tokio::test]
    async fn ip_lookup_skips_junk_answers() {
        let r = resolver(
            vec![],
            vec![ip("vore-ip", Script::Succeed("未知".into())), ip("ip-api", Script::Succeed("Kansas City".into()))],
        );
        let q = LocationQuery::new(Locale::En).with_client_address("203.0.113.9");

        let loc = r.resolve(&q, far_deadline()).await;

        assert_eq!(loc.source, LocationSource::IpLookup);
        assert_eq!(loc.city_search_term, "Kansas City");
        assert!(matches!(loc.trace.attempts()[0].outcome, AttemptOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn edge_city_after_failed_ip_lookup() {
        let r = resolver(vec![], vec![ip("vore-ip", Script::Transport)]);
        let q = LocationQuery::new(Locale::Zh)
            .with_client_address("203.0.113.9")
            .with_edge_city("Wuhan");

        let loc = r.resolve(&q, far_deadline()).await;

        assert_eq!(loc.source, LocationSource::EdgeGeo);
        assert_eq!(loc.city_search_term, "Wuhan");
        assert_eq!(loc.trace.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_static_default() {
        let r = resolver(vec![], vec![ip("vore-ip", Script::Transport)]);

        let loc = r.resolve(&LocationQuery::default(), far_deadline()).await;

        assert_eq!(loc.source, LocationSource::StaticDefault);
        assert_eq!(loc.city_search_term, "北京");
        assert!(loc.trace.is_empty());
    }

    #[tokio::test]
    async fn resolution_never_yields_an_empty_city() {
        let r = resolver(
            vec![geo("regeo", Script::Succeed("  ".into()))],
            vec![ip("ip", Script::Succeed("市".into()))],
        );
        let header_cities = [None, Some(""), Some("  "), Some("未知"), Some("Paris")];
        let coordinates = [None, Some(Coordinates::new(10.0, 10.0)), Some(Coordinates::new(f64::NAN, 0.0))];
        let addresses = [None, Some("10.0.0.1"), Some("203.0.113.9")];

        for header in header_cities {
            for coords in coordinates {
                for address in addresses {
                    for locale in [Locale::Zh, Locale::En] {
                        let q = LocationQuery {
                            coordinates: coords,
                            requested_city: None,
                            client_address: address.map(str::to_string),
                            header_city: header.map(str::to_string),
                            edge_city: None,
                            locale,
                        };
                        let loc = r.resolve(&q, far_deadline()).await;
                        assert!(!loc.city_search_term.trim().is_empty(), "query {q:?}");
                        if coords.is_some_and(|c| c.is_valid()) {
                            assert_eq!(loc.source, LocationSource::Gps);
                        }
                    }
                }
            }
        }
    }
}
