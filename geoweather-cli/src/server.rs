//! HTTP surface: `/api/weather`, `/api/geo` and `/health`.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::get,
};
use geoweather_core::{
    Config, Coordinates, FallbackOrchestrator, Locale, LocationQuery, LocationSource,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Shared by every handler; read-only after startup.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<FallbackOrchestrator>,
    default_locale: Locale,
    header_city_header: HeaderName,
    edge_city_header: HeaderName,
}

impl AppState {
    pub fn new(orchestrator: FallbackOrchestrator, config: &Config) -> anyhow::Result<Self> {
        let header = |name: &str| {
            HeaderName::from_bytes(name.trim().as_bytes())
                .with_context(|| format!("Invalid header name in config: {name:?}"))
        };

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            default_locale: config.locale,
            header_city_header: header(&config.header_city_header)?,
            edge_city_header: header(&config.edge_city_header)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LocateParams {
    lat: Option<String>,
    lon: Option<String>,
    city: Option<String>,
    lang: Option<String>,
}

impl LocateParams {
    /// Both halves must parse; otherwise the pair is ignored.
    fn coordinates(&self) -> Option<Coordinates> {
        let lat = self.lat.as_deref()?.trim().parse().ok()?;
        let lon = self.lon.as_deref()?.trim().parse().ok()?;
        Some(Coordinates::new(lat, lon))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeoResponse {
    city: String,
    source: LocationSource,
    placeholder: bool,
    coordinates: Option<Coordinates>,
    client_address: Option<String>,
    address_family: Option<&'static str>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Proxy headers first (`X-Forwarded-For` leftmost entry, `CF-Connecting-IP`,
/// `X-Real-IP`), then the socket peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').map(str::trim).find(|a| !a.is_empty()))
        .or_else(|| header_str(headers, "cf-connecting-ip"))
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
}

/// Edge platforms percent-encode non-ASCII city names.
fn decoded_header(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let raw = headers.get(name).and_then(|v| v.to_str().ok())?.trim();
    let decoded = urlencoding::decode(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string());
    Some(decoded).filter(|c| !c.trim().is_empty())
}

fn address_family(address: &str) -> Option<&'static str> {
    match address.parse::<IpAddr>().ok()? {
        IpAddr::V4(_) => Some("IPv4"),
        IpAddr::V6(_) => Some("IPv6"),
    }
}

fn location_query(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    params: &LocateParams,
) -> LocationQuery {
    let locale = params
        .lang
        .as_deref()
        .and_then(|lang| Locale::try_from(lang).ok())
        .unwrap_or(state.default_locale);

    LocationQuery {
        coordinates: params.coordinates(),
        requested_city: params.city.clone(),
        client_address: client_address(headers, peer),
        header_city: decoded_header(headers, &state.header_city_header),
        edge_city: decoded_header(headers, &state.edge_city_header),
        locale,
    }
}

async fn weather(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<LocateParams>,
) -> impl IntoResponse {
    let query = location_query(&state, &headers, peer.map(|ConnectInfo(p)| p), &params);
    let response = state.orchestrator.handle(query).await;

    let status = if response.is_success() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response))
}

async fn geo(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<LocateParams>,
) -> impl IntoResponse {
    let query = location_query(&state, &headers, peer.map(|ConnectInfo(p)| p), &params);
    let location = state.orchestrator.locate(&query).await;

    Json(GeoResponse {
        city: location.city_search_term,
        source: location.source,
        placeholder: location.placeholder,
        coordinates: location.coordinates,
        address_family: query.client_address.as_deref().and_then(address_family),
        client_address: query.client_address,
    })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/weather", get(weather))
        .route("/api/geo", get(geo))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Bind `listen` and serve until Ctrl-C.
pub async fn serve(config: &Config, listen: &str) -> anyhow::Result<()> {
    let orchestrator =
        FallbackOrchestrator::from_config(config).context("Failed to build provider chains")?;
    let app = router(AppState::new(orchestrator, config)?);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to {listen}"))?;
    info!("Serving on http://{}", listener.local_addr().context("Listener has no address")?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
