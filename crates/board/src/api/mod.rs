pub mod wallets;
pub mod watched;

use axum::{extract::State, response::IntoResponse, routing::get, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::cache::ProfileCache;
use crate::enrichment::Enrichment;
use crate::leaderboard::Leaderboard;
use crate::watchlist::WatchList;
use common::polymarket::PolymarketClient;

/// Shared application state available to all handlers.
pub struct AppState {
    pub cache: Arc<ProfileCache>,
    pub enrichment: Arc<Enrichment<PolymarketClient>>,
    pub watchlist: Arc<WatchList<PolymarketClient>>,
    pub leaderboard: Arc<Leaderboard<PolymarketClient>>,
    pub client: Arc<PolymarketClient>,
    pub default_leaderboard_limit: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/leaderboard", get(wallets::get_leaderboard))
        .route("/api/whales/{address}/profile", get(wallets::get_profile))
        .route(
            "/api/whales/{address}/positions",
            get(wallets::get_positions),
        )
        .route("/api/whales/{address}/activity", get(wallets::get_activity))
        .route("/api/cache/bulk", post(wallets::bulk_cache))
        .route(
            "/api/watched",
            get(watched::list_watched).post(watched::set_watch),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}

pub(crate) fn is_valid_wallet_address(addr: &str) -> bool {
    // Standard Ethereum address: 0x + 40 hex chars
    let is_eth = addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit());
    // Polymarket proxy wallet (no prefix): 64 hex chars
    let is_proxy = addr.len() == 64 && addr.chars().all(|c| c.is_ascii_hexdigit());
    // Polymarket proxy wallet (with prefix): 0x + 64 hex chars
    let is_proxy_prefixed = addr.len() == 66
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit());
    is_eth || is_proxy || is_proxy_prefixed
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}
