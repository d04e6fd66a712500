use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{is_valid_wallet_address, AppState, MessageResponse};
use common::types::{PeriodMetrics, TimePeriod, TraderRecord};

type ApiError = (StatusCode, Json<MessageResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

fn bad_gateway(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

fn parse_period(raw: Option<&str>) -> Result<TimePeriod, ApiError> {
    match raw {
        None => Ok(TimePeriod::All),
        Some(s) => TimePeriod::from_str_loose(s)
            .ok_or_else(|| bad_request(format!("invalid period: {s} (expected 24h|7d|30d|all)"))),
    }
}

fn validate_address(addr: &str) -> Result<(), ApiError> {
    if is_valid_wallet_address(addr) {
        Ok(())
    } else {
        Err(bad_request(format!("invalid wallet address: {addr}")))
    }
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<u32>,
    pub period: Option<String>,
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<TraderRecord>>, ApiError> {
    let period = parse_period(query.period.as_deref())?;
    let limit = query.limit.unwrap_or(state.default_leaderboard_limit);

    let traders = state
        .leaderboard
        .top_traders(limit, period)
        .await
        .map_err(|e| bad_gateway(format!("leaderboard unavailable: {e}")))?;
    Ok(Json(traders))
}

#[derive(Deserialize)]
pub struct ProfileQuery {
    pub period: Option<String>,
}

/// Per-period profile via the enrichment path: cache hit, else a single
/// fetch with write-through. Degrades internally, so this never 5xxs on
/// upstream trouble — the body's `status` field carries the truth.
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<PeriodMetrics>, ApiError> {
    validate_address(&address)?;
    let period = parse_period(query.period.as_deref())?;
    Ok(Json(state.enrichment.profile(&address, period).await))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

pub async fn get_positions(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_address(&address)?;
    let positions = state
        .client
        .fetch_positions(&address.to_lowercase(), query.limit.unwrap_or(100))
        .await
        .map_err(|e| bad_gateway(format!("positions unavailable: {e}")))?;
    Ok(Json(positions))
}

pub async fn get_activity(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_address(&address)?;
    let activity = state
        .client
        .fetch_activity(&address.to_lowercase(), query.limit.unwrap_or(50))
        .await
        .map_err(|e| bad_gateway(format!("activity unavailable: {e}")))?;
    Ok(Json(activity))
}

#[derive(Deserialize)]
pub struct BulkCacheRequest {
    pub addresses: Vec<String>,
    /// When present, the response carries just this period's metrics per
    /// address instead of the full period map.
    pub period: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCacheStatus {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periods: Option<HashMap<TimePeriod, PeriodMetrics>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PeriodMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

/// Cache status for many addresses in one request. Every requested address
/// appears in the response, cached or not.
pub async fn bulk_cache(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkCacheRequest>,
) -> Result<Json<HashMap<String, BulkCacheStatus>>, ApiError> {
    let internal_error = |e: anyhow::Error| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(MessageResponse {
                message: format!("cache unavailable: {e}"),
            }),
        )
    };

    if let Some(raw) = req.period.as_deref() {
        let period = TimePeriod::from_str_loose(raw)
            .ok_or_else(|| bad_request(format!("invalid period: {raw}")))?;
        let lookups = state
            .cache
            .bulk_lookup(&req.addresses, period)
            .await
            .map_err(internal_error)?;
        let out = lookups
            .into_iter()
            .map(|(addr, lookup)| {
                (
                    addr,
                    BulkCacheStatus {
                        cached: lookup.cached,
                        periods: None,
                        metrics: lookup.metrics,
                        last_updated: None,
                    },
                )
            })
            .collect();
        return Ok(Json(out));
    }

    let entries = state
        .cache
        .bulk_entries(&req.addresses)
        .await
        .map_err(internal_error)?;

    let out = entries
        .into_iter()
        .map(|(addr, entry)| {
            let status = match entry {
                Some(entry) => BulkCacheStatus {
                    cached: true,
                    periods: Some(entry.periods),
                    metrics: None,
                    last_updated: Some(entry.last_updated),
                },
                None => BulkCacheStatus {
                    cached: false,
                    periods: None,
                    metrics: None,
                    last_updated: None,
                },
            };
            (addr, status)
        })
        .collect();
    Ok(Json(out))
}
