use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{is_valid_wallet_address, AppState, MessageResponse};
use common::types::WatchedAddress;

pub async fn list_watched(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WatchedAddress>>, StatusCode> {
    let rows = state
        .watchlist
        .list()
        .await
        .map_err(|_db_err| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
pub struct SetWatchRequest {
    pub address: String,
    pub watched: bool,
    pub label: Option<String>,
}

/// Toggle tracking. Returns before any enrichment happens; pre-warming for
/// a newly watched address runs detached.
pub async fn set_watch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetWatchRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<MessageResponse>)> {
    if !is_valid_wallet_address(req.address.trim()) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(MessageResponse {
                message: format!("invalid wallet address: {}", req.address),
            }),
        ));
    }

    state
        .watchlist
        .set_watch(&req.address, req.watched, req.label.as_deref())
        .await
        .map_err(|_db_err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse {
                    message: "failed to update watch list".to_string(),
                }),
            )
        })?;

    let address = req.address.trim().to_lowercase();
    let message = if req.watched {
        format!("now watching {address}")
    } else {
        format!("unwatched {address}")
    };
    Ok(Json(MessageResponse { message }))
}
