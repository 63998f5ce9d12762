use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Serialize;

use super::error::{Result as WebResult, WebError};
use crate::game_logic::messages::GameStateSync;
use crate::session::SessionSummary;
use crate::state::AppState;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshCatalogResponse {
    pub games_loaded: usize,
}

/// Checks `Authorization: ApiKey <token>` against the configured admin tokens.
fn require_api_key(app_state: &AppState, headers: &HeaderMap, action: &str) -> WebResult<()> {
    let Some(auth_header_val) = headers.get(http::header::AUTHORIZATION) else {
        tracing::warn!(action, "Unauthorized request: missing Authorization header");
        return Err(WebError::Unauthorized(
            "Missing Authorization header".to_string(),
        ));
    };

    let auth_header_str = auth_header_val.to_str().unwrap_or("");
    let Some(provided_key) = auth_header_str.strip_prefix("ApiKey ") else {
        tracing::warn!(action, "Unauthorized request: Authorization header format incorrect");
        return Err(WebError::Unauthorized(
            "Invalid Authorization header format. Expected 'ApiKey <key>'".to_string(),
        ));
    };

    if !app_state.is_admin_token(provided_key) {
        tracing::warn!(action, "Unauthorized request: invalid API key");
        return Err(WebError::Unauthorized("Invalid API key".to_string()));
    }
    Ok(())
}

fn non_blank(game_id: String) -> WebResult<String> {
    let trimmed = game_id.trim();
    if trimmed.is_empty() {
        return Err(WebError::BadRequest("game id must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

pub async fn refresh_catalog_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> WebResult<Json<RefreshCatalogResponse>> {
    tracing::info!("HTTP: Received refresh_catalog request");
    require_api_key(&app_state, &headers, "refresh_catalog")?;

    let games_loaded = app_state.catalog.refresh().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to refresh catalog");
        WebError::InternalServerError(format!("Failed to refresh catalog: {}", e))
    })?;

    Ok(Json(RefreshCatalogResponse { games_loaded }))
}

pub async fn list_sessions_handler(State(app_state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(app_state.sessions.list_sessions().await)
}

pub async fn session_snapshot_handler(
    State(app_state): State<AppState>,
    Path(game_id): Path<String>,
) -> WebResult<Json<GameStateSync>> {
    let game_id = non_blank(game_id)?;
    let handle = app_state
        .sessions
        .get_session(game_id.clone())
        .await
        .ok_or_else(|| WebError::SessionNotFound(game_id.clone()))?;
    let snapshot = handle
        .snapshot()
        .await
        .ok_or(WebError::SessionNotFound(game_id))?;
    Ok(Json(snapshot))
}

pub async fn destroy_session_handler(
    State(app_state): State<AppState>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
) -> WebResult<StatusCode> {
    tracing::info!(session.id = %game_id, "HTTP: Received destroy_session request");
    require_api_key(&app_state, &headers, "destroy_session")?;
    let game_id = non_blank(game_id)?;

    if app_state.sessions.destroy_session(game_id.clone()).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WebError::SessionNotFound(game_id))
    }
}
