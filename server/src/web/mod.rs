use axum::{
    Router,
    routing::{any, get, post},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::Result as AppResult;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors_origins: Result<Vec<HeaderValue>, _> = origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .map_err(|e| format!("Invalid CORS origin '{origin}': {e}"))
        })
        .collect();

    let cors_origins = cors_origins.unwrap_or_else(|e| {
        tracing::error!(error = %e, "CORS config error. Defaulting to restrictive");
        vec![]
    });

    if cors_origins.is_empty() {
        tracing::info!("Restrictive CORS policy applied (no origins configured)");
        return CorsLayer::new();
    }

    tracing::info!(
        cors.origins.count = cors_origins.len(),
        "CORS configured with allowed origins"
    );
    CorsLayer::new()
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
        ])
        .allow_origin(cors_origins)
        .allow_credentials(true)
        .allow_headers(vec![
            http::header::CONTENT_TYPE,
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
        ])
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/refresh-catalog",
            post(handlers::refresh_catalog_handler),
        )
        .route("/api/sessions", get(handlers::list_sessions_handler))
        .route(
            "/api/sessions/{game_id}",
            get(handlers::session_snapshot_handler).delete(handlers::destroy_session_handler),
        )
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
}

#[tracing::instrument(skip(app_state, server_config), fields(
    server.port = server_config.port,
    cors.origins.count = server_config.cors_origins.len()
))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let limits = &server_config.rate_limit;
    let governor_conf = GovernorConfigBuilder::default()
        .per_millisecond(limits.per_ms)
        .burst_size(limits.burst)
        .finish()
        .map(Arc::new)
        .ok_or_else(|| {
            WebError::InternalServerError("Invalid rate limiter configuration".to_string())
        })?;
    tracing::info!(
        rate_limit.per_ms = limits.per_ms,
        rate_limit.burst_size = limits.burst,
        "Rate limiter configured"
    );

    // Forget idle peers so the keyed limiter does not grow without bound.
    let limiter = governor_conf.limiter().clone();
    let warn_size = limits.storage_warn_size;
    let mut cleanup = tokio::time::interval(limits.cleanup_interval());
    tokio::spawn(async move {
        cleanup.tick().await;
        loop {
            cleanup.tick().await;
            let tracked = limiter.len();
            if tracked > warn_size {
                tracing::warn!(
                    rate_limiter.storage_size = tracked,
                    "Rate limiter tracks an unusually large number of peers"
                );
            }
            limiter.retain_recent();
        }
    });

    let app = router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().gzip(true))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors_layer(&server_config.cors_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(server.address = %addr, "Session orchestrator listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
