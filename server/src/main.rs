use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod config;
mod connections;
mod error;
mod game_logic;
mod session;
mod state;
mod web;

use crate::catalog::{GameCatalogCache, source_from_config};
use crate::config::load_settings;
use crate::error::Result as AppResult;
use crate::session::SessionRegistryHandle;
use crate::state::AppState;
use crate::web::run_server;

const REGISTRY_QUEUE_SIZE: usize = 64;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=debug,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", app_settings);

    let source = source_from_config(&app_settings.catalog)?;
    let catalog = Arc::new(GameCatalogCache::new(source).await?);
    tracing::info!(games.count = catalog.game_count().await, "Game catalog ready");

    let sessions = SessionRegistryHandle::spawn(
        REGISTRY_QUEUE_SIZE,
        Arc::clone(&catalog),
        app_settings.game.clone(),
    );

    let app_state = AppState {
        sessions,
        catalog,
        admin_tokens: Arc::new(app_settings.admin.tokens.clone()),
    };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
