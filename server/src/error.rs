use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Load(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog source misconfigured: {0}")]
    Config(String),
    #[error("Failed to read catalog file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to fetch catalog from '{url}': {source}")]
    HttpFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to parse catalog: {0}")]
    Parse(String),
    #[error("Invalid game '{game_id}' in catalog: {reason}")]
    InvalidGame { game_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Web server/handler error: {0}")]
    Web(#[from] crate::web::WebError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
