use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File, Value, ValueKind};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

/// Per-peer request limiting for the HTTP and upgrade endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// One request slot is replenished every `per_ms` milliseconds.
    pub per_ms: u64,
    pub burst: u32,
    pub cleanup_secs: u64,
    pub storage_warn_size: usize,
}

impl RateLimitConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_ms: 500,
            burst: 30,
            cleanup_secs: 60,
            storage_warn_size: 1_000_000,
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(deserialize_with = "deserialize_string_or_list_to_set")]
    pub tokens: HashSet<String>,
}

// Tokens are secrets, keep them out of the startup log.
impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("tokens", &format_args!("<{} redacted>", self.tokens.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSourceType {
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub source_type: ContentSourceType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameRulesConfig {
    pub question_timer_secs: u64,
    pub lottery_reveal_secs: u64,
    pub points_per_win: u32,
}

impl GameRulesConfig {
    pub fn question_timer(&self) -> Duration {
        Duration::from_secs(self.question_timer_secs)
    }

    pub fn lottery_reveal(&self) -> Duration {
        Duration::from_secs(self.lottery_reveal_secs)
    }
}

impl Default for GameRulesConfig {
    fn default() -> Self {
        Self {
            question_timer_secs: 25,
            lottery_reveal_secs: 25,
            points_per_win: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub catalog: CatalogConfig,
    pub game: GameRulesConfig,
}

impl AppSettings {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.admin.tokens.is_empty() {
            return Err(ConfigError::Missing(
                "admin.tokens (set TRIVIA__ADMIN__TOKENS)".to_string(),
            ));
        }
        match self.catalog.source_type {
            ContentSourceType::File if self.catalog.file_path.is_none() => {
                return Err(ConfigError::Missing("catalog.file_path".to_string()));
            }
            ContentSourceType::Http if self.catalog.http_url.is_none() => {
                return Err(ConfigError::Missing("catalog.http_url".to_string()));
            }
            _ => {}
        }
        let limits = &self.server.rate_limit;
        if limits.per_ms == 0 || limits.burst == 0 || limits.cleanup_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "server.rate_limit per_ms, burst and cleanup_secs must be greater than zero"
                    .to_string(),
            ));
        }
        if self.game.question_timer_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "game.question_timer_secs must be greater than zero".to_string(),
            ));
        }
        if self.game.points_per_win == 0 {
            return Err(ConfigError::InvalidValue(
                "game.points_per_win must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

pub fn load_settings() -> AppResult<AppSettings> {
    let rules = GameRulesConfig::default();
    let limits = RateLimitConfig::default();
    let builder = Config::builder()
        .add_source(
            Environment::with_prefix("TRIVIA")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("admin.tokens")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        )
        .add_source(File::with_name("config").required(false))
        .set_default("server.port", 3000)
        .and_then(|b| {
            b.set_default(
                "server.cors_origins",
                Value::new(None, ValueKind::Array(Vec::new())),
            )
        })
        .and_then(|b| b.set_default("server.rate_limit.per_ms", limits.per_ms))
        .and_then(|b| b.set_default("server.rate_limit.burst", limits.burst as u64))
        .and_then(|b| b.set_default("server.rate_limit.cleanup_secs", limits.cleanup_secs))
        .and_then(|b| {
            b.set_default(
                "server.rate_limit.storage_warn_size",
                limits.storage_warn_size as u64,
            )
        })
        .and_then(|b| b.set_default("catalog.source_type", "file"))
        .and_then(|b| b.set_default("catalog.file_path", "catalog.json"))
        .and_then(|b| b.set_default("game.question_timer_secs", rules.question_timer_secs))
        .and_then(|b| b.set_default("game.lottery_reveal_secs", rules.lottery_reveal_secs))
        .and_then(|b| b.set_default("game.points_per_win", rules.points_per_win as u64))
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    app_settings.validate().map_err(Into::into)
}

fn deserialize_string_or_list_to_set<'de, D>(deserializer: D) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    let mut set = HashSet::new();

    match value {
        Value::String(s) => {
            for item in s.split(',') {
                let trimmed = item.trim();
                if !trimmed.is_empty() {
                    set.insert(trimmed.to_string());
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                if let Value::String(s) = item {
                    let trimmed = s.trim();
                    if !trimmed.is_empty() {
                        set.insert(trimmed.to_string());
                    }
                } else {
                    return Err(D::Error::custom("Array must contain only strings"));
                }
            }
        }
        _ => return Err(D::Error::custom("Expected string or array of strings")),
    }

    Ok(set)
}
