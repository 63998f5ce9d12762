use crate::config::{CatalogConfig, ContentSourceType};
use crate::error::{CatalogError, Result as AppResult};
use crate::game_logic::{GameId, GameKind, OPTIONS_PER_QUESTION, deserialize_game_id};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    #[serde(rename = "correct_index")]
    pub correct_option_index: usize,
}

/// One game row as handed over by the external catalog service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameDefinition {
    #[serde(deserialize_with = "deserialize_game_id")]
    pub id: GameId,
    #[serde(default)]
    pub name: String,
    pub game_kind: GameKind,
    #[serde(rename = "winners", default)]
    pub winners_per_round: Option<u32>,
    #[serde(default)]
    pub total_winners: Option<u32>,
    #[serde(rename = "avoid_winners", default)]
    pub avoid_repeat_winners: bool,
    #[serde(default)]
    pub timer_secs: Option<u64>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl GameDefinition {
    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidGame {
            game_id: self.id.clone(),
            reason,
        };

        for (index, question) in self.questions.iter().enumerate() {
            if question.options.len() != OPTIONS_PER_QUESTION {
                return Err(invalid(format!(
                    "question {} has {} options, expected {}",
                    index,
                    question.options.len(),
                    OPTIONS_PER_QUESTION
                )));
            }
            if question.correct_option_index >= OPTIONS_PER_QUESTION {
                return Err(invalid(format!(
                    "question {} has correct index {} out of range",
                    index, question.correct_option_index
                )));
            }
        }

        match self.game_kind {
            GameKind::Questions if self.winners_per_round == Some(0) => {
                Err(invalid("winners per round must be at least 1".to_string()))
            }
            GameKind::Lottery if self.total_winners == Some(0) => {
                Err(invalid("total winners must be at least 1".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JsonCatalogSnapshot {
    games: Vec<GameDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub games: HashMap<GameId, Arc<GameDefinition>>,
}

pub struct CatalogParser;

impl CatalogParser {
    #[tracing::instrument(skip(content), fields(content.length = content.len()))]
    pub fn parse_structured_data(content: &str) -> Result<CatalogSnapshot, CatalogError> {
        tracing::debug!("Parsing JSON catalog data");

        let json_data: JsonCatalogSnapshot = serde_json::from_str(content)
            .map_err(|e| CatalogError::Parse(format!("Failed to parse JSON: {}", e)))?;

        let mut games = HashMap::with_capacity(json_data.games.len());
        for game in json_data.games {
            game.validate()?;
            if games.contains_key(&game.id) {
                return Err(CatalogError::InvalidGame {
                    game_id: game.id,
                    reason: "duplicate game id".to_string(),
                });
            }
            games.insert(game.id.clone(), Arc::new(game));
        }

        Ok(CatalogSnapshot { games })
    }
}

/// Where the raw catalog document comes from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<String, CatalogError>;

    fn describe(&self) -> String;
}

pub struct FileCatalogSource {
    path: String,
}

#[async_trait]
impl CatalogSource for FileCatalogSource {
    async fn fetch(&self) -> Result<String, CatalogError> {
        tracing::debug!(file.path = %self.path, "Loading catalog from file");
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CatalogError::FileRead {
                path: self.path.clone(),
                source: e,
            })
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path)
    }
}

pub struct HttpCatalogSource {
    url: String,
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch(&self) -> Result<String, CatalogError> {
        tracing::debug!(http.url = %self.url, "Fetching catalog from URL");
        let response = reqwest::get(&self.url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CatalogError::HttpFetch {
                url: self.url.clone(),
                source: e,
            })?;

        response.text().await.map_err(|e| CatalogError::HttpFetch {
            url: self.url.clone(),
            source: e,
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

pub fn source_from_config(config: &CatalogConfig) -> Result<Box<dyn CatalogSource>, CatalogError> {
    match config.source_type {
        ContentSourceType::File => {
            let path = config.file_path.clone().ok_or_else(|| {
                CatalogError::Config("File path required for file source".to_string())
            })?;
            Ok(Box::new(FileCatalogSource { path }))
        }
        ContentSourceType::Http => {
            let url = config.http_url.clone().ok_or_else(|| {
                CatalogError::Config("HTTP URL required for http source".to_string())
            })?;
            Ok(Box::new(HttpCatalogSource { url }))
        }
    }
}

/// Read-only view of the game catalog, refreshable from its source.
pub struct GameCatalogCache {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    source: Box<dyn CatalogSource>,
}

impl GameCatalogCache {
    #[tracing::instrument(skip(source), fields(catalog.source = %source.describe()))]
    pub async fn new(source: Box<dyn CatalogSource>) -> AppResult<Self> {
        let initial = Self::load(source.as_ref()).await.map_err(|err| {
            tracing::error!(error = %err, "Failed to load required catalog");
            err
        })?;

        tracing::info!(
            games.count = initial.games.len(),
            "GameCatalogCache initialized successfully"
        );

        Ok(Self {
            snapshot: RwLock::new(Arc::new(initial)),
            source,
        })
    }

    #[cfg(test)]
    pub fn from_snapshot(snapshot: CatalogSnapshot, source: Box<dyn CatalogSource>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            source,
        }
    }

    async fn load(source: &dyn CatalogSource) -> Result<CatalogSnapshot, CatalogError> {
        let raw_content = source.fetch().await?;
        CatalogParser::parse_structured_data(&raw_content)
    }

    /// Swaps in a freshly loaded catalog. Running sessions keep the
    /// questions they were created with.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> AppResult<usize> {
        tracing::info!("Refreshing game catalog");
        let fresh = Self::load(self.source.as_ref()).await?;
        let count = fresh.games.len();
        *self.snapshot.write().await = Arc::new(fresh);
        tracing::info!(games.count = count, "Refreshed game catalog");
        Ok(count)
    }

    pub async fn game(&self, game_id: &str) -> Option<Arc<GameDefinition>> {
        self.snapshot.read().await.games.get(game_id).cloned()
    }

    pub async fn game_count(&self) -> usize {
        self.snapshot.read().await.games.len()
    }
}
