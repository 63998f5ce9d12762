use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod leaderboard;
pub mod lottery;
pub mod messages;
pub mod players;
pub mod round;
pub mod state_machine;

pub use messages::{ClientToServerMessage, ServerToClientMessage};
pub use state_machine::{Audience, GameSession, Outbound};

/// Identifier of a game row in the catalog; one live session per id.
pub type GameId = String;
/// Stable identifier generated and persisted by the player's device.
pub type PlayerId = String;
/// Transport handle, fresh for every socket.
pub type ConnectionId = Uuid;

pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Questions,
    Lottery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    Question,
    /// Lottery only: the draw is done, clients are animating it.
    Running,
    Result,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    OutOfSequence,
    NoOpenRound,
    InvalidIndex,
    InsufficientPlayers,
    Unauthorized,
    BadRequest,
}

/// Failures reported back to the one connection that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("session '{0}' not found")]
    SessionNotFound(GameId),
    #[error("'{command}' is not allowed while the session is {phase:?}")]
    OutOfSequence { command: &'static str, phase: Phase },
    #[error("question {requested} requested, next in sequence is {expected}")]
    QuestionOutOfOrder { requested: usize, expected: usize },
    #[error("no question round is open")]
    NoOpenRound,
    #[error("question index {index} is not available ({total} questions)")]
    InvalidIndex { index: usize, total: usize },
    #[error("only {available} eligible players for {requested} lottery winners")]
    InsufficientPlayers { requested: usize, available: usize },
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl GameError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GameError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            GameError::OutOfSequence { .. } | GameError::QuestionOutOfOrder { .. } => {
                ErrorCode::OutOfSequence
            }
            GameError::NoOpenRound => ErrorCode::NoOpenRound,
            GameError::InvalidIndex { .. } => ErrorCode::InvalidIndex,
            GameError::InsufficientPlayers { .. } => ErrorCode::InsufficientPlayers,
            GameError::Unauthorized => ErrorCode::Unauthorized,
            GameError::BadRequest(_) => ErrorCode::BadRequest,
        }
    }
}

/// Game ids arrive as JSON numbers from some clients and strings from others.
pub fn deserialize_game_id<'de, D>(deserializer: D) -> Result<GameId, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(D::Error::custom("Expected game id as non-empty string or number")),
    }
}
