use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::players::PlayerView;
use super::{ErrorCode, GameError, GameId, GameKind, Phase, PlayerId, deserialize_game_id};

/// Messages sent by player devices and the host console.
///
/// Every frame is `{"event": "JOIN_GAME", "data": {...}}`. Field aliases keep
/// older clients (`answerIdx`, `qIndex`) working.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientToServerMessage {
    JoinGame(JoinGamePayload),
    SubmitAnswer(SubmitAnswerPayload),
    /// Ask for a fresh `GAME_STATE_SYNC`, e.g. after a reconnect.
    RequestSync(GameRef),
    AdminInitGame(AdminRef),
    AdminStartQuestion(AdminStartQuestionPayload),
    AdminCloseQuestion(AdminRef),
    AdminAdvance(AdminRef),
    AdminStartLottery(AdminRef),
    AdminFinishGame(AdminRef),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinGamePayload {
    #[serde(deserialize_with = "deserialize_game_id")]
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub extra: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
    #[serde(deserialize_with = "deserialize_game_id")]
    pub game_id: GameId,
    /// Signed so that a stray `-1` is ignored like any other bad option.
    #[serde(alias = "answerIdx")]
    pub option_index: i64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GameRef {
    #[serde(deserialize_with = "deserialize_game_id")]
    pub game_id: GameId,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdminRef {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(deserialize_with = "deserialize_game_id")]
    pub game_id: GameId,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdminStartQuestionPayload {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(deserialize_with = "deserialize_game_id")]
    pub game_id: GameId,
    #[serde(alias = "qIndex")]
    pub question_index: usize,
}

impl ClientToServerMessage {
    pub fn game_id(&self) -> &GameId {
        match self {
            ClientToServerMessage::JoinGame(p) => &p.game_id,
            ClientToServerMessage::SubmitAnswer(p) => &p.game_id,
            ClientToServerMessage::RequestSync(p) => &p.game_id,
            ClientToServerMessage::AdminStartQuestion(p) => &p.game_id,
            ClientToServerMessage::AdminInitGame(p)
            | ClientToServerMessage::AdminCloseQuestion(p)
            | ClientToServerMessage::AdminAdvance(p)
            | ClientToServerMessage::AdminStartLottery(p)
            | ClientToServerMessage::AdminFinishGame(p) => &p.game_id,
        }
    }

    /// `Some` for admin commands, holding whatever token came with it.
    pub fn admin_token(&self) -> Option<Option<&str>> {
        match self {
            ClientToServerMessage::JoinGame(_)
            | ClientToServerMessage::SubmitAnswer(_)
            | ClientToServerMessage::RequestSync(_) => None,
            ClientToServerMessage::AdminStartQuestion(p) => Some(p.token.as_deref()),
            ClientToServerMessage::AdminInitGame(p)
            | ClientToServerMessage::AdminCloseQuestion(p)
            | ClientToServerMessage::AdminAdvance(p)
            | ClientToServerMessage::AdminStartLottery(p)
            | ClientToServerMessage::AdminFinishGame(p) => Some(p.token.as_deref()),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientToServerMessage::JoinGame(_) => "JOIN_GAME",
            ClientToServerMessage::SubmitAnswer(_) => "SUBMIT_ANSWER",
            ClientToServerMessage::RequestSync(_) => "REQUEST_SYNC",
            ClientToServerMessage::AdminInitGame(_) => "ADMIN_INIT_GAME",
            ClientToServerMessage::AdminStartQuestion(_) => "ADMIN_START_QUESTION",
            ClientToServerMessage::AdminCloseQuestion(_) => "ADMIN_CLOSE_QUESTION",
            ClientToServerMessage::AdminAdvance(_) => "ADMIN_ADVANCE",
            ClientToServerMessage::AdminStartLottery(_) => "ADMIN_START_LOTTERY",
            ClientToServerMessage::AdminFinishGame(_) => "ADMIN_FINISH_GAME",
        }
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Messages sent from the orchestrator to clients.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerToClientMessage {
    GameStateSync(Box<GameStateSync>),
    PlayersUpdate {
        count: usize,
        connected: usize,
    },
    LeaderboardUpdate {
        ordered_players: Vec<PlayerView>,
    },
    /// The correct option is never part of this payload.
    NewQuestion(QuestionView),
    AnswerReceived {
        question_index: usize,
    },
    RoundResults(RoundResult),
    LotteryResults(LotteryResult),
    AdminAck {
        command: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn error(err: &GameError) -> Self {
        ServerToClientMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question_index: usize,
    pub text: String,
    pub options: Vec<String>,
    pub timer_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloseTrigger {
    Timer,
    Admin,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub question_index: usize,
    pub correct_index: usize,
    pub winners: Vec<PlayerView>,
    pub correct_count: usize,
    pub closed_by: CloseTrigger,
    pub closed_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotteryResult {
    pub winners: Vec<PlayerView>,
    pub eligible_pool: Vec<PlayerView>,
    pub requested: usize,
    pub drawn_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PhaseResult {
    Round(RoundResult),
    Lottery(LotteryResult),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameSettingsView {
    pub game_kind: GameKind,
    pub winners_per_round: usize,
    pub total_winners: usize,
    pub avoid_repeat_winners: bool,
    pub question_timer_secs: u64,
}

/// Everything a client needs to rebuild its screen from scratch.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSync {
    pub game_id: GameId,
    pub name: String,
    pub phase: Phase,
    pub game_kind: GameKind,
    pub settings: GameSettingsView,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub player_count: usize,
    pub connected_count: usize,
    pub current_question: Option<QuestionView>,
    pub last_result: Option<PhaseResult>,
    pub leaderboard: Vec<PlayerView>,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_with_numeric_game_id() {
        let raw = r#"{"event":"JOIN_GAME","data":{"gameId":12,"playerId":"abc","name":"Ana","extra":"7788","avatar":"🦊"}}"#;
        match client_message_from_ws_text(raw).unwrap() {
            ClientToServerMessage::JoinGame(payload) => {
                assert_eq!(payload.game_id, "12");
                assert_eq!(payload.player_id, "abc");
                assert_eq!(payload.avatar, "🦊");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn accepts_legacy_field_names() {
        let answer = client_message_from_ws_text(
            r#"{"event":"SUBMIT_ANSWER","data":{"gameId":"5","answerIdx":2}}"#,
        )
        .unwrap();
        assert!(matches!(
            answer,
            ClientToServerMessage::SubmitAnswer(SubmitAnswerPayload { option_index: 2, .. })
        ));

        let start = client_message_from_ws_text(
            r#"{"event":"ADMIN_START_QUESTION","data":{"token":"t","gameId":"5","qIndex":1}}"#,
        )
        .unwrap();
        assert_eq!(start.admin_token(), Some(Some("t")));
        assert_eq!(start.event_name(), "ADMIN_START_QUESTION");
    }

    #[test]
    fn admin_command_without_token_still_parses() {
        let msg =
            client_message_from_ws_text(r#"{"event":"ADMIN_FINISH_GAME","data":{"gameId":"5"}}"#)
                .unwrap();
        assert_eq!(msg.admin_token(), Some(None));
        assert_eq!(msg.game_id(), "5");
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(client_message_from_ws_text(r#"{"event":"HACK","data":{}}"#).is_err());
    }

    #[test]
    fn outbound_frames_use_event_envelope() {
        let ack = serde_json::to_value(ServerToClientMessage::AnswerReceived { question_index: 3 })
            .unwrap();
        assert_eq!(
            ack,
            json!({"event": "ANSWER_RECEIVED", "data": {"questionIndex": 3}})
        );

        let err = serde_json::to_value(ServerToClientMessage::error(&GameError::NoOpenRound))
            .unwrap();
        assert_eq!(err["event"], "ERROR");
        assert_eq!(err["data"]["code"], "NO_OPEN_ROUND");
    }

    #[test]
    fn new_question_carries_no_correct_index() {
        let frame = serde_json::to_value(ServerToClientMessage::NewQuestion(QuestionView {
            question_index: 0,
            text: "?".to_string(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            timer_secs: 25,
            remaining_secs: None,
        }))
        .unwrap();
        assert_eq!(frame["event"], "NEW_QUESTION");
        let data = frame["data"].as_object().unwrap();
        assert!(!data.keys().any(|k| k.to_lowercase().contains("correct")));
        assert!(!data.contains_key("remainingSecs"));
    }
}
