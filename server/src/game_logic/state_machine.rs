use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::catalog::{GameDefinition, Question};
use crate::config::GameRulesConfig;

use super::leaderboard::leaderboard;
use super::lottery;
use super::messages::{
    CloseTrigger, GameSettingsView, GameStateSync, LotteryResult, PhaseResult, QuestionView,
    RoundResult, ServerToClientMessage,
};
use super::players::{JoinOutcome, JoinRequest, PlayerDirectory};
use super::round::RoundEngine;
use super::{ConnectionId, GameError, GameId, GameKind, Phase, PlayerId};

const DEFAULT_WINNERS_PER_ROUND: u32 = 1;
const DEFAULT_TOTAL_LOTTERY_WINNERS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Connection(ConnectionId),
}

/// A message the session wants delivered; the owning actor does the I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub audience: Audience,
    pub message: ServerToClientMessage,
}

impl Outbound {
    fn everyone(message: ServerToClientMessage) -> Self {
        Self {
            audience: Audience::Everyone,
            message,
        }
    }

    fn to(connection_id: ConnectionId, message: ServerToClientMessage) -> Self {
        Self {
            audience: Audience::Connection(connection_id),
            message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub game_kind: GameKind,
    pub winners_per_round: usize,
    pub total_winners: usize,
    pub avoid_repeat_winners: bool,
    pub question_timer: Duration,
    pub lottery_reveal: Duration,
    pub points_per_win: u32,
}

impl SessionSettings {
    pub fn from_definition(definition: &GameDefinition, rules: &GameRulesConfig) -> Self {
        let question_timer = definition
            .timer_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| rules.question_timer());

        Self {
            game_kind: definition.game_kind,
            winners_per_round: definition
                .winners_per_round
                .unwrap_or(DEFAULT_WINNERS_PER_ROUND) as usize,
            total_winners: definition
                .total_winners
                .unwrap_or(DEFAULT_TOTAL_LOTTERY_WINNERS) as usize,
            avoid_repeat_winners: definition.avoid_repeat_winners,
            question_timer,
            lottery_reveal: rules.lottery_reveal(),
            points_per_win: rules.points_per_win,
        }
    }
}

/// Inputs that move the session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEvent {
    StartQuestion,
    CloseRound,
    Advance,
    StartLottery,
    RevealLottery,
    Finish,
}

impl SessionEvent {
    fn command_name(self) -> &'static str {
        match self {
            SessionEvent::StartQuestion => "ADMIN_START_QUESTION",
            SessionEvent::CloseRound => "ADMIN_CLOSE_QUESTION",
            SessionEvent::Advance => "ADMIN_ADVANCE",
            SessionEvent::StartLottery => "ADMIN_START_LOTTERY",
            SessionEvent::RevealLottery => "LOTTERY_REVEAL",
            SessionEvent::Finish => "ADMIN_FINISH_GAME",
        }
    }
}

/// Authoritative state of one running game.
///
/// All methods are synchronous and return the deliveries they produce; the
/// session actor owns the only instance, which serializes every mutation.
#[derive(Debug)]
pub struct GameSession {
    game_id: GameId,
    name: String,
    settings: SessionSettings,
    questions: Vec<Question>,
    phase: Phase,
    current_question_index: usize,
    players: PlayerDirectory,
    round: RoundEngine,
    past_winner_ids: HashSet<PlayerId>,
    last_result: Option<PhaseResult>,
    deadline: Option<Instant>,
    rng: StdRng,
    version: u64,
}

impl GameSession {
    pub fn new(definition: &GameDefinition, rules: &GameRulesConfig) -> Self {
        Self::with_rng(definition, rules, StdRng::from_entropy())
    }

    pub fn with_rng(definition: &GameDefinition, rules: &GameRulesConfig, rng: StdRng) -> Self {
        let questions = match definition.game_kind {
            GameKind::Questions => definition.questions.clone(),
            GameKind::Lottery => Vec::new(),
        };

        Self {
            game_id: definition.id.clone(),
            name: definition.name.clone(),
            settings: SessionSettings::from_definition(definition, rules),
            questions,
            phase: Phase::Waiting,
            current_question_index: 0,
            players: PlayerDirectory::new(),
            round: RoundEngine::new(),
            past_winner_ids: HashSet::new(),
            last_result: None,
            deadline: None,
            rng,
            version: 0,
        }
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn game_kind(&self) -> GameKind {
        self.settings.game_kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn connected_count(&self) -> usize {
        self.players.connected_count()
    }

    /// When the open round (or lottery reveal) should end on its own.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn snapshot(&self) -> GameStateSync {
        let current_question = match self.phase {
            Phase::Question => self
                .round
                .open_question_index()
                .and_then(|index| self.question_view(index, true)),
            _ => None,
        };
        let last_result = match self.phase {
            Phase::Running | Phase::Result | Phase::Finished => self.last_result.clone(),
            Phase::Waiting | Phase::Question => None,
        };

        GameStateSync {
            game_id: self.game_id.clone(),
            name: self.name.clone(),
            phase: self.phase,
            game_kind: self.settings.game_kind,
            settings: GameSettingsView {
                game_kind: self.settings.game_kind,
                winners_per_round: self.settings.winners_per_round,
                total_winners: self.settings.total_winners,
                avoid_repeat_winners: self.settings.avoid_repeat_winners,
                question_timer_secs: self.settings.question_timer.as_secs(),
            },
            current_question_index: self.current_question_index,
            total_questions: self.questions.len(),
            player_count: self.players.len(),
            connected_count: self.players.connected_count(),
            current_question,
            last_result,
            leaderboard: leaderboard(&self.players),
            version: self.version,
        }
    }

    pub fn sync_for(&self, connection_id: ConnectionId) -> Vec<Outbound> {
        vec![Outbound::to(connection_id, self.sync_message())]
    }

    /// The host console attached (or re-attached after a reload).
    pub fn attach_host(&self, connection_id: ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        Ok(vec![
            Outbound::to(connection_id, self.sync_message()),
            Outbound::to(connection_id, self.players_message()),
            Outbound::to(connection_id, self.leaderboard_message()),
            ack(connection_id, "ADMIN_INIT_GAME"),
        ])
    }

    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        request: JoinRequest,
    ) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        if request.player_id.trim().is_empty() {
            return Err(GameError::BadRequest("playerId must not be empty".to_string()));
        }

        let player_id = request.player_id.clone();
        let outcome = self.players.join(request, connection_id);
        tracing::info!(
            session.id = %self.game_id,
            player.id = %player_id,
            client.id = %connection_id,
            rejoined = outcome == JoinOutcome::Rejoined,
            player.joined_at = ?self.players.get(&player_id).map(|p| p.joined_at),
            players.count = self.players.len(),
            "Player joined"
        );

        Ok(vec![
            Outbound::everyone(self.players_message()),
            Outbound::everyone(self.leaderboard_message()),
            Outbound::to(connection_id, self.sync_message()),
        ])
    }

    pub fn leave(&mut self, player_id: &str, connection_id: ConnectionId) -> Vec<Outbound> {
        if self.is_finished() || !self.players.leave(player_id, connection_id) {
            return Vec::new();
        }
        tracing::debug!(
            session.id = %self.game_id,
            player.id = %player_id,
            "Player marked absent"
        );
        vec![Outbound::everyone(self.players_message())]
    }

    /// Late, duplicate and malformed answers are dropped without an error so
    /// that client retries stay harmless.
    pub fn submit_answer(
        &mut self,
        player_id: &str,
        connection_id: ConnectionId,
        option_index: i64,
    ) -> Vec<Outbound> {
        if self.phase != Phase::Question || !self.players.contains(player_id) {
            return Vec::new();
        }
        let Ok(option_index) = usize::try_from(option_index) else {
            return Vec::new();
        };

        match self.round.submit_answer(player_id, option_index) {
            Some(question_index) => {
                tracing::debug!(
                    session.id = %self.game_id,
                    player.id = %player_id,
                    question.index = question_index,
                    answers.count = self.round.answer_count(),
                    "Answer accepted"
                );
                vec![Outbound::to(
                    connection_id,
                    ServerToClientMessage::AnswerReceived { question_index },
                )]
            }
            None => {
                tracing::trace!(player.id = %player_id, "Answer ignored");
                Vec::new()
            }
        }
    }

    pub fn start_question(
        &mut self,
        connection_id: ConnectionId,
        question_index: usize,
    ) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        let next = self.next_phase(SessionEvent::StartQuestion)?;

        let total = self.questions.len();
        if question_index >= total {
            return Err(GameError::InvalidIndex {
                index: question_index,
                total,
            });
        }
        if question_index != self.current_question_index {
            return Err(GameError::QuestionOutOfOrder {
                requested: question_index,
                expected: self.current_question_index,
            });
        }

        let round_id = self.round.open(question_index, total)?;
        self.deadline = Some(Instant::now() + self.settings.question_timer);
        self.last_result = None;
        self.enter(next);

        tracing::info!(
            session.id = %self.game_id,
            question.index = question_index,
            round.id = round_id,
            timer.secs = self.settings.question_timer.as_secs(),
            "Question round opened"
        );

        let mut out = Vec::with_capacity(3);
        if let Some(view) = self.question_view(question_index, false) {
            out.push(Outbound::everyone(ServerToClientMessage::NewQuestion(view)));
        }
        out.push(Outbound::everyone(self.sync_message()));
        out.push(ack(connection_id, SessionEvent::StartQuestion.command_name()));
        Ok(out)
    }

    pub fn close_question(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        let mut out = self.close_round(CloseTrigger::Admin)?;
        out.push(ack(connection_id, SessionEvent::CloseRound.command_name()));
        Ok(out)
    }

    pub fn advance(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        let next = self.next_phase(SessionEvent::Advance)?;

        self.current_question_index += 1;
        self.last_result = None;
        self.enter(next);

        tracing::info!(
            session.id = %self.game_id,
            question.next = self.current_question_index,
            questions.total = self.questions.len(),
            "Advanced to next question"
        );

        Ok(vec![
            Outbound::everyone(self.sync_message()),
            ack(connection_id, SessionEvent::Advance.command_name()),
        ])
    }

    /// Draws the winners right away; the RUNNING phase only gives clients time
    /// to play their reveal animation.
    pub fn start_lottery(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        let next = self.next_phase(SessionEvent::StartLottery)?;

        let excluded = self
            .settings
            .avoid_repeat_winners
            .then_some(&self.past_winner_ids);
        let draw = lottery::draw(
            self.players.iter().map(|p| &p.id),
            self.settings.total_winners,
            excluded,
            &mut self.rng,
        );
        let shortfall = draw.shortfall();
        self.past_winner_ids.extend(draw.winners.iter().cloned());

        let result = LotteryResult {
            winners: self.players.views(&draw.winners),
            eligible_pool: self.players.views(&draw.eligible_pool),
            requested: draw.requested,
            drawn_at: Utc::now(),
        };
        self.last_result = Some(PhaseResult::Lottery(result.clone()));
        self.enter(next);

        tracing::info!(
            session.id = %self.game_id,
            lottery.requested = draw.requested,
            lottery.pool = draw.eligible_pool.len(),
            lottery.winners = ?draw.winners,
            "Lottery drawn"
        );

        let mut out = vec![
            Outbound::everyone(ServerToClientMessage::LotteryResults(result)),
            Outbound::everyone(self.sync_message()),
        ];
        if self.settings.lottery_reveal.is_zero() {
            let reveal = self.next_phase(SessionEvent::RevealLottery)?;
            self.enter(reveal);
            out.push(Outbound::everyone(self.sync_message()));
        } else {
            self.deadline = Some(Instant::now() + self.settings.lottery_reveal);
        }
        out.push(ack(connection_id, SessionEvent::StartLottery.command_name()));
        if let Some(warning) = shortfall {
            tracing::warn!(session.id = %self.game_id, error = %warning, "Lottery pool too small");
            out.push(Outbound::to(connection_id, ServerToClientMessage::error(&warning)));
        }
        Ok(out)
    }

    pub fn finish(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.ensure_live()?;
        let next = self.next_phase(SessionEvent::Finish)?;

        if self.round.abandon() {
            tracing::info!(session.id = %self.game_id, "Open round dropped by finish");
        }
        self.deadline = None;
        self.enter(next);

        tracing::info!(
            session.id = %self.game_id,
            players.count = self.players.len(),
            "Session finished"
        );

        Ok(vec![
            Outbound::everyone(self.leaderboard_message()),
            Outbound::everyone(self.sync_message()),
            ack(connection_id, SessionEvent::Finish.command_name()),
        ])
    }

    /// Fired by the owning actor once `deadline()` passes.
    pub fn deadline_elapsed(&mut self) -> Vec<Outbound> {
        if self.deadline.take().is_none() {
            return Vec::new();
        }

        match self.phase {
            Phase::Question => self.close_round(CloseTrigger::Timer).unwrap_or_else(|e| {
                tracing::debug!(session.id = %self.game_id, error = %e, "Timer close skipped");
                Vec::new()
            }),
            Phase::Running => match self.next_phase(SessionEvent::RevealLottery) {
                Ok(next) => {
                    self.enter(next);
                    vec![Outbound::everyone(self.sync_message())]
                }
                Err(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Single close path for both the timer and the admin.
    fn close_round(&mut self, trigger: CloseTrigger) -> Result<Vec<Outbound>, GameError> {
        if self.phase != Phase::Question {
            return Err(GameError::NoOpenRound);
        }
        let next = self.next_phase(SessionEvent::CloseRound)?;
        let question_index = self.round.open_question_index().ok_or(GameError::NoOpenRound)?;
        let question = self.questions.get(question_index).ok_or(GameError::InvalidIndex {
            index: question_index,
            total: self.questions.len(),
        })?;

        let excluded = self
            .settings
            .avoid_repeat_winners
            .then_some(&self.past_winner_ids);
        let selection = self
            .round
            .close(question, self.settings.winners_per_round, excluded)?;

        for winner in &selection.winners {
            self.players.award(winner, self.settings.points_per_win);
            self.past_winner_ids.insert(winner.clone());
        }
        self.deadline = None;

        let result = RoundResult {
            question_index: selection.question_index,
            correct_index: selection.correct_option_index,
            winners: self.players.views(&selection.winners),
            correct_count: selection.correct.len(),
            closed_by: trigger,
            closed_at: Utc::now(),
        };
        self.last_result = Some(PhaseResult::Round(result.clone()));
        self.enter(next);

        tracing::info!(
            session.id = %self.game_id,
            question.index = selection.question_index,
            round.id = selection.round_id,
            round.closed_by = ?trigger,
            round.correct = selection.correct.len(),
            round.winners = ?selection.winners,
            "Question round closed"
        );

        Ok(vec![
            Outbound::everyone(ServerToClientMessage::RoundResults(result)),
            Outbound::everyone(self.leaderboard_message()),
            Outbound::everyone(self.sync_message()),
        ])
    }

    fn ensure_live(&self) -> Result<(), GameError> {
        if self.is_finished() {
            return Err(GameError::SessionNotFound(self.game_id.clone()));
        }
        Ok(())
    }

    fn next_phase(&self, event: SessionEvent) -> Result<Phase, GameError> {
        let kind = self.settings.game_kind;
        let next = match (self.phase, event) {
            (Phase::Waiting, SessionEvent::StartQuestion) if kind == GameKind::Questions => {
                Phase::Question
            }
            (Phase::Question, SessionEvent::CloseRound) => Phase::Result,
            (Phase::Result, SessionEvent::Advance) if kind == GameKind::Questions => Phase::Waiting,
            (Phase::Waiting, SessionEvent::StartLottery) if kind == GameKind::Lottery => {
                Phase::Running
            }
            (Phase::Running, SessionEvent::RevealLottery) => Phase::Result,
            (from, SessionEvent::Finish) if from != Phase::Finished => Phase::Finished,
            (from, event) => {
                return Err(GameError::OutOfSequence {
                    command: event.command_name(),
                    phase: from,
                });
            }
        };
        Ok(next)
    }

    fn enter(&mut self, next: Phase) {
        tracing::debug!(
            session.id = %self.game_id,
            phase.from = ?self.phase,
            phase.to = ?next,
            "Phase transition"
        );
        self.phase = next;
        self.version += 1;
    }

    fn question_view(&self, index: usize, with_remaining: bool) -> Option<QuestionView> {
        let question = self.questions.get(index)?;
        let remaining_secs = if with_remaining {
            self.deadline.map(|deadline| {
                let left = deadline.saturating_duration_since(Instant::now());
                left.as_millis().div_ceil(1000) as u64
            })
        } else {
            None
        };
        Some(QuestionView {
            question_index: index,
            text: question.text.clone(),
            options: question.options.clone(),
            timer_secs: self.settings.question_timer.as_secs(),
            remaining_secs,
        })
    }

    fn sync_message(&self) -> ServerToClientMessage {
        ServerToClientMessage::GameStateSync(Box::new(self.snapshot()))
    }

    fn players_message(&self) -> ServerToClientMessage {
        ServerToClientMessage::PlayersUpdate {
            count: self.players.len(),
            connected: self.players.connected_count(),
        }
    }

    fn leaderboard_message(&self) -> ServerToClientMessage {
        ServerToClientMessage::LeaderboardUpdate {
            ordered_players: leaderboard(&self.players),
        }
    }
}

fn ack(connection_id: ConnectionId, command: &str) -> Outbound {
    Outbound::to(
        connection_id,
        ServerToClientMessage::AdminAck {
            command: command.to_string(),
        },
    )
}
