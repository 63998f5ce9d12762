use std::collections::{HashMap, HashSet};

use crate::catalog::Question;

use super::{GameError, OPTIONS_PER_QUESTION, PlayerId};

pub type RoundId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedAnswer {
    pub option_index: usize,
    /// Position in the session-wide arrival sequence.
    pub arrival: u64,
}

#[derive(Debug)]
struct OpenRound {
    id: RoundId,
    question_index: usize,
    accepted: HashMap<PlayerId, AcceptedAnswer>,
}

/// Outcome of closing a round, before scores are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSelection {
    pub round_id: RoundId,
    pub question_index: usize,
    pub correct_option_index: usize,
    /// Correct responders in arrival order.
    pub correct: Vec<PlayerId>,
    pub winners: Vec<PlayerId>,
}

#[derive(Debug, Default)]
pub struct RoundEngine {
    open: Option<OpenRound>,
    last_round_id: RoundId,
    next_arrival: u64,
}

impl RoundEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, question_index: usize, total_questions: usize) -> Result<RoundId, GameError> {
        if question_index >= total_questions || self.open.is_some() {
            return Err(GameError::InvalidIndex {
                index: question_index,
                total: total_questions,
            });
        }

        self.last_round_id += 1;
        self.open = Some(OpenRound {
            id: self.last_round_id,
            question_index,
            accepted: HashMap::new(),
        });
        Ok(self.last_round_id)
    }

    /// Records a first answer from `player_id`. Returns the open question's
    /// index when accepted; late, repeated and out-of-range answers yield `None`.
    pub fn submit_answer(&mut self, player_id: &str, option_index: usize) -> Option<usize> {
        let round = self.open.as_mut()?;
        if option_index >= OPTIONS_PER_QUESTION || round.accepted.contains_key(player_id) {
            return None;
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;
        round.accepted.insert(
            player_id.to_string(),
            AcceptedAnswer {
                option_index,
                arrival,
            },
        );
        Some(round.question_index)
    }

    /// Closes the open round and picks the first `winners_per_round` correct
    /// responders, skipping anyone in `excluded`.
    pub fn close(
        &mut self,
        question: &Question,
        winners_per_round: usize,
        excluded: Option<&HashSet<PlayerId>>,
    ) -> Result<RoundSelection, GameError> {
        let round = self.open.take().ok_or(GameError::NoOpenRound)?;

        let mut correct: Vec<(PlayerId, u64)> = round
            .accepted
            .into_iter()
            .filter(|(_, answer)| answer.option_index == question.correct_option_index)
            .map(|(player_id, answer)| (player_id, answer.arrival))
            .collect();
        correct.sort_by_key(|(_, arrival)| *arrival);
        let correct: Vec<PlayerId> = correct.into_iter().map(|(id, _)| id).collect();

        let winners = correct
            .iter()
            .filter(|id| excluded.is_none_or(|past| !past.contains(*id)))
            .take(winners_per_round)
            .cloned()
            .collect();

        Ok(RoundSelection {
            round_id: round.id,
            question_index: round.question_index,
            correct_option_index: question.correct_option_index,
            correct,
            winners,
        })
    }

    /// Drops the open round without scoring it.
    pub fn abandon(&mut self) -> bool {
        self.open.take().is_some()
    }

    pub fn open_question_index(&self) -> Option<usize> {
        self.open.as_ref().map(|r| r.question_index)
    }

    pub fn answer_count(&self) -> usize {
        self.open.as_ref().map_or(0, |r| r.accepted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: usize) -> Question {
        Question {
            text: "Capital of Peru?".to_string(),
            options: vec!["Lima", "Cusco", "Quito", "Arequipa"]
                .into_iter()
                .map(String::from)
                .collect(),
            correct_option_index: correct,
        }
    }

    #[test]
    fn open_rejects_out_of_range_and_double_open() {
        let mut engine = RoundEngine::new();
        assert_eq!(
            engine.open(2, 2),
            Err(GameError::InvalidIndex { index: 2, total: 2 })
        );
        assert!(engine.open(0, 2).is_ok());
        assert!(matches!(engine.open(1, 2), Err(GameError::InvalidIndex { .. })));
    }

    #[test]
    fn submissions_are_first_answer_only() {
        let mut engine = RoundEngine::new();
        assert_eq!(engine.submit_answer("p1", 0), None, "no round open");

        engine.open(0, 1).unwrap();
        assert_eq!(engine.submit_answer("p1", 0), Some(0));
        assert_eq!(engine.submit_answer("p1", 1), None, "duplicate");
        assert_eq!(engine.submit_answer("p2", 4), None, "out of range");
        assert_eq!(engine.answer_count(), 1);
    }

    #[test]
    fn winners_are_first_correct_by_arrival() {
        let mut engine = RoundEngine::new();
        engine.open(0, 1).unwrap();
        engine.submit_answer("wrong", 1);
        engine.submit_answer("early", 0);
        engine.submit_answer("middle", 0);
        engine.submit_answer("late", 0);

        let selection = engine.close(&question(0), 2, None).unwrap();
        assert_eq!(selection.correct, vec!["early", "middle", "late"]);
        assert_eq!(selection.winners, vec!["early", "middle"]);
        assert_eq!(selection.correct_option_index, 0);
        assert_eq!(engine.open_question_index(), None);
    }

    #[test]
    fn excluded_players_do_not_take_winner_slots() {
        let mut engine = RoundEngine::new();
        engine.open(0, 1).unwrap();
        engine.submit_answer("past_winner", 2);
        engine.submit_answer("newcomer", 2);

        let past = HashSet::from(["past_winner".to_string()]);
        let selection = engine.close(&question(2), 1, Some(&past)).unwrap();
        assert_eq!(selection.correct, vec!["past_winner", "newcomer"]);
        assert_eq!(selection.winners, vec!["newcomer"]);
    }

    #[test]
    fn second_close_reports_no_open_round() {
        let mut engine = RoundEngine::new();
        engine.open(0, 1).unwrap();
        engine.close(&question(0), 1, None).unwrap();
        assert_eq!(
            engine.close(&question(0), 1, None),
            Err(GameError::NoOpenRound)
        );
    }

    #[test]
    fn reopening_clears_previous_answers() {
        let mut engine = RoundEngine::new();
        let first = engine.open(0, 2).unwrap();
        engine.submit_answer("p1", 0);
        engine.close(&question(0), 1, None).unwrap();

        let second = engine.open(1, 2).unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.answer_count(), 0);
        assert_eq!(engine.submit_answer("p1", 3), Some(1));
    }
}
