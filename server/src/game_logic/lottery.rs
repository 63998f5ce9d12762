use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use super::{GameError, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotteryDraw {
    pub winners: Vec<PlayerId>,
    /// Everyone who could have won, after repeat-winner exclusion.
    pub eligible_pool: Vec<PlayerId>,
    pub requested: usize,
}

impl LotteryDraw {
    /// `InsufficientPlayers` when the pool could not fill every slot. The draw
    /// itself still stands: every eligible player won.
    pub fn shortfall(&self) -> Option<GameError> {
        (self.winners.len() < self.requested).then(|| GameError::InsufficientPlayers {
            requested: self.requested,
            available: self.eligible_pool.len(),
        })
    }
}

/// Uniform sample without replacement of `total_winners` players from `pool`.
pub fn draw<'a, R: Rng + ?Sized>(
    pool: impl IntoIterator<Item = &'a PlayerId>,
    total_winners: usize,
    excluded: Option<&HashSet<PlayerId>>,
    rng: &mut R,
) -> LotteryDraw {
    let eligible_pool: Vec<PlayerId> = pool
        .into_iter()
        .filter(|id| excluded.is_none_or(|past| !past.contains(*id)))
        .cloned()
        .collect();

    let winners = eligible_pool
        .choose_multiple(rng, total_winners)
        .cloned()
        .collect();

    LotteryDraw {
        winners,
        eligible_pool,
        requested: total_winners,
    }
}
