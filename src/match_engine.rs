//! Match execution engine

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::adapter::{AdaptedStrategy, Incident};
use crate::strategy::{payoff, MoveHistory};

/// Result of a complete match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// First player.
    pub strategy_a: String,
    /// Second player.
    pub strategy_b: String,
    /// Rounds played.
    pub rounds: u32,
    /// Points earned by the first player.
    pub score_a: u32,
    /// Points earned by the second player.
    pub score_b: u32,
    /// Every move of the first player.
    pub moves_a: MoveHistory,
    /// Every move of the second player.
    pub moves_b: MoveHistory,
    /// Substitutions and contained errors, in round order.
    pub incidents: Vec<Incident>,
}

impl MatchResult {
    /// Score earned by `id` in this match, if it took part.
    pub fn score_of(&self, id: &str) -> Option<u32> {
        if id == self.strategy_a {
            Some(self.score_a)
        } else if id == self.strategy_b {
            Some(self.score_b)
        } else {
            None
        }
    }
}

/// Plays `rounds` rounds between `a` and `b`.
///
/// Each round both sides decide on the other's moves from previous rounds only. Each side draws
/// randomness from its own ChaCha stream seeded with `seed`, so the result depends on nothing but
/// the two strategies, `rounds` and `seed`. Zero rounds gives zero scores and empty histories.
pub fn play(a: &AdaptedStrategy, b: &AdaptedStrategy, rounds: u32, seed: u64) -> MatchResult {
    let mut rng_a = ChaCha8Rng::seed_from_u64(seed);
    rng_a.set_stream(0);
    let mut rng_b = ChaCha8Rng::seed_from_u64(seed);
    rng_b.set_stream(1);

    let capacity = rounds as usize;
    let mut moves_a = MoveHistory::with_capacity(capacity);
    let mut moves_b = MoveHistory::with_capacity(capacity);
    let mut score_a = 0u32;
    let mut score_b = 0u32;
    let mut incidents = vec![];

    for round in 1..=rounds {
        let decision_a = a.decide(moves_b.as_slice(), &mut rng_a);
        let decision_b = b.decide(moves_a.as_slice(), &mut rng_b);

        for (strategy, incident) in [(a, decision_a.incident), (b, decision_b.incident)] {
            if let Some(kind) = incident {
                incidents.push(Incident {
                    strategy: strategy.id().to_string(),
                    round,
                    kind,
                });
            }
        }

        let (points_a, points_b) = payoff(decision_a.choice, decision_b.choice);
        score_a = score_a.saturating_add(points_a);
        score_b = score_b.saturating_add(points_b);

        moves_a.push(decision_a.choice);
        moves_b.push(decision_b.choice);
    }

    MatchResult {
        strategy_a: a.id().to_string(),
        strategy_b: b.id().to_string(),
        rounds,
        score_a,
        score_b,
        moves_a,
        moves_b,
        incidents,
    }
}
