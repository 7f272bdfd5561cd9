//! Moves, the payoff matrix and the strategy record shared by every stage of a run.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::adapter::AdaptedStrategy;

/// A move in the Prisoner's Dilemma.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Move {
    /// Stay silent.
    Cooperate,
    /// Betray the opponent.
    Defect,
}

impl Move {
    /// Canonical spelling, as strategies see it in their history.
    pub fn as_str(self) -> &'static str {
        match self {
            Move::Cooperate => "Cooperate",
            Move::Defect => "Defect",
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Move {
    type Err = String;

    /// Case-insensitive parse of `"cooperate"` or `"defect"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("cooperate") {
            Ok(Move::Cooperate)
        } else if s.eq_ignore_ascii_case("defect") {
            Ok(Move::Defect)
        } else {
            Err(format!("'{s}' is not a move"))
        }
    }
}

/// Points earned by each side for one round.
///
/// `payoff(b, a)` is always `payoff(a, b)` with the scores swapped.
pub fn payoff(a: Move, b: Move) -> (u32, u32) {
    match (a, b) {
        (Move::Cooperate, Move::Cooperate) => (3, 3),
        (Move::Cooperate, Move::Defect) => (0, 5),
        (Move::Defect, Move::Cooperate) => (5, 0),
        (Move::Defect, Move::Defect) => (1, 1),
    }
}

/// Moves played by one side so far, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoveHistory(Vec<Move>);

impl MoveHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(rounds: usize) -> Self {
        Self(Vec::with_capacity(rounds))
    }

    pub(crate) fn push(&mut self, mv: Move) {
        self.0.push(mv);
    }

    /// Moves as a slice.
    pub fn as_slice(&self) -> &[Move] {
        &self.0
    }

    /// Number of rounds recorded.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` before the first round.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of times `mv` was played.
    pub fn count(&self, mv: Move) -> usize {
        self.0.iter().filter(|m| **m == mv).count()
    }
}

impl From<Vec<Move>> for MoveHistory {
    fn from(moves: Vec<Move>) -> Self {
        Self(moves)
    }
}

/// Outcome of validating a strategy source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ValidationStatus {
    /// The strategy may be played.
    Accepted,
    /// The strategy never runs. Holds at least one reason.
    Rejected(Vec<String>),
}

impl ValidationStatus {
    /// `true` for [`ValidationStatus::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationStatus::Accepted)
    }

    /// Rejection reasons, empty when accepted.
    pub fn reasons(&self) -> &[String] {
        match self {
            ValidationStatus::Accepted => &[],
            ValidationStatus::Rejected(reasons) => reasons,
        }
    }
}

/// A named unit of decision logic, created once per run from its source and never modified.
#[derive(Clone, Debug)]
pub struct Strategy {
    id: String,
    source: Arc<str>,
    status: ValidationStatus,
    decision: Option<Arc<AdaptedStrategy>>,
}

impl Strategy {
    pub(crate) fn accepted(id: String, source: Arc<str>, decision: AdaptedStrategy) -> Self {
        Self {
            id,
            source,
            status: ValidationStatus::Accepted,
            decision: Some(Arc::new(decision)),
        }
    }

    pub(crate) fn rejected(id: String, source: Arc<str>, reasons: Vec<String>) -> Self {
        debug_assert!(!reasons.is_empty());
        Self {
            id,
            source,
            status: ValidationStatus::Rejected(reasons),
            decision: None,
        }
    }

    /// Unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source text the strategy was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Validation outcome.
    pub fn status(&self) -> &ValidationStatus {
        &self.status
    }

    /// `true` if the strategy can be played.
    pub fn is_accepted(&self) -> bool {
        self.status.is_accepted()
    }

    pub(crate) fn decision(&self) -> Option<&AdaptedStrategy> {
        self.decision.as_deref()
    }
}

impl PartialEq for Strategy {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Strategy {}

#[cfg(test)]
mod tests {
    use proptest::{prop_assert_eq, prop_oneof, proptest, strategy::Just};

    use super::*;

    fn any_move() -> impl proptest::strategy::Strategy<Value = Move> {
        prop_oneof![Just(Move::Cooperate), Just(Move::Defect)]
    }

    #[test]
    fn test_payoff_matrix() {
        assert_eq!(payoff(Move::Cooperate, Move::Cooperate), (3, 3));
        assert_eq!(payoff(Move::Cooperate, Move::Defect), (0, 5));
        assert_eq!(payoff(Move::Defect, Move::Cooperate), (5, 0));
        assert_eq!(payoff(Move::Defect, Move::Defect), (1, 1));
    }

    #[test]
    fn test_move_parsing_is_case_insensitive() {
        assert_eq!("cooperate".parse::<Move>(), Ok(Move::Cooperate));
        assert_eq!("DEFECT".parse::<Move>(), Ok(Move::Defect));
        assert!("Defect ".parse::<Move>().is_err());
        assert!("C".parse::<Move>().is_err());
    }

    #[test]
    fn test_history_counts() {
        let history = MoveHistory::from(vec![Move::Defect, Move::Cooperate, Move::Defect]);
        assert_eq!(history.count(Move::Defect), 2);
        assert_eq!(history.len(), 3);
        assert_eq!(
            serde_json::to_string(&history).unwrap(),
            r#"["Defect","Cooperate","Defect"]"#
        );
    }

    proptest! {
        #[test]
        fn payoff_is_symmetric(a in any_move(), b in any_move()) {
            let (x, y) = payoff(a, b);
            prop_assert_eq!(payoff(b, a), (y, x));
        }
    }
}
