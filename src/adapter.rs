//! Uniform calling contract for accepted strategies.
//!
//! Whatever signature a strategy function declares, the rest of the crate only ever calls
//! [`AdaptedStrategy::decide`] with the opponent's history. The signature is inspected once, when
//! the strategy is loaded. Every call is normalized to a [`Move`], and anything that goes wrong
//! inside the strategy turns into `Cooperate` plus an [`IncidentKind`] for that round.

use rand::Rng;
use serde::Serialize;
use tracing::warn;

use crate::script::{FunctionDef, Interpreter, Value};
use crate::strategy::Move;
use crate::validator::HISTORY_PARAM;

/// How the opponent history is passed to a strategy function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// History is bound to the parameter at `position`; every other parameter takes its default.
    History {
        /// Index of the history parameter.
        position: usize,
    },
    /// The function takes no parameters; history is accepted and dropped.
    NoHistory,
}

/// Something a strategy did that had to be corrected during a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncidentKind {
    /// The returned value was not a move and `Cooperate` was played instead.
    Substituted {
        /// Representation of what the strategy returned.
        returned: String,
    },
    /// The strategy failed while deciding and `Cooperate` was played instead.
    RuntimeError {
        /// Interpreter error message, with line number.
        message: String,
    },
}

/// An [`IncidentKind`] attributed to a strategy and a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Incident {
    /// Strategy at fault.
    pub strategy: String,
    /// Round number, starting at 1.
    pub round: u32,
    /// What happened.
    #[serde(flatten)]
    pub kind: IncidentKind,
}

/// One normalized decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Move actually played.
    pub choice: Move,
    /// Set when `choice` is a substitute for what the strategy produced.
    pub incident: Option<IncidentKind>,
}

/// A strategy function bound to its calling convention.
#[derive(Debug)]
pub struct AdaptedStrategy {
    id: String,
    function: FunctionDef,
    shape: CallShape,
    step_budget: u64,
}

impl AdaptedStrategy {
    /// Binds `function` to the history contract.
    ///
    /// With several parameters, history goes to `moves` (or the first parameter when none has
    /// that name) and all the others need a default value. The error names the first parameter
    /// that cannot be filled.
    pub(crate) fn new(
        id: String,
        function: FunctionDef,
        step_budget: u64,
    ) -> Result<Self, String> {
        let shape = call_shape(&function)?;
        Ok(Self {
            id,
            function,
            shape,
            step_budget,
        })
    }

    /// Strategy identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Calling convention chosen at load time.
    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Runs the strategy on the opponent's `history` and normalizes its answer.
    pub fn decide<R: Rng>(&self, history: &[Move], rng: &mut R) -> Decision {
        let args = match self.shape {
            CallShape::NoHistory => vec![],
            CallShape::History { position } => {
                let mut args = vec![None; position + 1];
                args[position] = Some(history_value(history));
                args
            }
        };

        let round = history.len() + 1;
        let mut interpreter = Interpreter::new(rng, self.step_budget);
        match interpreter.call_with(&self.function, args) {
            Ok(value) => match normalize(&value) {
                Some(choice) => Decision {
                    choice,
                    incident: None,
                },
                None => {
                    let returned = value.repr();
                    warn!(strategy = %self.id, round, %returned, "not a move, playing Cooperate");
                    Decision {
                        choice: Move::Cooperate,
                        incident: Some(IncidentKind::Substituted { returned }),
                    }
                }
            },
            Err(err) => {
                warn!(strategy = %self.id, round, error = %err, "decision failed, playing Cooperate");
                Decision {
                    choice: Move::Cooperate,
                    incident: Some(IncidentKind::RuntimeError {
                        message: err.to_string(),
                    }),
                }
            }
        }
    }
}

fn call_shape(function: &FunctionDef) -> Result<CallShape, String> {
    let params = &function.params;
    if params.is_empty() {
        return Ok(CallShape::NoHistory);
    }
    let position = params
        .iter()
        .position(|p| p.name == HISTORY_PARAM)
        .unwrap_or(0);
    let unfilled = params
        .iter()
        .enumerate()
        .find(|(i, p)| *i != position && p.default.is_none());
    if let Some((_, param)) = unfilled {
        return Err(format!(
            "parameter '{}' of function '{}' has no default value; only the move history is supplied",
            param.name, function.name
        ));
    }
    Ok(CallShape::History { position })
}

fn history_value(history: &[Move]) -> Value {
    Value::List(
        history
            .iter()
            .map(|mv| Value::Str(mv.as_str().to_string()))
            .collect(),
    )
}

/// `None` when the value is not a recognised move.
fn normalize(value: &Value) -> Option<Move> {
    match value {
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::script::parse;

    fn adapt(source: &str) -> Result<AdaptedStrategy, String> {
        let module = parse(source).unwrap();
        let def = module.functions().next().unwrap().clone();
        AdaptedStrategy::new("test".to_string(), def, 1_000)
    }

    fn decide(strategy: &AdaptedStrategy, history: &[Move]) -> Decision {
        strategy.decide(history, &mut ChaCha8Rng::seed_from_u64(0))
    }

    #[test]
    fn test_call_shapes() {
        assert_eq!(
            adapt("def f():\n    return 'Defect'\n").unwrap().shape(),
            CallShape::NoHistory
        );
        assert_eq!(
            adapt("def f(moves):\n    return 'Defect'\n").unwrap().shape(),
            CallShape::History { position: 0 }
        );
        assert_eq!(
            adapt("def f(limit=3, moves=[]):\n    return 'Defect'\n")
                .unwrap()
                .shape(),
            CallShape::History { position: 1 }
        );
        let err = adapt("def f(moves, limit):\n    return 'Defect'\n").unwrap_err();
        assert!(err.contains("'limit'"));
    }

    #[test]
    fn test_history_is_passed_to_the_right_parameter() {
        let strategy = adapt(
            "def f(limit=1, moves=[]):\n    if moves.count('Defect') > limit:\n        return 'Defect'\n    return 'Cooperate'\n",
        )
        .unwrap();
        assert_eq!(decide(&strategy, &[Move::Defect]).choice, Move::Cooperate);
        assert_eq!(
            decide(&strategy, &[Move::Defect, Move::Defect]).choice,
            Move::Defect
        );
    }

    #[test]
    fn test_zero_parameter_strategy_ignores_history() {
        let strategy = adapt("def f():\n    return 'defect'\n").unwrap();
        let decision = decide(&strategy, &[Move::Cooperate]);
        assert_eq!(decision.choice, Move::Defect);
        assert_eq!(decision.incident, None);
    }

    #[test]
    fn test_move_defaulting() {
        for source in [
            "def f(moves):\n    return 'Betray'\n",
            "def f(moves):\n    return None\n",
            "def f(moves):\n    return 1\n",
            "def f(moves):\n    pass\n",
        ] {
            let decision = decide(&adapt(source).unwrap(), &[]);
            assert_eq!(decision.choice, Move::Cooperate, "{source}");
            assert!(
                matches!(decision.incident, Some(IncidentKind::Substituted { .. })),
                "{source}"
            );
        }
    }

    #[test]
    fn test_runtime_error_is_contained() {
        let strategy = adapt("def f(moves):\n    return moves[0]\n").unwrap();
        let decision = decide(&strategy, &[]);
        assert_eq!(decision.choice, Move::Cooperate);
        let Some(IncidentKind::RuntimeError { message }) = decision.incident else {
            panic!("expected a runtime error");
        };
        assert!(message.contains("index out of range"));

        assert_eq!(decide(&strategy, &[Move::Defect]).choice, Move::Defect);
    }

    #[test]
    fn test_step_budget_is_enforced() {
        let strategy = adapt("def f(moves):\n    while True:\n        pass\n").unwrap();
        let Some(IncidentKind::RuntimeError { message }) = decide(&strategy, &[]).incident else {
            panic!("expected a runtime error");
        };
        assert!(message.contains("step budget"));
    }
}
