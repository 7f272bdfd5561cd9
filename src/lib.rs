//! # IPD Tournament
//!
//! A Rust crate for running iterated Prisoner's Dilemma tournaments between untrusted,
//! independently written strategy scripts.
//!
//! It provides:
//! - Static validation of strategy sources before anything runs (`StrategyValidator`)
//! - A restricted interpreter for the strategy language, with a step budget per decision
//! - A uniform `decide(history) -> Move` contract whatever signature a strategy declares
//! - A round robin where every pair plays exactly once on a pool of worker threads
//! - A deterministic leaderboard and pluggable result sinks
//!
//! A strategy that crashes, loops forever or answers nonsense plays `Cooperate` for that round.
//! The incident is logged and attributed to it, and neither its opponent nor the rest of the
//! run is affected.
//!
//! # Documentation Overview
//!
//! - For the end-to-end flow, see the [`evaluator`] module.
//! - For configuring rounds, seeding, workers and validation policies, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the validation rules, see [`StrategyValidator`](crate::validator::StrategyValidator).
//! - For where strategies come from and where results go, see [`strategy_collector`] and
//!   [`result_sink`].
//!
//! # Writing a Strategy
//!
//! Strategies are functions written in a small Python-like language. The function receives the
//! opponent's previous moves as a list of `"Cooperate"` / `"Defect"` strings, oldest first, and
//! returns its next move:
//!
//! ```text
//! import random
//!
//! def tit_for_two_tats(moves):
//!     if len(moves) >= 2 and moves[-1] == "Defect" and moves[-2] == "Defect":
//!         return "Defect"
//!     if random.random() < 0.01:
//!         return "Defect"
//!     return "Cooperate"
//! ```
//!
//! ## Strategy Requirements
//!
//! - The function takes a parameter named `moves`
//! - Every `return` yields a literal, and there is at least one
//! - Only `random` may be imported; names like `open` or `print` do not exist
//! - A file with several functions yields one strategy per function, named `file::function`
//!
//! # Usage Example
//!
//! ```no_run
//! use ipd_tournament::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_rounds(100).with_seed(7);
//!     let evaluator = Evaluator::new(config)?;
//!
//!     let report = evaluator.evaluate(&DirectorySource::new("path_to_strategies"))?;
//!     for entry in &report.leaderboard {
//!         println!("{}: {}", entry.strategy, entry.total);
//!     }
//!     for rejection in &report.rejected {
//!         println!("{} rejected: {:?}", rejection.strategy, rejection.reasons);
//!     }
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;
pub mod adapter;
pub mod configuration;
pub mod evaluator;
pub mod leaderboard;
mod logger;
pub mod match_engine;
pub mod result_sink;
mod script;
pub mod strategy;
pub mod strategy_collector;
pub mod tournament_scheduler;
pub mod validator;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use ipd_tournament::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`Evaluator`](crate::evaluator::Evaluator)
/// - the strategy sources and result sinks
/// - [`Move`](crate::strategy::Move) and the [`Leaderboard`](crate::leaderboard::Leaderboard)
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::evaluator::{Evaluator, TournamentReport};
    pub use crate::leaderboard::{Leaderboard, LeaderboardEntry};
    pub use crate::result_sink::{JsonFileSink, MemorySink, ResultSink, StrategyOutcome};
    pub use crate::strategy::{Move, Strategy};
    pub use crate::strategy_collector::{DirectorySource, MemorySource, StrategySource};
}
