//! Core evaluation logic for running Prisoner's Dilemma tournaments.
//!
//! This module defines the [`Evaluator`] type, which orchestrates a whole run:
//!
//! - Collecting strategy sources from a [`StrategySource`]
//! - Validating them and binding accepted functions to the decision contract
//! - Playing a full round robin on a pool of worker threads
//! - Producing a [`TournamentReport`] and publishing it to a [`ResultSink`]
//!
//! # Behavior & Configuration
//!
//! Behavior is controlled by a [`Configuration`] object. When `verbose` is set, validation and
//! match progress are printed to stdout as they happen. When `log` is set, every `tracing` event
//! is written to a timestamped file in the working directory.
//!
//! # Example
//!
//! ```no_run
//! use ipd_tournament::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env().with_rounds(200);
//!     let evaluator = Evaluator::new(config)?;
//!
//!     let report = evaluator.evaluate(&DirectorySource::new("strategies"))?;
//!     print!("{}", report.leaderboard);
//!
//!     let mut sink = JsonFileSink::new("results.json");
//!     for err in evaluator.publish(&report, &mut sink) {
//!         eprintln!("{err}");
//!     }
//!     Ok(())
//! }
//! ```

use std::io::Write;

use anyhow::Context;
use serde::Serialize;
use tracing::{error, info, instrument, trace, warn};

use crate::configuration::Configuration;
use crate::leaderboard::Leaderboard;
use crate::logger::init_logger;
use crate::match_engine::MatchResult;
use crate::result_sink::{ResultSink, SinkError, StrategyOutcome};
use crate::strategy_collector::{validate_and_load, StrategySource};
use crate::tournament_scheduler::{MatchFailure, MatchReport, TournamentScheduler};

/// A strategy that was turned away before the tournament.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Strategy identifier.
    pub strategy: String,
    /// Every reason found.
    pub reasons: Vec<String>,
}

/// Complete result of one evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TournamentReport {
    /// Rounds played in every match.
    pub rounds: u32,
    /// Run seed.
    pub seed: u64,
    /// Final ranking of the accepted strategies.
    pub leaderboard: Leaderboard,
    /// One result per pair, ordered by pair.
    pub matches: Vec<MatchResult>,
    /// Matches that could not be completed.
    pub failures: Vec<MatchFailure>,
    /// Strategies that never played.
    pub rejected: Vec<Rejection>,
}

impl TournamentReport {
    /// Outcome of every strategy: leaderboard entries first, then rejections.
    pub fn outcomes(&self) -> Vec<(String, StrategyOutcome)> {
        self.leaderboard
            .iter()
            .map(|entry| (entry.strategy.clone(), StrategyOutcome::Score(entry.total)))
            .chain(self.rejected.iter().map(|rejection| {
                (
                    rejection.strategy.clone(),
                    StrategyOutcome::Error(rejection.reasons.join("; ")),
                )
            }))
            .collect()
    }

    /// Total number of incidents recorded against `strategy` over the whole tournament.
    pub fn incidents_of(&self, strategy: &str) -> usize {
        self.matches
            .iter()
            .flat_map(|m| &m.incidents)
            .filter(|incident| incident.strategy == strategy)
            .count()
    }
}

/// The main type for running a strategy tournament.
pub struct Evaluator {
    config: Configuration,
}

impl Evaluator {
    /// Create an [`Evaluator`], installing the file logger if the configuration asks for one.
    ///
    /// # Errors
    /// Returns an error if the log file or the global subscriber cannot be set up.
    #[instrument(skip_all)]
    pub fn new(config: Configuration) -> anyhow::Result<Evaluator> {
        if config.log {
            init_logger().context("could not initialise the file logger")?;
        }

        trace!(?config);

        Ok(Evaluator { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Loads every strategy from `source` and plays a round robin between the accepted ones.
    ///
    /// Rejected strategies are listed in the report and never executed.
    ///
    /// # Errors
    /// Returns an error if the sources cannot be read or if a scheduling invariant is broken.
    pub fn evaluate(&self, source: &dyn StrategySource) -> anyhow::Result<TournamentReport> {
        let config = self.config;
        let verbose = config.verbose;

        // 1. read, validate and adapt
        let loaded = validate_and_load(source, &config).context("could not load strategies")?;
        info!(
            accepted = loaded.accepted.len(),
            rejected = loaded.rejected.len()
        );

        // 2. schedule every pair
        let scheduler = TournamentScheduler::new(&loaded.accepted, config.rounds)?
            .with_seed(config.seed)
            .with_workers(config.workers);
        let total = scheduler.match_count();

        if verbose {
            println!(
                "Playing {total} matches of {} rounds on {} workers...",
                config.rounds,
                config.workers.min(total.max(1))
            );
            disable_line_wrap();
        }

        // 3. main loop
        let mut done = 0;
        let outcome = scheduler.run_with(|report| {
            done += 1;
            if verbose {
                print_match_report(report, done, total);
            }
        });

        if verbose {
            enable_line_wrap();
        }
        let outcome = outcome.context("tournament aborted")?;

        if verbose {
            println!();
            print!("{}", outcome.leaderboard);
        }

        Ok(TournamentReport {
            rounds: config.rounds,
            seed: config.seed,
            leaderboard: outcome.leaderboard,
            matches: outcome.matches,
            failures: outcome.failures,
            rejected: loaded
                .rejected
                .iter()
                .map(|strategy| Rejection {
                    strategy: strategy.id().to_string(),
                    reasons: strategy.status().reasons().to_vec(),
                })
                .collect(),
        })
    }

    /// Sends every strategy's outcome to `sink`, then flushes it.
    ///
    /// Sink failures are collected and returned; they never change `report`.
    #[instrument(skip_all)]
    pub fn publish(&self, report: &TournamentReport, sink: &mut dyn ResultSink) -> Vec<SinkError> {
        let mut errors = vec![];
        for (strategy, outcome) in report.outcomes() {
            if let Err(err) = sink.record(&strategy, outcome) {
                warn!(%strategy, %err, "could not record outcome");
                errors.push(err);
            }
        }
        if let Err(err) = sink.flush() {
            error!(%err, "could not flush results");
            errors.push(err);
        }
        errors
    }
}

fn print_match_report(report: &MatchReport, done: usize, total: usize) {
    let (pair, result) = report;
    // clear line, green match, results, red errors, start of line
    match result {
        Ok(result) => {
            let incidents = if result.incidents.is_empty() {
                String::new()
            } else {
                format!("{} incident(s)", result.incidents.len())
            };
            println!(
                "\x1b[2K\x1b[32m{pair}: \x1b[39m{}-{} \x1b[31m{incidents}\x1b[39m\x1b[0G",
                result.score_a, result.score_b
            );
        }
        Err(message) => {
            println!("\x1b[2K\x1b[32m{pair}: \x1b[31mfailed: {message}\x1b[39m\x1b[0G");
        }
    }
    // clear, green, default, start of line
    print!("\x1b[2K\x1b[32mRunning...:\x1b[39m {done}/{total}\x1b[0G");
    let _ = std::io::stdout().flush();
}

fn disable_line_wrap() {
    print!("\x1b[?7l");
}

fn enable_line_wrap() {
    print!("\x1b[?7h");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_sink::MemorySink;
    use crate::strategy_collector::MemorySource;

    fn evaluator() -> Evaluator {
        Evaluator::new(Configuration::new().with_verbose(false).with_rounds(3)).unwrap()
    }

    fn source() -> MemorySource {
        MemorySource::default()
            .with("coop", "def f(moves):\n    return 'Cooperate'\n")
            .with("defect", "def f(moves):\n    return 'Defect'\n")
            .with("lazy", "def f():\n    return 'Defect'\n")
    }

    #[test]
    fn test_evaluate() {
        let report = evaluator().evaluate(&source()).unwrap();
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.leaderboard.total_of("defect"), Some(15));
        assert_eq!(report.leaderboard.total_of("coop"), Some(0));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].strategy, "lazy");
        assert!(report.rejected[0].reasons[0].contains("'moves'"));
        assert_eq!(report.incidents_of("coop"), 0);
    }

    #[test]
    fn test_outcomes_cover_every_strategy() {
        let report = evaluator().evaluate(&source()).unwrap();
        let outcomes = report.outcomes();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], ("defect".to_string(), StrategyOutcome::Score(15)));
        assert!(matches!(&outcomes[2], (id, StrategyOutcome::Error(_)) if id == "lazy"));
    }

    #[test]
    fn test_publish_collects_sink_errors() {
        let evaluator = evaluator();
        let report = evaluator.evaluate(&source()).unwrap();

        let mut sink = MemorySink::new();
        assert!(evaluator.publish(&report, &mut sink).is_empty());
        assert_eq!(sink.get("coop"), Some(&StrategyOutcome::Score(0)));

        let mut strict = MemorySink::strict().with_record("coop").with_record("defect");
        let errors = evaluator.publish(&report, &mut strict);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], SinkError::NoMatchingRecord(id) if id == "lazy"));
        assert_eq!(strict.get("defect"), Some(&StrategyOutcome::Score(15)));
        // the report is untouched by sink failures
        assert_eq!(report.leaderboard.total_of("defect"), Some(15));
    }
}
