//! Config for the tournament evaluator
//!
//! This module provides configuration options for controlling how strategies are validated and
//! how the tournament is played.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive: set the value to `"true"` to enable one.
//! Numeric values that do not parse are ignored with a warning.
//!
//! - `IPD_VERBOSE` — Print progress to stdout (default: `true`)
//! - `IPD_LOG` — Enable logging to a file (default: `false`)
//! - `IPD_WORKERS` — Number of match worker threads (default: number of CPUs)
//! - `IPD_ROUNDS` — Rounds played in every match (default: `10`)
//! - `IPD_SEED` — Seed every strategy's random generator is derived from (default: `0`)
//! - `IPD_STEP_BUDGET` — Interpreter steps allowed for a single decision (default: `10000`)
//! - `IPD_LITERAL_RETURNS` — Require every `return` to yield a literal (default: `true`)
//! - `IPD_REQUIRE_HISTORY_PARAM` — Require a `moves` parameter (default: `true`)

use std::str::FromStr;

use tracing::warn;

/// Configuration for evaluator behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) workers: usize,
    pub(crate) rounds: u32,
    pub(crate) seed: u64,
    pub(crate) step_budget: u64,
    pub(crate) literal_returns: bool,
    pub(crate) require_history_param: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The evaluator will print match progress to stdout.
    /// - Logging to file is disabled.
    /// - One worker thread per CPU plays matches.
    /// - Matches last 10 rounds and the run seed is `0`.
    /// - A single decision may take up to 10 000 interpreter steps.
    /// - Strategies must return literals and take a `moves` parameter.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            workers: num_cpus::get(),
            rounds: 10,
            seed: 0,
            step_budget: 10_000,
            literal_returns: true,
            require_history_param: true,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Any variable that is
    /// unset keeps its default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_number<T: FromStr>(var: &str, default: T) -> T {
            match std::env::var(var) {
                Ok(val) => val.trim().parse().unwrap_or_else(|_| {
                    warn!("ignoring {var}={val:?}: not a valid number");
                    default
                }),
                Err(_) => default,
            }
        }

        let defaults = Self::new();
        Self {
            verbose: get_env_flag("IPD_VERBOSE", defaults.verbose),
            log: get_env_flag("IPD_LOG", defaults.log),
            workers: get_env_number("IPD_WORKERS", defaults.workers).max(1),
            rounds: get_env_number("IPD_ROUNDS", defaults.rounds),
            seed: get_env_number("IPD_SEED", defaults.seed),
            step_budget: get_env_number("IPD_STEP_BUDGET", defaults.step_budget),
            literal_returns: get_env_flag("IPD_LITERAL_RETURNS", defaults.literal_returns),
            require_history_param: get_env_flag(
                "IPD_REQUIRE_HISTORY_PARAM",
                defaults.require_history_param,
            ),
        }
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Set the number of worker threads. Zero is treated as one.
    pub fn with_workers(mut self, value: usize) -> Self {
        self.workers = value.max(1);
        self
    }

    /// Set the number of rounds per match.
    pub fn with_rounds(mut self, value: u32) -> Self {
        self.rounds = value;
        self
    }

    /// Set the run seed.
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = value;
        self
    }

    /// Set the number of interpreter steps a strategy may spend on one decision.
    ///
    /// A decision that runs out of steps counts as a runtime error and falls back to
    /// `Cooperate` for that round.
    pub fn with_step_budget(mut self, value: u64) -> Self {
        self.step_budget = value;
        self
    }

    /// Require every `return` statement to yield a literal value.
    pub fn with_literal_returns(mut self, value: bool) -> Self {
        self.literal_returns = value;
        self
    }

    /// Require the decision function to take the opponent history as `moves`.
    ///
    /// When disabled, functions without parameters are admitted and called with the history
    /// discarded.
    pub fn with_require_history_param(mut self, value: bool) -> Self {
        self.require_history_param = value;
        self
    }

    /// Whether progress is printed to stdout.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Rounds played per match.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Run seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Worker thread count.
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
