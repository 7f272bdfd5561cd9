//! Round-robin scheduling over a bounded pool of worker threads.
//!
//! Every unordered pair of accepted strategies plays exactly one match. Workers pull whole
//! matches from a shared queue and send results back over a channel; the scheduling thread is
//! the only one that touches the running totals.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, instrument, trace};

use crate::adapter::AdaptedStrategy;
use crate::configuration::Configuration;
use crate::leaderboard::Leaderboard;
use crate::match_engine::{play, MatchResult};
use crate::strategy::Strategy;

/// Unordered pair of strategy ids, stored in lexicographic order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    /// Canonical key for `a` and `b`, in either order.
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    /// Lexicographically smaller id. Plays as the first side.
    pub fn first(&self) -> &str {
        &self.first
    }

    /// Lexicographically larger id.
    pub fn second(&self) -> &str {
        &self.second
    }

    /// `true` if `id` is one of the two strategies.
    pub fn contains(&self, id: &str) -> bool {
        self.first == id || self.second == id
    }

    /// Seed of this pair's match, derived from the run seed.
    pub fn seed(&self, run_seed: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        run_seed.hash(&mut hasher);
        self.first.hash(&mut hasher);
        self.second.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.first, self.second)
    }
}

/// A match that could not be completed. Counted against both strategies of the pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchFailure {
    /// The pair whose match failed.
    pub pair: PairKey,
    /// Panic message.
    pub message: String,
}

/// Violation of a scheduling invariant. Fatal to the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregationFailure {
    /// Two strategies share an id.
    DuplicateStrategy(String),
    /// A strategy that did not pass validation was handed to the scheduler.
    NotAccepted(String),
    /// A pair was queued twice.
    DuplicatePair(PairKey),
    /// A result arrived for a pair that was never dispatched or already completed.
    UnexpectedResult(PairKey),
    /// Workers stopped reporting while matches were outstanding.
    WorkerPoolStopped {
        /// Pairs with no result.
        outstanding: Vec<PairKey>,
    },
    /// A worker thread could not be started.
    WorkerSpawn(String),
}

impl fmt::Display for AggregationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationFailure::DuplicateStrategy(id) => {
                write!(f, "strategy id '{id}' appears more than once")
            }
            AggregationFailure::NotAccepted(id) => {
                write!(f, "strategy '{id}' was not accepted and cannot be scheduled")
            }
            AggregationFailure::DuplicatePair(pair) => write!(f, "pair {pair} dispatched twice"),
            AggregationFailure::UnexpectedResult(pair) => {
                write!(f, "unexpected result for pair {pair}")
            }
            AggregationFailure::WorkerPoolStopped { outstanding } => write!(
                f,
                "worker pool stopped with {} match(es) outstanding",
                outstanding.len()
            ),
            AggregationFailure::WorkerSpawn(err) => {
                write!(f, "could not start a match worker: {err}")
            }
        }
    }
}

impl std::error::Error for AggregationFailure {}

/// Everything a completed tournament produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TournamentOutcome {
    /// Final ranking.
    pub leaderboard: Leaderboard,
    /// One result per completed pair, ordered by pair key.
    pub matches: Vec<MatchResult>,
    /// Pairs whose match failed, ordered by pair key.
    pub failures: Vec<MatchFailure>,
}

/// A finished match as reported by a worker: the result, or the panic message on failure.
pub type MatchReport = (PairKey, Result<MatchResult, String>);

/// Plays a full round robin between `accepted` strategies with the default seed and worker
/// count.
pub fn run_tournament(
    accepted: &[Strategy],
    rounds: u32,
) -> Result<TournamentOutcome, AggregationFailure> {
    let config = Configuration::new();
    TournamentScheduler::new(accepted, rounds)?
        .with_seed(config.seed())
        .with_workers(config.workers())
        .run()
}

type MatchFn = fn(&AdaptedStrategy, &AdaptedStrategy, u32, u64) -> MatchResult;

/// State of one tournament run.
pub struct TournamentScheduler<'s> {
    strategies: Vec<(&'s str, &'s AdaptedStrategy)>,
    play: MatchFn,
    rounds: u32,
    seed: u64,
    workers: usize,
    dispatched: BTreeSet<PairKey>,
    completed: HashSet<PairKey>,
    totals: HashMap<&'s str, i64>,
    results: Vec<MatchResult>,
    failures: Vec<MatchFailure>,
}

impl<'s> TournamentScheduler<'s> {
    /// Checks that every strategy is accepted and that ids are unique.
    pub fn new(strategies: &'s [Strategy], rounds: u32) -> Result<Self, AggregationFailure> {
        let mut seen = HashSet::new();
        let mut adapted = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let id = strategy.id();
            if !seen.insert(id) {
                return Err(AggregationFailure::DuplicateStrategy(id.to_string()));
            }
            let Some(decision) = strategy.decision() else {
                return Err(AggregationFailure::NotAccepted(id.to_string()));
            };
            adapted.push((id, decision));
        }

        Ok(Self {
            totals: adapted.iter().map(|(id, _)| (*id, 0)).collect(),
            strategies: adapted,
            play,
            rounds,
            seed: 0,
            workers: 1,
            dispatched: BTreeSet::new(),
            completed: HashSet::new(),
            results: vec![],
            failures: vec![],
        })
    }

    /// Sets the run seed every match seed is derived from.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the worker pool size. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[cfg(test)]
    fn with_match_fn(mut self, play: MatchFn) -> Self {
        self.play = play;
        self
    }

    /// Number of matches a full round robin needs: `n * (n - 1) / 2`.
    pub fn match_count(&self) -> usize {
        let n = self.strategies.len();
        n * n.saturating_sub(1) / 2
    }

    /// Plays every match and ranks the strategies.
    pub fn run(self) -> Result<TournamentOutcome, AggregationFailure> {
        self.run_with(|_| {})
    }

    /// Like [`run`](Self::run), calling `observer` on the scheduling thread as each match
    /// completes.
    #[instrument(skip_all, fields(strategies = self.strategies.len(), rounds = self.rounds))]
    pub fn run_with(
        mut self,
        mut observer: impl FnMut(&MatchReport),
    ) -> Result<TournamentOutcome, AggregationFailure> {
        let jobs = self.dispatch()?;
        let expected = jobs.len();
        let workers = self.workers.min(expected);
        info!(matches = expected, workers, "starting round robin");

        let queue = Mutex::new(jobs);
        let (tx, rx) = mpsc::channel::<MatchReport>();
        let (play, rounds, seed) = (self.play, self.rounds, self.seed);

        thread::scope(|scope| -> Result<(), AggregationFailure> {
            for i in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                thread::Builder::new()
                    .name(format!("match-worker-{i}"))
                    .spawn_scoped(scope, move || worker_loop(queue, tx, play, rounds, seed))
                    .map_err(|e| AggregationFailure::WorkerSpawn(e.to_string()))?;
            }
            drop(tx);

            // the channel closes once every worker has exited
            for report in rx {
                observer(&report);
                self.on_result(report)?;
            }
            Ok(())
        })?;

        let outstanding: Vec<_> = self
            .dispatched
            .iter()
            .filter(|pair| !self.completed.contains(*pair))
            .cloned()
            .collect();
        if !outstanding.is_empty() {
            error!(missing = outstanding.len(), "workers stopped before finishing");
            return Err(AggregationFailure::WorkerPoolStopped { outstanding });
        }

        Ok(self.finish())
    }

    /// Builds the job queue, each unordered pair exactly once.
    fn dispatch(
        &mut self,
    ) -> Result<VecDeque<(PairKey, &'s AdaptedStrategy, &'s AdaptedStrategy)>, AggregationFailure>
    {
        let mut jobs = VecDeque::with_capacity(self.match_count());
        for (i, (id_a, a)) in self.strategies.iter().enumerate() {
            for (id_b, b) in &self.strategies[i + 1..] {
                let pair = PairKey::new(id_a, id_b);
                if !self.dispatched.insert(pair.clone()) {
                    return Err(AggregationFailure::DuplicatePair(pair));
                }
                // the lexicographically smaller id always plays first
                let (first, second) = if pair.first() == *id_a { (*a, *b) } else { (*b, *a) };
                trace!(%pair, "queued");
                jobs.push_back((pair, first, second));
            }
        }
        Ok(jobs)
    }

    fn on_result(&mut self, (pair, result): MatchReport) -> Result<(), AggregationFailure> {
        if !self.dispatched.contains(&pair) || !self.completed.insert(pair.clone()) {
            return Err(AggregationFailure::UnexpectedResult(pair));
        }

        match result {
            Ok(result) => {
                debug!(%pair, score_a = result.score_a, score_b = result.score_b, "match finished");
                for (id, score) in [
                    (result.strategy_a.as_str(), result.score_a),
                    (result.strategy_b.as_str(), result.score_b),
                ] {
                    let Some(total) = self.totals.get_mut(id) else {
                        return Err(AggregationFailure::UnexpectedResult(pair));
                    };
                    *total += i64::from(score);
                }
                self.results.push(result);
            }
            Err(message) => {
                error!(%pair, %message, "match failed");
                self.failures.push(MatchFailure { pair, message });
            }
        }
        Ok(())
    }

    fn finish(mut self) -> TournamentOutcome {
        self.results.sort_by(|a, b| {
            PairKey::new(&a.strategy_a, &a.strategy_b)
                .cmp(&PairKey::new(&b.strategy_a, &b.strategy_b))
        });
        self.failures.sort_by(|a, b| a.pair.cmp(&b.pair));
        let leaderboard = Leaderboard::from_totals(
            self.strategies
                .iter()
                .map(|(id, _)| (id.to_string(), self.totals[id])),
        );
        TournamentOutcome {
            leaderboard,
            matches: self.results,
            failures: self.failures,
        }
    }
}

fn worker_loop(
    queue: &Mutex<VecDeque<(PairKey, &AdaptedStrategy, &AdaptedStrategy)>>,
    tx: mpsc::Sender<MatchReport>,
    play: MatchFn,
    rounds: u32,
    seed: u64,
) {
    loop {
        let job = queue.lock().ok().and_then(|mut jobs| jobs.pop_front());
        let Some((pair, a, b)) = job else {
            break;
        };
        let match_seed = pair.seed(seed);
        let result = panic::catch_unwind(AssertUnwindSafe(|| play(a, b, rounds, match_seed)))
            .map_err(|payload| panic_message(payload.as_ref()));
        if tx.send((pair, result)).is_err() {
            // scheduler gave up on the run
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "match panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;
    use crate::strategy_collector::{validate_and_load, MemorySource};

    fn load(strategies: &[(&str, &str)]) -> Vec<Strategy> {
        let source = MemorySource::new(
            strategies
                .iter()
                .map(|(id, body)| (id.to_string(), body.to_string())),
        );
        let loaded = validate_and_load(&source, &Configuration::new()).unwrap();
        assert!(loaded.rejected.is_empty(), "{:?}", loaded.rejected);
        loaded.accepted
    }

    fn roster() -> Vec<Strategy> {
        load(&[
            ("coop", "def f(moves):\n    return 'Cooperate'\n"),
            ("defect", "def f(moves):\n    return 'Defect'\n"),
            (
                "tft",
                "def f(moves):\n    if len(moves) == 0:\n        return 'Cooperate'\n    if moves[-1] == 'Defect':\n        return 'Defect'\n    return 'Cooperate'\n",
            ),
            (
                "flip",
                "def f(moves):\n    if random.random() < 0.5:\n        return 'Cooperate'\n    return 'Defect'\n",
            ),
        ])
    }

    #[test]
    fn test_pair_key_is_canonical() {
        assert_eq!(PairKey::new("b", "a"), PairKey::new("a", "b"));
        assert_eq!(PairKey::new("b", "a").first(), "a");
        assert!(PairKey::new("a", "b").contains("b"));
        assert_ne!(PairKey::new("ab", "c"), PairKey::new("a", "bc"));
        assert_eq!(PairKey::new("x", "y").seed(3), PairKey::new("y", "x").seed(3));
    }

    #[test]
    fn test_every_pair_plays_once() {
        let strategies = roster();
        let outcome = TournamentScheduler::new(&strategies, 5)
            .unwrap()
            .with_workers(3)
            .run()
            .unwrap();
        assert_eq!(outcome.matches.len(), 6);
        let pairs: HashSet<_> = outcome
            .matches
            .iter()
            .map(|m| PairKey::new(&m.strategy_a, &m.strategy_b))
            .collect();
        assert_eq!(pairs.len(), 6);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_totals_are_conserved() {
        let strategies = roster();
        let outcome = run_tournament(&strategies, 7).unwrap();
        for entry in &outcome.leaderboard {
            let played: Vec<_> = outcome
                .matches
                .iter()
                .filter_map(|m| m.score_of(&entry.strategy))
                .collect();
            assert_eq!(played.len(), strategies.len() - 1);
            assert_eq!(entry.total, played.iter().map(|s| i64::from(*s)).sum::<i64>());
        }
    }

    #[test]
    fn test_worker_count_does_not_change_outcome() {
        let strategies = roster();
        let single = TournamentScheduler::new(&strategies, 20)
            .unwrap()
            .with_seed(11)
            .run()
            .unwrap();
        let pooled = TournamentScheduler::new(&strategies, 20)
            .unwrap()
            .with_seed(11)
            .with_workers(8)
            .run()
            .unwrap();
        assert_eq!(single, pooled);
    }

    #[test]
    fn test_known_scores() {
        let strategies = roster();
        let outcome = TournamentScheduler::new(&strategies[..3], 3)
            .unwrap()
            .run()
            .unwrap();
        // coop: 9 (vs tft) + 0 (vs defect); defect: 15 + 7; tft: 9 + 2
        assert_eq!(outcome.leaderboard.total_of("coop"), Some(9));
        assert_eq!(outcome.leaderboard.total_of("defect"), Some(22));
        assert_eq!(outcome.leaderboard.total_of("tft"), Some(11));
        assert_eq!(outcome.leaderboard.winner().unwrap().strategy, "defect");
    }

    #[test]
    fn test_observer_sees_every_match() {
        let strategies = roster();
        let mut seen = vec![];
        TournamentScheduler::new(&strategies, 2)
            .unwrap()
            .with_workers(2)
            .run_with(|(pair, result)| {
                assert!(result.is_ok());
                seen.push(pair.clone());
            })
            .unwrap();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_invariant_violations() {
        let mut strategies = roster();
        strategies.push(strategies[0].clone());
        assert_eq!(
            TournamentScheduler::new(&strategies, 1).err(),
            Some(AggregationFailure::DuplicateStrategy("coop".to_string()))
        );

        let source = MemorySource::new([("bad".to_string(), "def f(:\n".to_string())]);
        let loaded = validate_and_load(&source, &Configuration::new()).unwrap();
        assert_eq!(
            TournamentScheduler::new(&loaded.rejected, 1).err(),
            Some(AggregationFailure::NotAccepted("bad".to_string()))
        );

        let strategies = roster();
        let mut scheduler = TournamentScheduler::new(&strategies, 1).unwrap();
        let stray = PairKey::new("coop", "defect");
        assert_eq!(
            scheduler.on_result((stray.clone(), Err("boom".to_string()))),
            Err(AggregationFailure::UnexpectedResult(stray.clone()))
        );
        scheduler.dispatch().unwrap();
        assert_eq!(
            scheduler.dispatch().err(),
            Some(AggregationFailure::DuplicatePair(PairKey::new("coop", "defect")))
        );
        assert!(scheduler.on_result((stray.clone(), Err("boom".to_string()))).is_ok());
        assert_eq!(
            scheduler.on_result((stray.clone(), Err("boom".to_string()))),
            Err(AggregationFailure::UnexpectedResult(stray))
        );
    }

    #[test]
    fn test_failed_match_is_recorded_against_the_pair() {
        let strategies = roster();
        let mut scheduler = TournamentScheduler::new(&strategies[..2], 1).unwrap();
        let pair = PairKey::new("coop", "defect");
        scheduler.dispatch().unwrap();
        scheduler
            .on_result((pair.clone(), Err("worker exploded".to_string())))
            .unwrap();
        let outcome = scheduler.finish();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].pair, pair);
        assert_eq!(outcome.leaderboard.total_of("coop"), Some(0));
        assert!(outcome.matches.is_empty());
    }

    fn refuse_defect(a: &AdaptedStrategy, b: &AdaptedStrategy, rounds: u32, seed: u64) -> MatchResult {
        if a.id() == "defect" || b.id() == "defect" {
            panic!("defect refuses to play");
        }
        play(a, b, rounds, seed)
    }

    #[test]
    fn test_panicking_match_does_not_stop_the_run() {
        let strategies = roster();
        let outcome = TournamentScheduler::new(&strategies, 4)
            .unwrap()
            .with_workers(2)
            .with_match_fn(refuse_defect)
            .run()
            .unwrap();

        assert_eq!(outcome.failures.len(), 3);
        for failure in &outcome.failures {
            assert!(failure.pair.contains("defect"));
            assert_eq!(failure.message, "defect refuses to play");
        }
        assert_eq!(outcome.matches.len(), 3);
        assert!(outcome.matches.iter().all(|m| m.score_of("defect").is_none()));
        assert_eq!(outcome.leaderboard.total_of("defect"), Some(0));
        let friendly = outcome
            .matches
            .iter()
            .find(|m| PairKey::new(&m.strategy_a, &m.strategy_b) == PairKey::new("coop", "tft"))
            .unwrap();
        assert_eq!((friendly.score_a, friendly.score_b), (12, 12));
    }

    #[test]
    fn test_fewer_than_two_strategies() {
        let strategies = roster();
        let outcome = run_tournament(&strategies[..1], 10).unwrap();
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.leaderboard.len(), 1);
        assert_eq!(run_tournament(&[], 10).unwrap().leaderboard.len(), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]
        #[test]
        fn every_unordered_pair_is_scheduled_once(n in 0usize..7, workers in 1usize..5) {
            let roster: Vec<_> = (0..n)
                .map(|i| (format!("s{i}"), "def f(moves):\n    return 'Defect'\n"))
                .collect();
            let named: Vec<_> = roster.iter().map(|(id, body)| (id.as_str(), *body)).collect();
            let strategies = load(&named);

            let outcome = TournamentScheduler::new(&strategies, 2)
                .unwrap()
                .with_workers(workers)
                .run()
                .unwrap();
            prop_assert_eq!(outcome.matches.len(), n * n.saturating_sub(1) / 2);
            let pairs: HashSet<_> = outcome
                .matches
                .iter()
                .map(|m| PairKey::new(&m.strategy_a, &m.strategy_b))
                .collect();
            prop_assert_eq!(pairs.len(), outcome.matches.len());
            for entry in &outcome.leaderboard {
                prop_assert_eq!(entry.total, 2 * n.saturating_sub(1) as i64);
            }
            prop_assert!(outcome.failures.is_empty());
        }
    }
}
