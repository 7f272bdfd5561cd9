use ipd_tournament::evaluator::TournamentReport;
use ipd_tournament::prelude::*;
use ipd_tournament::tournament_scheduler::PairKey;
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};

const STRATEGIES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/strategies");

const ACCEPTED: [&str; 6] = [
    "always_cooperate",
    "always_defect",
    "grudges::grudger",
    "grudges::soft_grudger",
    "random_defector",
    "tit_for_tat",
];

struct IncidentFilter;
impl<S> Filter<S> for IncidentFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::WARN
    }
}

#[allow(dead_code)]
fn init_debug_logger() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);

    let reg = Registry::default().with(fmt::layer().event_format(format).with_filter(IncidentFilter));

    let _ = tracing::subscriber::set_global_default(reg);
}

fn config() -> Configuration {
    Configuration::new()
        .with_verbose(false)
        .with_rounds(10)
        .with_seed(42)
        .with_workers(4)
}

fn evaluate(config: Configuration) -> TournamentReport {
    let evaluator = Evaluator::new(config).unwrap();
    evaluator.evaluate(&DirectorySource::new(STRATEGIES)).unwrap()
}

fn score(report: &TournamentReport, a: &str, b: &str) -> (u32, u32) {
    let result = report
        .matches
        .iter()
        .find(|m| PairKey::new(&m.strategy_a, &m.strategy_b) == PairKey::new(a, b))
        .unwrap();
    (result.score_of(a).unwrap(), result.score_of(b).unwrap())
}

#[test]
fn launch_directory_tournament() {
    let report = evaluate(config());

    let mut ranked: Vec<_> = report.leaderboard.iter().map(|e| e.strategy.as_str()).collect();
    ranked.sort_unstable();
    assert_eq!(ranked, ACCEPTED);

    // every unordered pair exactly once
    let n = ACCEPTED.len();
    assert_eq!(report.matches.len(), n * (n - 1) / 2);
    assert!(report.failures.is_empty());
    for (i, a) in ACCEPTED.iter().enumerate() {
        for b in &ACCEPTED[i + 1..] {
            let played = report
                .matches
                .iter()
                .filter(|m| PairKey::new(&m.strategy_a, &m.strategy_b) == PairKey::new(a, b))
                .count();
            assert_eq!(played, 1, "{a} vs {b}");
        }
    }

    for m in &report.matches {
        assert_eq!(m.rounds, 10);
        assert_eq!(m.moves_a.len(), 10);
        assert_eq!(m.moves_b.len(), 10);
    }
}

#[test]
fn test_known_scores() {
    let report = evaluate(config());

    assert_eq!(score(&report, "always_defect", "always_cooperate"), (50, 0));
    assert_eq!(score(&report, "always_defect", "tit_for_tat"), (14, 9));
    assert_eq!(score(&report, "tit_for_tat", "always_cooperate"), (30, 30));
    assert_eq!(score(&report, "always_defect", "grudges::soft_grudger"), (22, 7));
    assert_eq!(score(&report, "grudges::grudger", "tit_for_tat"), (30, 30));
}

#[test]
fn test_totals_are_the_sum_of_match_scores() {
    let report = evaluate(config());

    for entry in &report.leaderboard {
        let expected: i64 = report
            .matches
            .iter()
            .filter_map(|m| m.score_of(&entry.strategy))
            .map(i64::from)
            .sum();
        assert_eq!(entry.total, expected, "{}", entry.strategy);
    }

    let leaderboard_sum: i64 = report.leaderboard.iter().map(|e| e.total).sum();
    let match_sum: i64 = report
        .matches
        .iter()
        .map(|m| i64::from(m.score_a) + i64::from(m.score_b))
        .sum();
    assert_eq!(leaderboard_sum, match_sum);

    let totals: Vec<_> = report.leaderboard.iter().map(|e| e.total).collect();
    assert!(totals.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn test_same_seed_same_report_whatever_the_worker_count() {
    let reference = evaluate(config().with_workers(1));
    for workers in [2, 3, 8] {
        assert_eq!(evaluate(config().with_workers(workers)), reference, "{workers} workers");
    }
    assert_eq!(evaluate(config()), reference);
}

#[test]
fn test_seed_changes_random_strategies_only() {
    let a = evaluate(config().with_seed(1).with_rounds(200));
    let b = evaluate(config().with_seed(2).with_rounds(200));

    let moves_of = |report: &TournamentReport, opponent: &str| {
        let m = report
            .matches
            .iter()
            .find(|m| {
                PairKey::new(&m.strategy_a, &m.strategy_b)
                    == PairKey::new("random_defector", opponent)
            })
            .unwrap();
        if m.strategy_a == "random_defector" {
            m.moves_a.clone()
        } else {
            m.moves_b.clone()
        }
    };
    assert_ne!(
        moves_of(&a, "always_cooperate"),
        moves_of(&b, "always_cooperate")
    );
    assert_eq!(
        score(&a, "always_defect", "tit_for_tat"),
        score(&b, "always_defect", "tit_for_tat")
    );
}

#[test]
fn test_rejections_are_reported_with_reasons() {
    let report = evaluate(config());

    let rejected: Vec<_> = report.rejected.iter().map(|r| r.strategy.as_str()).collect();
    assert_eq!(
        rejected,
        vec!["broken_syntax", "file_reader", "mirror", "no_history"]
    );

    let reasons_of = |id: &str| {
        report
            .rejected
            .iter()
            .find(|r| r.strategy == id)
            .unwrap()
            .reasons
            .join("; ")
    };
    assert!(reasons_of("broken_syntax").starts_with("syntax error"));
    assert!(reasons_of("file_reader").contains("import of 'os'"));
    assert!(reasons_of("mirror").contains("only literal return values"));
    assert!(reasons_of("no_history").contains("'moves'"));

    for id in rejected {
        assert_eq!(report.leaderboard.total_of(id), None);
        assert!(report.matches.iter().all(|m| m.score_of(id).is_none()));
    }
}

#[test]
fn test_relaxed_policies_admit_more_strategies() {
    let report = evaluate(
        config()
            .with_literal_returns(false)
            .with_require_history_param(false),
    );

    assert_eq!(report.leaderboard.len(), ACCEPTED.len() + 2);
    assert!(report.leaderboard.total_of("mirror").is_some());
    assert!(report.leaderboard.total_of("no_history").is_some());
    // mirror is tit for tat written with a computed return
    assert_eq!(score(&report, "mirror", "always_defect"), (9, 14));
}

#[test]
fn test_publish_to_json_file() {
    init_debug_logger();

    let evaluator = Evaluator::new(config()).unwrap();
    let report = evaluator
        .evaluate(&DirectorySource::new(STRATEGIES))
        .unwrap();

    let path = std::env::temp_dir().join(format!("ipd_results_{}.json", std::process::id()));
    let mut sink = JsonFileSink::new(&path);
    assert!(evaluator.publish(&report, &mut sink).is_empty());

    let written: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(written.len(), ACCEPTED.len() + report.rejected.len());
    let winner = report.leaderboard.winner().unwrap();
    assert_eq!(written[0]["strategy"], winner.strategy.as_str());
    assert_eq!(written[0]["score"], winner.total);
    let broken = written
        .iter()
        .find(|record| record["strategy"] == "broken_syntax")
        .unwrap();
    assert!(broken["error"].as_str().unwrap().starts_with("syntax error"));
}

#[test]
fn test_missing_directory_is_an_error() {
    let evaluator = Evaluator::new(config()).unwrap();
    let err = evaluator
        .evaluate(&DirectorySource::new("tests/no_such_directory"))
        .unwrap_err();
    assert!(format!("{err:#}").contains("not a valid directory"));
}
