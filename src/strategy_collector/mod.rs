//! Loading strategies from a source and sorting them into accepted and rejected.

use std::{collections::HashSet, io::Write, sync::Arc};

use tracing::{error, info, instrument, warn};

use crate::{
    adapter::AdaptedStrategy, configuration::Configuration, strategy::Strategy,
    validator::StrategyValidator,
};

mod sources;

pub use sources::{DirectorySource, MemorySource, StrategySource};

/// Strategies of one run, split by validation outcome. Both lists keep source order.
#[derive(Debug, Clone, Default)]
pub struct LoadedStrategies {
    /// Strategies that will play.
    pub accepted: Vec<Strategy>,
    /// Strategies that were turned away, with their reasons.
    pub rejected: Vec<Strategy>,
}

/// Reads every source text, validates it and binds each accepted function to the call contract.
///
/// A source with one function yields a strategy named after the source. A source with several
/// yields one strategy per function, named `source::function`. A later strategy whose id is
/// already taken is rejected.
#[instrument(skip_all)]
pub fn validate_and_load(
    source: &dyn StrategySource,
    config: &Configuration,
) -> anyhow::Result<LoadedStrategies> {
    const RED: &str = "\x1b[31m";
    const GREEN: &str = "\x1b[32m";
    const RESET: &str = "\x1b[0m";

    let verbose = config.verbose;
    let validator = StrategyValidator::new(config);
    let texts = source.sources()?;
    info!(sources = texts.len());

    if verbose {
        println!("Collecting strategies...");
    }
    let longest_name = texts.iter().fold(0, |acu, (id, _)| acu.max(id.len())) + 3; // at least 3 dots

    let mut loaded = LoadedStrategies::default();
    let mut ids = HashSet::new();

    for (source_id, text) in texts {
        if verbose {
            print!("Validating {source_id:·<longest_name$} ");
            let _ = std::io::stdout().flush(); // try to flush stdout
        }

        let text: Arc<str> = Arc::from(text);
        let report = validator.inspect(&text);
        let single = report.functions.len() <= 1;
        let mut failures = vec![];

        let candidates: Vec<_> = if report.functions.is_empty() {
            vec![(source_id.clone(), None, vec![])]
        } else {
            report
                .functions
                .into_iter()
                .map(|(def, reasons)| {
                    let id = if single {
                        source_id.clone()
                    } else {
                        format!("{source_id}::{}", def.name)
                    };
                    (id, Some(def), reasons)
                })
                .collect()
        };

        for (id, def, own_reasons) in candidates {
            let mut reasons = report.source_reasons.clone();
            reasons.extend(own_reasons);
            if !ids.insert(id.clone()) {
                reasons.push(format!("duplicate strategy id '{id}'"));
            }

            let strategy = match def {
                Some(def) if reasons.is_empty() => {
                    match AdaptedStrategy::new(id.clone(), def, config.step_budget) {
                        Ok(adapted) => Some(Strategy::accepted(id.clone(), text.clone(), adapted)),
                        Err(reason) => {
                            reasons.push(reason);
                            None
                        }
                    }
                }
                _ => None,
            };

            match strategy {
                Some(strategy) => {
                    info!(strategy = %id, "accepted");
                    loaded.accepted.push(strategy);
                }
                None => {
                    warn!(strategy = %id, ?reasons, "rejected");
                    failures.push((id.clone(), reasons.join("; ")));
                    loaded
                        .rejected
                        .push(Strategy::rejected(id, text.clone(), reasons));
                }
            }
        }

        if verbose {
            if failures.is_empty() {
                println!("{GREEN}Ok{RESET}");
            } else {
                for (id, reasons) in &failures {
                    println!("{RED}{id}: {reasons}{RESET}");
                }
            }
        }
    }

    if loaded.accepted.len() < 2 {
        error!(
            accepted = loaded.accepted.len(),
            "fewer than two strategies accepted, no match can be played"
        );
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ValidationStatus;

    fn config() -> Configuration {
        Configuration::new().with_verbose(false)
    }

    fn load(source: MemorySource) -> LoadedStrategies {
        validate_and_load(&source, &config()).unwrap()
    }

    fn ids(strategies: &[Strategy]) -> Vec<&str> {
        strategies.iter().map(Strategy::id).collect()
    }

    #[test]
    fn test_single_function_takes_source_id() {
        let loaded = load(MemorySource::default().with("defector", "def anything(moves):\n    return 'Defect'\n"));
        assert_eq!(ids(&loaded.accepted), vec!["defector"]);
        assert!(loaded.accepted[0].is_accepted());
        assert!(loaded.accepted[0].source().contains("def anything"));
    }

    #[test]
    fn test_each_function_becomes_a_strategy() {
        let loaded = load(MemorySource::default().with(
            "pack",
            "def nice(moves):\n    return 'Cooperate'\n\ndef nasty(moves):\n    return 'Defect'\n\ndef broken():\n    return 'Defect'\n",
        ));
        assert_eq!(ids(&loaded.accepted), vec!["pack::nice", "pack::nasty"]);
        assert_eq!(ids(&loaded.rejected), vec!["pack::broken"]);
        assert!(loaded.rejected[0].status().reasons()[0].contains("'moves'"));
    }

    #[test]
    fn test_source_level_problems_reject_every_function() {
        let loaded = load(MemorySource::default().with(
            "sneaky",
            "import os\n\ndef a(moves):\n    return 'Defect'\n\ndef b(moves):\n    return 'Defect'\n",
        ));
        assert!(loaded.accepted.is_empty());
        assert_eq!(loaded.rejected.len(), 2);
        for strategy in &loaded.rejected {
            assert!(strategy.status().reasons()[0].contains("import of 'os'"));
        }
    }

    #[test]
    fn test_unparsable_source_is_rejected_under_its_own_id() {
        let loaded = load(MemorySource::default().with("broken", "def f(moves)\n"));
        assert_eq!(ids(&loaded.rejected), vec!["broken"]);
        let ValidationStatus::Rejected(reasons) = loaded.rejected[0].status() else {
            panic!("expected a rejection");
        };
        assert!(reasons[0].starts_with("syntax error"));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let body = "def f(moves):\n    return 'Defect'\n";
        let loaded = load(MemorySource::default().with("twin", body).with("twin", body));
        assert_eq!(ids(&loaded.accepted), vec!["twin"]);
        assert_eq!(loaded.rejected.len(), 1);
        assert!(loaded.rejected[0].status().reasons()[0].contains("duplicate strategy id"));
    }

    #[test]
    fn test_unfillable_parameters_are_rejected_at_load() {
        let loaded = load(
            MemorySource::default().with("greedy", "def f(moves, depth):\n    return 'Defect'\n"),
        );
        assert!(loaded.accepted.is_empty());
        assert!(loaded.rejected[0].status().reasons()[0].contains("'depth'"));
    }

    #[test]
    fn test_oversized_expression_is_rejected_not_fatal() {
        let huge = format!("def f(moves):\n    x = 1{}\n    return 'Defect'\n", "+1".repeat(1_000_000));
        let loaded = load(
            MemorySource::default()
                .with("huge", huge)
                .with("fine", "def f(moves):\n    return 'Cooperate'\n"),
        );
        assert_eq!(ids(&loaded.accepted), vec!["fine"]);
        assert_eq!(ids(&loaded.rejected), vec!["huge"]);
        assert!(loaded.rejected[0].status().reasons()[0].starts_with("syntax error"));
    }
}
