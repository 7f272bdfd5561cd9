use anyhow::bail;
use ipd_tournament::prelude::*;

const USAGE: &str = "usage: ipd-tournament <strategy-dir> [results.json]";

/// Runs a tournament over every `.py` file of a directory.
///
/// Settings come from the `IPD_*` environment variables. When a second path is given, the
/// outcome of every strategy is also written there as JSON.
fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(dir) = args.next() else {
        bail!(USAGE);
    };
    let output = args.next();
    if args.next().is_some() {
        bail!(USAGE);
    }

    let evaluator = Evaluator::new(Configuration::from_env())?;
    let report = evaluator.evaluate(&DirectorySource::new(&dir))?;

    if !evaluator.config().verbose() {
        print!("{}", report.leaderboard);
    }
    if !report.rejected.is_empty() {
        println!("Rejected strategies:");
        for rejection in &report.rejected {
            println!("{}: {}", rejection.strategy, rejection.reasons.join("; "));
        }
    }
    for failure in &report.failures {
        eprintln!("{} failed: {}", failure.pair, failure.message);
    }

    if let Some(path) = output {
        let mut sink = JsonFileSink::new(&path);
        for err in evaluator.publish(&report, &mut sink) {
            eprintln!("{err}");
        }
    }
    Ok(())
}
