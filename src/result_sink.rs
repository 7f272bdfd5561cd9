//! Durable storage of final results.
//!
//! The evaluator hands each strategy's outcome to a [`ResultSink`] once the leaderboard is final.
//! Sink errors are reported back to the caller and never change the computed results.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, instrument};

/// What is stored for one strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyOutcome {
    /// Total tournament score.
    Score(i64),
    /// Why the strategy could not take part.
    Error(String),
}

/// Failure reported by a [`ResultSink`].
#[derive(Debug)]
pub enum SinkError {
    /// The sink has no record for this strategy.
    NoMatchingRecord(String),
    /// The underlying storage failed.
    Io(std::io::Error),
    /// Results could not be encoded.
    Encoding(serde_json::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::NoMatchingRecord(id) => write!(f, "no matching record to update for '{id}'"),
            SinkError::Io(err) => write!(f, "storage error: {err}"),
            SinkError::Encoding(err) => write!(f, "encoding error: {err}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::NoMatchingRecord(_) => None,
            SinkError::Io(err) => Some(err),
            SinkError::Encoding(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Encoding(err)
    }
}

/// Destination for final per-strategy outcomes.
pub trait ResultSink {
    /// Stores the outcome of strategy `id`.
    fn record(&mut self, id: &str, outcome: StrategyOutcome) -> Result<(), SinkError>;

    /// Makes every recorded outcome durable.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps outcomes in memory.
///
/// A strict sink only updates records registered up front with [`MemorySink::with_record`] and
/// answers anything else with [`SinkError::NoMatchingRecord`].
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: BTreeMap<String, Option<StrategyOutcome>>,
    strict: bool,
}

impl MemorySink {
    /// Sink accepting any id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink accepting only registered ids.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Registers an empty record for `id`.
    pub fn with_record(mut self, id: impl Into<String>) -> Self {
        self.records.insert(id.into(), None);
        self
    }

    /// Outcome stored for `id`.
    pub fn get(&self, id: &str) -> Option<&StrategyOutcome> {
        self.records.get(id).and_then(Option::as_ref)
    }

    /// Number of records holding an outcome.
    pub fn len(&self) -> usize {
        self.records.values().filter(|r| r.is_some()).count()
    }

    /// `true` if no outcome was stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn record(&mut self, id: &str, outcome: StrategyOutcome) -> Result<(), SinkError> {
        match self.records.get_mut(id) {
            Some(slot) => *slot = Some(outcome),
            None if self.strict => return Err(SinkError::NoMatchingRecord(id.to_string())),
            None => {
                self.records.insert(id.to_string(), Some(outcome));
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    strategy: &'a str,
    #[serde(flatten)]
    outcome: &'a StrategyOutcome,
}

/// Writes all outcomes as a JSON array when flushed.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    records: Vec<(String, StrategyOutcome)>,
}

impl JsonFileSink {
    /// Sink writing to `path`. Nothing is written before [`flush`](ResultSink::flush).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: vec![],
        }
    }
}

impl ResultSink for JsonFileSink {
    fn record(&mut self, id: &str, outcome: StrategyOutcome) -> Result<(), SinkError> {
        match self.records.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, slot)) => *slot = outcome,
            None => self.records.push((id.to_string(), outcome)),
        }
        Ok(())
    }

    #[instrument(skip(self), fields(path = ?self.path))]
    fn flush(&mut self) -> Result<(), SinkError> {
        let records: Vec<_> = self
            .records
            .iter()
            .map(|(strategy, outcome)| JsonRecord { strategy, outcome })
            .collect();
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!(records = records.len(), "results written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        sink.record("tft", StrategyOutcome::Score(30)).unwrap();
        sink.record("tft", StrategyOutcome::Score(31)).unwrap();
        assert_eq!(sink.get("tft"), Some(&StrategyOutcome::Score(31)));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_strict_memory_sink_reports_missing_record() {
        let mut sink = MemorySink::strict().with_record("tft");
        assert!(sink.is_empty());
        sink.record("tft", StrategyOutcome::Score(1)).unwrap();
        let err = sink
            .record("ghost", StrategyOutcome::Error("rejected".into()))
            .unwrap_err();
        assert!(matches!(&err, SinkError::NoMatchingRecord(id) if id == "ghost"));
        assert_eq!(err.to_string(), "no matching record to update for 'ghost'");
        assert_eq!(sink.get("ghost"), None);
    }

    #[test]
    fn test_json_file_sink() {
        let path = std::env::temp_dir().join(format!("ipd_sink_{}.json", std::process::id()));
        let mut sink = JsonFileSink::new(&path);
        sink.record("tft", StrategyOutcome::Score(30)).unwrap();
        sink.record("broken", StrategyOutcome::Error("syntax error".into()))
            .unwrap();
        sink.flush().unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!([
                {"strategy": "tft", "score": 30},
                {"strategy": "broken", "error": "syntax error"},
            ])
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_json_file_sink_reports_io_errors() {
        let mut sink = JsonFileSink::new("/definitely/not/here/results.json");
        sink.record("tft", StrategyOutcome::Score(1)).unwrap();
        assert!(matches!(sink.flush(), Err(SinkError::Io(_))));
    }
}
