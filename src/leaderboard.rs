//! Final ranking of a tournament.

use std::fmt;

use serde::Serialize;

/// A strategy and its accumulated score.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// Strategy identifier.
    pub strategy: String,
    /// Sum of the strategy's scores over all its matches.
    pub total: i64,
}

/// Strategies ordered by total score, highest first.
///
/// Equal totals keep the order in which the strategies were first seen, so the same input
/// always produces the same ranking.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Ranks `totals`, given in first-seen order.
    pub fn from_totals(totals: impl IntoIterator<Item = (String, i64)>) -> Self {
        let mut entries: Vec<_> = totals
            .into_iter()
            .map(|(strategy, total)| LeaderboardEntry { strategy, total })
            .collect();
        // sort_by is stable
        entries.sort_by(|a, b| b.total.cmp(&a.total));
        Self { entries }
    }

    /// Entries from first to last place.
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    /// Iterates from first to last place.
    pub fn iter(&self) -> std::slice::Iter<'_, LeaderboardEntry> {
        self.entries.iter()
    }

    /// 1-based position of `strategy`.
    pub fn rank_of(&self, strategy: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.strategy == strategy)
            .map(|i| i + 1)
    }

    /// Total score of `strategy`.
    pub fn total_of(&self, strategy: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.strategy == strategy)
            .map(|e| e.total)
    }

    /// First place, if any strategy was ranked.
    pub fn winner(&self) -> Option<&LeaderboardEntry> {
        self.entries.first()
    }

    /// Number of ranked strategies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing was ranked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Leaderboard {
    type Item = &'a LeaderboardEntry;
    type IntoIter = std::slice::Iter<'a, LeaderboardEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for Leaderboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .entries
            .iter()
            .map(|e| e.strategy.chars().count())
            .max()
            .unwrap_or(0)
            .max("strategy".len());
        writeln!(f, "{:>4}  {:<width$}  {:>8}", "rank", "strategy", "total")?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(
                f,
                "{:>4}  {:<width$}  {:>8}",
                i + 1,
                entry.strategy,
                entry.total
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn board(totals: &[(&str, i64)]) -> Leaderboard {
        Leaderboard::from_totals(totals.iter().map(|(s, t)| (s.to_string(), *t)))
    }

    #[test]
    fn test_ranking_and_lookup() {
        let board = board(&[("tft", 20), ("defect", 32), ("coop", 18)]);
        let order: Vec<_> = board.iter().map(|e| e.strategy.as_str()).collect();
        assert_eq!(order, vec!["defect", "tft", "coop"]);
        assert_eq!(board.rank_of("coop"), Some(3));
        assert_eq!(board.total_of("tft"), Some(20));
        assert_eq!(board.rank_of("missing"), None);
        assert_eq!(board.winner().map(|e| e.total), Some(32));
    }

    #[test]
    fn test_ties_keep_input_order() {
        let board = board(&[("b", 5), ("a", 5), ("c", 7), ("d", 5)]);
        let order: Vec<_> = board.iter().map(|e| e.strategy.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn test_display() {
        let board = board(&[("always_defect", 10), ("tft", 12)]);
        let text = board.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("rank") && lines[0].contains("total"));
        assert!(lines[1].trim_start().starts_with("1  tft"));
        assert!(lines[2].ends_with("10"));
    }

    proptest! {
        #[test]
        fn ranking_is_sorted_and_stable(totals in proptest::collection::vec(0i64..20, 0..30)) {
            let named: Vec<_> = totals
                .iter()
                .enumerate()
                .map(|(i, t)| (format!("s{i:02}"), *t))
                .collect();
            let board = Leaderboard::from_totals(named.clone());
            prop_assert_eq!(board.len(), named.len());
            for pair in board.entries().windows(2) {
                prop_assert!(pair[0].total >= pair[1].total);
                if pair[0].total == pair[1].total {
                    // first-seen order: zero-padded names sort like their input index
                    prop_assert!(pair[0].strategy < pair[1].strategy);
                }
            }
        }
    }
}
