//! Market breadth: share of an index's constituents trading above their own
//! moving average, per date.

use super::rolling::rolling_mean;
use crate::data::provider::DataError;
use crate::data::schema::CLOSE;
use crate::data::series::SeriesTable;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Breadth on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreadthRow {
    pub date: NaiveDate,
    /// Constituents with a row on this date.
    pub total: usize,
    /// Percent (0..=100) above the moving average, keyed by window.
    pub pct_above: BTreeMap<usize, f64>,
}

impl BreadthRow {
    pub fn pct_above(&self, window: usize) -> Option<f64> {
        self.pct_above.get(&window).copied()
    }
}

#[derive(Default)]
struct Tally {
    total: usize,
    above: BTreeMap<usize, usize>,
}

/// Compute breadth for a constituent table.
///
/// A constituent whose moving average has not filled yet counts toward the
/// total but not toward "above".
pub fn market_breadth(
    table: &SeriesTable,
    windows: &[usize],
) -> Result<Vec<BreadthRow>, DataError> {
    if !table.dataset().is_multi_entity() {
        return Err(DataError::Validation(format!(
            "market breadth needs a constituent table, got {}",
            table.dataset()
        )));
    }

    let mut per_member: BTreeMap<&str, (Vec<NaiveDate>, Vec<f64>)> = BTreeMap::new();
    for row in table.rows() {
        let Some(member) = row.constituent.as_deref() else {
            continue;
        };
        let entry = per_member.entry(member).or_default();
        entry.0.push(row.date);
        entry.1.push(row.get(CLOSE).unwrap_or(f64::NAN));
    }

    let mut tallies: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    for (dates, closes) in per_member.values() {
        for &date in dates {
            tallies.entry(date).or_default().total += 1;
        }
        for &window in windows {
            let ma = rolling_mean(closes, window);
            for (i, &date) in dates.iter().enumerate() {
                let tally = tallies.entry(date).or_default();
                let above = tally.above.entry(window).or_insert(0);
                if closes[i] > ma[i] {
                    *above += 1;
                }
            }
        }
    }

    Ok(tallies
        .into_iter()
        .map(|(date, tally)| BreadthRow {
            date,
            total: tally.total,
            pct_above: tally
                .above
                .into_iter()
                .map(|(w, n)| (w, 100.0 * n as f64 / tally.total as f64))
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::DatasetKind;
    use crate::data::series::SeriesRow;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn row(day: u32, member: &str, close: f64) -> SeriesRow {
        SeriesRow::new(d(day))
            .with_constituent(member)
            .with_value(CLOSE, close)
    }

    #[test]
    fn half_above_two_day_average() {
        let table = SeriesTable::from_rows(
            DatasetKind::IndexConstituents,
            vec![
                row(1, "600000", 10.0),
                row(1, "600001", 10.0),
                row(2, "600000", 11.0),
                row(2, "600001", 9.0),
            ],
        );
        let rows = market_breadth(&table, &[2]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].total, 2);
        assert_eq!(rows[0].pct_above(2), Some(0.0));
        assert_eq!(rows[1].pct_above(2), Some(50.0));
    }

    #[test]
    fn unfilled_average_counts_as_not_above() {
        let table = SeriesTable::from_rows(
            DatasetKind::IndexConstituents,
            vec![row(1, "600000", 10.0), row(2, "600000", 12.0)],
        );
        let rows = market_breadth(&table, &[1, 5]).unwrap();
        assert_eq!(rows[1].pct_above(5), Some(0.0));
        // window 1: the close equals its own mean, never strictly above
        assert_eq!(rows[1].pct_above(1), Some(0.0));
    }

    #[test]
    fn late_joiner_changes_denominator() {
        let table = SeriesTable::from_rows(
            DatasetKind::IndexConstituents,
            vec![
                row(1, "600000", 10.0),
                row(2, "600000", 11.0),
                row(2, "000001", 5.0),
                row(3, "600000", 12.0),
                row(3, "000001", 4.0),
            ],
        );
        let rows = market_breadth(&table, &[2]).unwrap();
        assert_eq!(rows[0].total, 1);
        assert_eq!(rows[1].total, 2);
        assert_eq!(rows[1].pct_above(2), Some(50.0));
        assert_eq!(rows[2].pct_above(2), Some(50.0));
    }

    #[test]
    fn rejects_single_entity_table() {
        let table = SeriesTable::empty(DatasetKind::IndexDaily);
        assert!(market_breadth(&table, &[20]).is_err());
    }

    #[test]
    fn empty_constituent_table_gives_no_rows() {
        let table = SeriesTable::empty(DatasetKind::IndexConstituents);
        assert!(market_breadth(&table, &[20]).unwrap().is_empty());
    }
}
