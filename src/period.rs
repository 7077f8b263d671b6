//! Fixed-width calendar periods.
//!
//! A year is split into consecutive blocks of `step_months` months starting
//! in January. Only divisors of 12 are accepted, so the blocks of one year
//! are contiguous, never overlap and cover 1 January to 31 December.

use crate::error::{CitevoError, Result};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::FusedIterator;

/// Step widths (in months) that evenly divide a year
pub const VALID_STEPS: [u32; 6] = [1, 2, 3, 4, 6, 12];

/// A closed date range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    /// Create a period, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CitevoError::Validation(format!(
                "Period start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The block of `step_months` months beginning on `start`
    fn block(start: NaiveDate, step_months: u32) -> Result<Self> {
        let end = start
            .checked_add_months(Months::new(step_months))
            .and_then(|next| next.pred_opt())
            .ok_or_else(|| CitevoError::Config(format!("Date out of range: {}", start)))?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Inclusive on both ends
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Column label used in the aggregate table, e.g. `2024-07_2024-08`
    pub fn label(&self) -> String {
        format!("{}_{}", self.start.format("%Y-%m"), self.end.format("%Y-%m"))
    }

    /// Boundaries as `YYYY-MM-DD` strings for query construction
    pub fn query_bounds(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%d").to_string(),
            self.end.format("%Y-%m-%d").to_string(),
        )
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Reject step widths that do not evenly divide 12
pub fn validate_step(step_months: u32) -> Result<()> {
    if VALID_STEPS.contains(&step_months) {
        Ok(())
    } else {
        Err(CitevoError::Config(format!(
            "Step of {} months does not evenly divide a year (expected one of {:?})",
            step_months, VALID_STEPS
        )))
    }
}

/// Partition `year` into `12 / step_months` consecutive periods.
pub fn periods_for_year(year: i32, step_months: u32) -> Result<Vec<Period>> {
    validate_step(step_months)?;

    (0..12 / step_months)
        .map(|i| {
            let start = NaiveDate::from_ymd_opt(year, i * step_months + 1, 1)
                .ok_or_else(|| CitevoError::Config(format!("Invalid year: {}", year)))?;
            Period::block(start, step_months)
        })
        .collect()
}

/// The period of `date`'s year whose range contains `date`.
pub fn period_containing(date: NaiveDate, step_months: u32) -> Result<Period> {
    periods_for_year(date.year(), step_months)?
        .into_iter()
        .find(|p| p.contains(date))
        .ok_or(CitevoError::NoPeriod(date))
}

/// Enumerate periods from the one containing `latest` back to the one
/// containing `earliest`, both inclusive, most recent first.
///
/// Fails before yielding anything if the step is invalid or `latest`
/// precedes `earliest`.
pub fn enumerate_periods(
    latest: NaiveDate,
    earliest: NaiveDate,
    step_months: u32,
) -> Result<PeriodIter> {
    if latest < earliest {
        return Err(CitevoError::Config(format!(
            "End date {} is before start date {}",
            latest, earliest
        )));
    }

    let first = period_containing(latest, step_months)?;
    let floor = period_containing(earliest, step_months)?.start();

    Ok(PeriodIter {
        next: Some(first),
        floor,
        step_months,
    })
}

/// Lazy, descending sequence of periods produced by [`enumerate_periods`]
#[derive(Debug, Clone)]
pub struct PeriodIter {
    next: Option<Period>,
    floor: NaiveDate,
    step_months: u32,
}

impl Iterator for PeriodIter {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let current = self.next.take()?;
        if current.start > self.floor {
            // Step back from the block start so month-end boundaries never drift
            self.next = current
                .start
                .checked_sub_months(Months::new(self.step_months))
                .and_then(|start| Period::block(start, self.step_months).ok());
        }
        Some(current)
    }
}

impl FusedIterator for PeriodIter {}

/// Parse `YYYY-MM-DD`, or `YYYY-MM` meaning the first day of that month
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", input), "%Y-%m-%d"))
        .map_err(|_| {
            CitevoError::Config(format!(
                "Invalid date '{}': expected YYYY-MM-DD or YYYY-MM",
                input
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn months_between(earlier: NaiveDate, later: NaiveDate) -> i32 {
        (later.year() - earlier.year()) * 12 + later.month() as i32 - earlier.month() as i32
    }

    #[test]
    fn test_periods_for_year_cover_year() {
        for year in [1999, 2020, 2023, 2024] {
            for step in VALID_STEPS {
                let periods = periods_for_year(year, step).unwrap();
                assert_eq!(periods.len() as u32, 12 / step);
                assert_eq!(periods[0].start(), date(year, 1, 1));
                assert_eq!(periods[periods.len() - 1].end(), date(year, 12, 31));

                for p in &periods {
                    assert_eq!(months_between(p.start(), p.end()) as u32 + 1, step);
                    assert_eq!(p.start().day(), 1);
                    assert_eq!(p.end().succ_opt().unwrap().day(), 1);
                }
                for pair in periods.windows(2) {
                    assert_eq!(pair[0].end().succ_opt().unwrap(), pair[1].start());
                }
            }
        }
    }

    #[test]
    fn test_leap_february() {
        let periods = periods_for_year(2024, 1).unwrap();
        assert_eq!(periods[1].end(), date(2024, 2, 29));
        let periods = periods_for_year(2023, 2).unwrap();
        assert_eq!(periods[0].end(), date(2023, 2, 28));
    }

    #[test]
    fn test_invalid_step_is_config_error() {
        for step in [0, 5, 7, 8, 24] {
            assert!(matches!(
                periods_for_year(2024, step),
                Err(CitevoError::Config(_))
            ));
        }
    }

    #[test]
    fn test_period_containing() {
        let d = date(2024, 8, 15);
        let p = period_containing(d, 2).unwrap();
        assert_eq!(p.start(), date(2024, 7, 1));
        assert_eq!(p.end(), date(2024, 8, 31));

        let p = period_containing(date(2024, 12, 31), 3).unwrap();
        assert_eq!(p.start(), date(2024, 10, 1));

        let p = period_containing(date(2024, 1, 1), 12).unwrap();
        assert_eq!(p.end(), date(2024, 12, 31));
    }

    #[test]
    fn test_period_containing_is_unique() {
        let mut d = date(2023, 1, 1);
        while d <= date(2024, 12, 31) {
            for step in VALID_STEPS {
                let matching = periods_for_year(d.year(), step)
                    .unwrap()
                    .into_iter()
                    .filter(|p| p.contains(d))
                    .count();
                assert_eq!(matching, 1);
                assert!(period_containing(d, step).unwrap().contains(d));
            }
            d = d.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_enumerate_descending_and_length() {
        let latest = date(2024, 8, 15);
        let earliest = date(2020, 4, 1);
        for step in VALID_STEPS {
            let periods: Vec<Period> = enumerate_periods(latest, earliest, step).unwrap().collect();
            let first = period_containing(latest, step).unwrap();
            let floor = period_containing(earliest, step).unwrap();

            assert_eq!(periods[0], first);
            assert_eq!(*periods.last().unwrap(), floor);
            for pair in periods.windows(2) {
                assert!(pair[0].start() > pair[1].start());
                assert_eq!(pair[1].end().succ_opt().unwrap(), pair[0].start());
            }
            let expected = months_between(floor.start(), first.start()) as usize / step as usize + 1;
            assert_eq!(periods.len(), expected);
        }
    }

    #[test]
    fn test_enumerate_single_when_equal() {
        let d = date(2024, 5, 20);
        let periods: Vec<Period> = enumerate_periods(d, d, 2).unwrap().collect();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].label(), "2024-05_2024-06");
    }

    #[test]
    fn test_enumerate_month_ends_do_not_drift() {
        let periods: Vec<Period> =
            enumerate_periods(date(2024, 3, 10), date(2023, 10, 1), 1).unwrap().collect();
        let ends: Vec<NaiveDate> = periods.iter().map(|p| p.end()).collect();
        assert_eq!(
            ends,
            vec![
                date(2024, 3, 31),
                date(2024, 2, 29),
                date(2024, 1, 31),
                date(2023, 12, 31),
                date(2023, 11, 30),
                date(2023, 10, 31),
            ]
        );
    }

    #[test]
    fn test_enumerate_rejects_reversed_range() {
        assert!(enumerate_periods(date(2020, 1, 1), date(2024, 1, 1), 2).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2020-04-01").unwrap(), date(2020, 4, 1));
        assert_eq!(parse_date("2020-04").unwrap(), date(2020, 4, 1));
        assert!(matches!(parse_date("2020-13"), Err(CitevoError::Config(_))));
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_label_and_bounds() {
        let p = period_containing(date(2024, 2, 3), 3).unwrap();
        assert_eq!(p.label(), "2024-01_2024-03");
        assert_eq!(
            p.query_bounds(),
            ("2024-01-01".to_string(), "2024-03-31".to_string())
        );
        assert!(Period::new(date(2024, 2, 1), date(2024, 1, 1)).is_err());
    }
}
