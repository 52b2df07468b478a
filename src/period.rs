//! Reporting period (competência) handling.

use crate::error::{ExportError, Result};
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// The billing month a batch reports on, written as `YYYYMM` in every format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportingPeriod {
    year: i32,
    month: u32,
}

impl ReportingPeriod {
    /// Creates a period, rejecting months outside 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
            return Err(ExportError::InvalidPeriod(format!("{year:04}{month:02}")));
        }
        Ok(ReportingPeriod { year, month })
    }

    /// The period containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        ReportingPeriod {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First calendar day of the period.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl FromStr for ReportingPeriod {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ExportError::InvalidPeriod(trimmed.to_string()));
        }
        let year = trimmed[..4]
            .parse()
            .map_err(|_| ExportError::InvalidPeriod(trimmed.to_string()))?;
        let month = trimmed[4..]
            .parse()
            .map_err(|_| ExportError::InvalidPeriod(trimmed.to_string()))?;
        ReportingPeriod::new(year, month)
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let period: ReportingPeriod = "202403".parse().unwrap();
        assert_eq!(period.year(), 2024);
        assert_eq!(period.month(), 3);
        assert_eq!(period.to_string(), "202403");
        assert_eq!(
            period.first_day(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_month() {
        assert!("202413".parse::<ReportingPeriod>().is_err());
        assert!("202400".parse::<ReportingPeriod>().is_err());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        assert!("2024-03".parse::<ReportingPeriod>().is_err());
        assert!("20243".parse::<ReportingPeriod>().is_err());
    }

    #[test]
    fn test_containing() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 17).unwrap();
        assert_eq!(ReportingPeriod::containing(date).to_string(), "202311");
    }
}
