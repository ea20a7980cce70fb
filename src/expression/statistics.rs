//! Time-window statistics for synthetic variables.
//!
//! Expression evaluation is synchronous, so every `(variable, window)` pair an
//! expression refers to is fetched up front through a [`StatisticsSource`]
//! and handed to the evaluator as [`SeriesData`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{Expression, ExpressionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl WindowUnit {
    fn seconds(self) -> i64 {
        match self {
            WindowUnit::Seconds => 1,
            WindowUnit::Minutes => 60,
            WindowUnit::Hours => 3_600,
            WindowUnit::Days => 86_400,
        }
    }
}

/// Longest look-back a statistics call may ask for: 365 days
pub const MAX_WINDOW_SECONDS: i64 = 365 * 86_400;

/// A look-back window written as `<n>s`, `<n>m`, `<n>h` or `<n>d`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub amount: i64,
    pub unit: WindowUnit,
}

impl TimeWindow {
    /// Window length in seconds, `None` past [`MAX_WINDOW_SECONDS`]
    pub fn seconds(&self) -> Option<i64> {
        self.amount
            .checked_mul(self.unit.seconds())
            .filter(|secs| (1..=MAX_WINDOW_SECONDS).contains(secs))
    }

    /// Length clamped to [`MAX_WINDOW_SECONDS`]
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds().unwrap_or(MAX_WINDOW_SECONDS))
    }

    pub fn start_time(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, ExpressionError> {
        self.seconds()
            .and_then(|secs| at.checked_sub_signed(Duration::seconds(secs)))
            .ok_or_else(|| ExpressionError::InvalidWindow(self.to_string()))
    }

    /// Whole hours in the window, at least one
    pub fn rate_hours(&self) -> i64 {
        self.duration().num_hours().max(1)
    }
}

impl FromStr for TimeWindow {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        let invalid = || ExpressionError::InvalidWindow(s.trim().to_string());

        let unit = match code.chars().last() {
            Some('s') => WindowUnit::Seconds,
            Some('m') => WindowUnit::Minutes,
            Some('h') => WindowUnit::Hours,
            Some('d') => WindowUnit::Days,
            _ => return Err(invalid()),
        };
        let amount: i64 = code[..code.len() - 1].parse().map_err(|_| invalid())?;
        let window = TimeWindow { amount, unit };
        if window.seconds().is_none() {
            return Err(invalid());
        }
        Ok(window)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let suffix = match self.unit {
            WindowUnit::Seconds => 's',
            WindowUnit::Minutes => 'm',
            WindowUnit::Hours => 'h',
            WindowUnit::Days => 'd',
        };
        write!(f, "{}{}", self.amount, suffix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub variable: String,
    pub window: TimeWindow,
}

pub type SeriesData = HashMap<SeriesKey, Vec<f64>>;

/// Device and instant a statistics call is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct StatisticsContext {
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait StatisticsSource: Send + Sync {
    /// Values of `variable` for the device within `[from, to]`, oldest first
    async fn values(
        &self,
        device_id: Uuid,
        variable: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>, ExpressionError>;
}

/// Load every series the expression needs. Zero readings are dropped.
pub async fn prefetch(
    expression: &Expression,
    source: &dyn StatisticsSource,
    context: &StatisticsContext,
) -> Result<SeriesData, ExpressionError> {
    let mut data = SeriesData::new();
    for key in expression.series_keys() {
        let from = key.window.start_time(context.timestamp)?;
        let to = context.timestamp + Duration::milliseconds(1);
        let values = source
            .values(context.device_id, &key.variable, from, to)
            .await?
            .into_iter()
            .filter(|v| *v != 0.0)
            .collect();
        data.insert(key, values);
    }
    Ok(data)
}

/// Reduce a series with the named statistics function.
pub fn compute(function: &str, values: &[f64], window: &TimeWindow) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let first = values[0];
    let last = values[values.len() - 1];

    match function {
        "avg" | "movingAvg" => values.iter().sum::<f64>() / n,
        "stddev" => {
            if values.len() <= 1 {
                return 0.0;
            }
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            variance.sqrt()
        }
        "sum" => values.iter().sum(),
        "count" => n,
        "minTime" => values.iter().copied().fold(f64::INFINITY, f64::min),
        "maxTime" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "rate" => {
            if values.len() < 2 {
                return 0.0;
            }
            (last - first) / window.rate_hours() as f64
        }
        "percentChange" => {
            if values.len() < 2 || first == 0.0 {
                return 0.0;
            }
            (last - first) / first * 100.0
        }
        "median" => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(code: &str) -> TimeWindow {
        code.parse().unwrap()
    }

    #[test]
    fn parses_window_codes() {
        assert_eq!(window("5m").duration(), Duration::minutes(5));
        assert_eq!(window(" 24H ").duration(), Duration::hours(24));
        assert_eq!(window("7d").duration(), Duration::days(7));
        assert_eq!(window("30s").duration(), Duration::seconds(30));
        assert_eq!(window("15m").to_string(), "15m");
    }

    #[test]
    fn rejects_bad_window_codes() {
        for code in ["", "m", "5", "5w", "-5m", "0h", "abc"] {
            assert!(code.parse::<TimeWindow>().is_err(), "{} should be rejected", code);
        }
    }

    #[test]
    fn start_time_subtracts_window() {
        let now: DateTime<Utc> = "2025-11-11T12:00:00Z".parse().unwrap();
        let expected: DateTime<Utc> = "2025-11-11T11:55:00Z".parse().unwrap();
        assert_eq!(window("5m").start_time(now).unwrap(), expected);
    }

    #[test]
    fn windows_longer_than_a_year_are_rejected() {
        assert_eq!(window("365d").duration(), Duration::days(365));
        for code in ["366d", "100000000d", "9223372036854775807s", "999999999999h"] {
            assert!(
                matches!(code.parse::<TimeWindow>(), Err(ExpressionError::InvalidWindow(_))),
                "{} should be rejected",
                code
            );
        }
    }

    #[test]
    fn oversized_window_fails_without_panicking() {
        let huge = TimeWindow {
            amount: i64::MAX,
            unit: WindowUnit::Days,
        };
        assert!(huge.start_time(Utc::now()).is_err());
        assert_eq!(huge.rate_hours(), 365 * 24);
    }

    #[test]
    fn expression_with_huge_window_does_not_parse() {
        assert!(Expression::parse("avg('v', '100000000d')").is_err());
        assert!(Expression::parse("avg('v', '30d')").is_ok());
    }

    #[test]
    fn empty_series_is_zero() {
        for f in ["avg", "stddev", "sum", "count", "minTime", "maxTime", "rate", "median"] {
            assert_eq!(compute(f, &[], &window("1h")), 0.0);
        }
    }

    #[test]
    fn basic_reductions() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let w = window("1h");
        assert_eq!(compute("avg", &values, &w), 5.0);
        assert_eq!(compute("movingAvg", &values, &w), 5.0);
        assert_eq!(compute("stddev", &values, &w), 2.0);
        assert_eq!(compute("sum", &values, &w), 40.0);
        assert_eq!(compute("count", &values, &w), 8.0);
        assert_eq!(compute("minTime", &values, &w), 2.0);
        assert_eq!(compute("maxTime", &values, &w), 9.0);
        assert_eq!(compute("median", &values, &w), 4.5);
        assert_eq!(compute("median", &[3.0, 1.0, 2.0], &w), 2.0);
    }

    #[test]
    fn stddev_of_single_value_is_zero() {
        assert_eq!(compute("stddev", &[42.0], &window("1h")), 0.0);
    }

    #[test]
    fn rate_is_per_whole_hour() {
        assert_eq!(compute("rate", &[10.0, 30.0], &window("2h")), 10.0);
        assert_eq!(compute("rate", &[10.0, 30.0], &window("15m")), 20.0);
        assert_eq!(compute("rate", &[10.0, 30.0], &window("90m")), 20.0);
        assert_eq!(compute("rate", &[10.0], &window("1h")), 0.0);
    }

    #[test]
    fn percent_change_guards_zero_start() {
        assert_eq!(compute("percentChange", &[50.0, 75.0], &window("1h")), 50.0);
        assert_eq!(compute("percentChange", &[0.0, 75.0], &window("1h")), 0.0);
        assert_eq!(compute("percentChange", &[50.0], &window("1h")), 0.0);
    }
}
