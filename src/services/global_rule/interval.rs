//! Evaluation cadence and cooldown of global rules.

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_INTERVAL_MINUTES: i64 = 5;

/// One week
pub const MAX_INTERVAL_MINUTES: i64 = 7 * 24 * 60;

/// Minutes between evaluations for an interval such as `5m`, `1h`, `30s`,
/// `15` or `every_2_hours`. Anything unreadable or longer than a week falls
/// back to five minutes.
pub fn parse_interval_minutes(interval: &str) -> i64 {
    if interval.trim().is_empty() {
        return DEFAULT_INTERVAL_MINUTES;
    }
    parse_minutes(interval).unwrap_or_else(|| {
        tracing::warn!("Invalid evaluation interval '{}', using {} minutes", interval, DEFAULT_INTERVAL_MINUTES);
        DEFAULT_INTERVAL_MINUTES
    })
}

/// Strict form of [`parse_interval_minutes`]: `None` instead of the fallback
pub fn parse_minutes(interval: &str) -> Option<i64> {
    let interval = interval.trim().to_ascii_lowercase();
    if interval.is_empty() {
        return None;
    }
    let minutes = match interval.strip_prefix("every_") {
        Some(rest) => parse_every(rest),
        None => parse_suffixed(&interval),
    }?;
    (minutes <= MAX_INTERVAL_MINUTES).then_some(minutes)
}

fn parse_every(rest: &str) -> Option<i64> {
    let mut parts = rest.splitn(2, '_');
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if amount < 0 {
        return None;
    }

    if unit.starts_with("minute") {
        Some(amount)
    } else if unit.starts_with("hour") {
        amount.checked_mul(60)
    } else if unit.starts_with("second") {
        Some((amount / 60).max(1))
    } else {
        None
    }
}

fn parse_suffixed(interval: &str) -> Option<i64> {
    let (digits, scale): (&str, fn(i64) -> Option<i64>) = match interval.as_bytes().last()? {
        b'm' => (&interval[..interval.len() - 1], Some),
        b'h' => (&interval[..interval.len() - 1], |n| n.checked_mul(60)),
        b's' => (&interval[..interval.len() - 1], |n| Some((n / 60).max(1))),
        _ => (interval, Some),
    };
    let amount: i64 = digits.parse().ok()?;
    if amount < 0 {
        return None;
    }
    scale(amount)
}

/// A rule is due when it has never run or its interval has elapsed
pub fn is_due(last_evaluated_at: Option<DateTime<Utc>>, interval: &str, now: DateTime<Utc>) -> bool {
    let Some(last) = last_evaluated_at else {
        return true;
    };
    match last.checked_add_signed(Duration::minutes(parse_interval_minutes(interval))) {
        Some(next) => now > next,
        None => true,
    }
}

pub fn in_cooldown(last_triggered_at: Option<DateTime<Utc>>, cooldown_minutes: i32, now: DateTime<Utc>) -> bool {
    let Some(last) = last_triggered_at else {
        return false;
    };
    last.checked_add_signed(Duration::minutes(i64::from(cooldown_minutes)))
        .map_or(true, |until| now < until)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixed_intervals() {
        assert_eq!(parse_interval_minutes("5m"), 5);
        assert_eq!(parse_interval_minutes("2h"), 120);
        assert_eq!(parse_interval_minutes("30s"), 1);
        assert_eq!(parse_interval_minutes("180s"), 3);
        assert_eq!(parse_interval_minutes("15"), 15);
        assert_eq!(parse_interval_minutes(" 10M "), 10);
    }

    #[test]
    fn every_style_intervals() {
        assert_eq!(parse_interval_minutes("every_15_minutes"), 15);
        assert_eq!(parse_interval_minutes("every_1_hour"), 60);
        assert_eq!(parse_interval_minutes("every_2_hours"), 120);
        assert_eq!(parse_interval_minutes("every_30_seconds"), 1);
    }

    #[test]
    fn invalid_intervals_default_to_five() {
        for bad in ["", "   ", "soon", "m", "every_x_minutes", "every_5_days", "-3m", "1.5h"] {
            assert_eq!(parse_interval_minutes(bad), 5, "input {:?}", bad);
        }
    }

    #[test]
    fn due_after_interval_elapses() {
        let now = Utc::now();
        assert!(is_due(None, "5m", now));
        assert!(!is_due(Some(now - Duration::minutes(4)), "5m", now));
        assert!(is_due(Some(now - Duration::minutes(6)), "5m", now));
        assert!(is_due(Some(now - Duration::minutes(61)), "1h", now));
    }

    #[test]
    fn oversized_intervals_fall_back_instead_of_overflowing() {
        assert_eq!(parse_interval_minutes("every_999999999999999999_hours"), 5);
        assert_eq!(parse_interval_minutes("999999999999999999h"), 5);
        assert_eq!(parse_interval_minutes("999999999999999m"), 5);
        assert_eq!(parse_interval_minutes("10081m"), 5);
        assert_eq!(parse_interval_minutes("168h"), MAX_INTERVAL_MINUTES);
        assert_eq!(parse_minutes("every_8_days"), None);
        assert_eq!(parse_minutes("999999999999999m"), None);
    }

    #[test]
    fn huge_interval_is_treated_as_default() {
        let now = Utc::now();
        assert!(!is_due(Some(now), "999999999999999m", now));
        assert!(is_due(Some(now - Duration::minutes(6)), "999999999999999m", now));
    }

    #[test]
    fn cooldown_near_the_end_of_time_does_not_panic() {
        let now = Utc::now();
        assert!(in_cooldown(Some(DateTime::<Utc>::MAX_UTC), i32::MAX, now));
    }

    #[test]
    fn cooldown_window() {
        let now = Utc::now();
        assert!(!in_cooldown(None, 5, now));
        assert!(in_cooldown(Some(now - Duration::minutes(2)), 5, now));
        assert!(!in_cooldown(Some(now - Duration::minutes(5)), 5, now));
    }
}
