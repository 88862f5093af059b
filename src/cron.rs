//! # Recurrence Expressions
//!
//! Parses the small recurrence grammar used by scheduled jobs and computes the
//! next fire time. Named fixed points (`@yearly`, `@monthly`, `@weekly`,
//! `@daily`, `@hourly`) are evaluated in UTC; `@every <duration>` fires at a
//! fixed interval from the reference time.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

/// Errors produced while parsing a recurrence expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("recurrence expression is empty")]
    Empty,
    #[error("unknown recurrence keyword '{0}'")]
    UnknownKeyword(String),
    #[error("'every' requires a duration, e.g. 'every 1h30m'")]
    MissingDuration,
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },
}

/// A parsed recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Jan 1, 00:00
    Yearly,
    /// 1st of the month, 00:00
    Monthly,
    /// Sunday, 00:00
    Weekly,
    /// 00:00
    Daily,
    /// Top of the hour
    Hourly,
    /// Fixed interval from the reference time
    Every(Duration),
}

impl Recurrence {
    /// Parse an expression such as `@daily`, `weekly` or `@every 90s`.
    pub fn parse(expression: &str) -> Result<Self, RecurrenceError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(RecurrenceError::Empty);
        }

        let body = trimmed.strip_prefix('@').unwrap_or(trimmed);
        let (keyword, rest) = match body.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (body, ""),
        };
        let keyword = keyword.to_ascii_lowercase();

        let fixed = match keyword.as_str() {
            "yearly" | "annually" => Some(Recurrence::Yearly),
            "monthly" => Some(Recurrence::Monthly),
            "weekly" => Some(Recurrence::Weekly),
            "daily" => Some(Recurrence::Daily),
            "hourly" => Some(Recurrence::Hourly),
            "every" => None,
            _ => return Err(RecurrenceError::UnknownKeyword(keyword)),
        };

        match fixed {
            Some(recurrence) if rest.is_empty() => Ok(recurrence),
            Some(_) => Err(RecurrenceError::UnknownKeyword(body.to_string())),
            None if rest.is_empty() => Err(RecurrenceError::MissingDuration),
            None => parse_duration(rest).map(Recurrence::Every),
        }
    }

    /// Next fire time strictly after `reference`.
    pub fn next_after(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Recurrence::Every(interval) => {
                let step = ChronoDuration::from_std(*interval).unwrap_or(ChronoDuration::MAX);
                reference
                    .checked_add_signed(step)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            Recurrence::Hourly => {
                let top = reference
                    .with_minute(0)
                    .and_then(|dt| dt.with_second(0))
                    .and_then(|dt| dt.with_nanosecond(0))
                    .unwrap_or(reference);
                top + ChronoDuration::hours(1)
            }
            Recurrence::Daily => midnight(reference.date_naive() + Days::new(1)),
            Recurrence::Weekly => {
                let offset = 7 - u64::from(reference.weekday().num_days_from_sunday());
                midnight(reference.date_naive() + Days::new(offset))
            }
            Recurrence::Monthly => {
                let (year, month) = if reference.month() == 12 {
                    (reference.year() + 1, 1)
                } else {
                    (reference.year(), reference.month() + 1)
                };
                first_of_month(year, month)
            }
            Recurrence::Yearly => first_of_month(reference.year() + 1, 1),
        }
    }
}

impl FromStr for Recurrence {
    type Err = RecurrenceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Recurrence::parse(value)
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Yearly => f.write_str("@yearly"),
            Recurrence::Monthly => f.write_str("@monthly"),
            Recurrence::Weekly => f.write_str("@weekly"),
            Recurrence::Daily => f.write_str("@daily"),
            Recurrence::Hourly => f.write_str("@hourly"),
            Recurrence::Every(interval) => write!(f, "@every {}", format_duration(*interval)),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn first_of_month(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(midnight)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

const NANOS_PER_UNIT: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1_000.0),
    ("µs", 1_000.0),
    ("ms", 1_000_000.0),
    ("s", 1_000_000_000.0),
    ("m", 60.0 * 1_000_000_000.0),
    ("h", 3_600.0 * 1_000_000_000.0),
    ("d", 86_400.0 * 1_000_000_000.0),
];

/// Parse a compound duration such as `1h30m`, `1.5h` or `250ms`.
pub fn parse_duration(value: &str) -> Result<Duration, RecurrenceError> {
    let invalid = |reason: &str| RecurrenceError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let input: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if input.is_empty() {
        return Err(invalid("empty duration"));
    }
    if input.starts_with('-') {
        return Err(invalid("duration must be positive"));
    }

    let mut total_nanos = 0f64;
    let mut rest = input.as_str();

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number before the unit"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(invalid("missing unit (ns, us, ms, s, m, h, d)"));
        }
        let unit = &rest[..unit_len];
        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid(&format!("unknown unit '{}'", unit)))?;
        rest = &rest[unit_len..];

        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid("duration is too large"));
    }
    let nanos = total_nanos.round() as u64;
    if nanos == 0 {
        return Err(invalid("duration must be greater than zero"));
    }

    Ok(Duration::from_nanos(nanos))
}

fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos % 1_000_000_000 != 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{}ns", nanos)
        };
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, size) in [("d", 86_400u64), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}
