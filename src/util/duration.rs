//! Compact interval strings for `agg`: `500ms`, `30s`, `5m`, `1h`, and
//! sequences of them such as `1m30s`.
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while parsing an interval string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration {0:?}: empty")]
    Empty(String),

    /// A unit appeared without a number before it (e.g. `ms`).
    #[error("invalid duration {0:?}: expected a number")]
    MissingNumber(String),

    /// A number appeared without a unit after it (e.g. `30`).
    #[error("invalid duration {0:?}: missing unit (use ms, s, m or h)")]
    MissingUnit(String),

    #[error("invalid duration {input:?}: unknown unit {unit:?} (use ms, s, m or h)")]
    UnknownUnit { input: String, unit: String },

    /// A polling loop cannot tick every zero milliseconds.
    #[error("invalid duration {0:?}: must be greater than zero")]
    Zero(String),

    #[error("invalid duration {0:?}: too large")]
    Overflow(String),
}

/// Parses an interval made of one or more `<integer><unit>` groups where
/// unit is one of `ms`, `s`, `m`, `h`.
///
/// # Errors
///
/// Returns [`DurationError`] for empty input, a dangling number or unit,
/// an unknown unit, a zero total, or a total that overflows.
///
/// # Examples
///
/// ```
/// use gator::util::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
/// assert!(parse_duration("90x").is_err());
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty(input.to_string()));
    }

    let overflow = || DurationError::Overflow(input.to_string());
    let mut total_ms: u64 = 0;
    let mut rest = s;

    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(DurationError::MissingNumber(input.to_string()));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| overflow())?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        if unit_len == 0 {
            if rest.is_empty() {
                return Err(DurationError::MissingUnit(input.to_string()));
            }
            return Err(DurationError::UnknownUnit {
                input: input.to_string(),
                unit: rest.chars().take(1).collect(),
            });
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale: u64 = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            other => {
                return Err(DurationError::UnknownUnit {
                    input: input.to_string(),
                    unit: other.to_string(),
                })
            }
        };

        let part = value.checked_mul(scale).ok_or_else(overflow)?;
        total_ms = total_ms.checked_add(part).ok_or_else(overflow)?;
    }

    if total_ms == 0 {
        return Err(DurationError::Zero(input.to_string()));
    }
    Ok(Duration::from_millis(total_ms))
}

/// Formats a duration in the normalized form echoed by `agg`: hours,
/// minutes, seconds and milliseconds, omitting zero components
/// (`1h2m3s`, `1m30s`, `1s500ms`). Sub-millisecond precision is dropped.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;

    let mut out = String::new();
    for (value, unit) in [(hours, "h"), (minutes, "m"), (seconds, "s"), (millis, "ms")] {
        if value > 0 {
            out.push_str(&value.to_string());
            out.push_str(unit);
        }
    }
    out
}
