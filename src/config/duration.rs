//! Duration values in the `5s` / `1m30s` / `250ms` notation.
//!
//! Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Every
//! number may carry a decimal fraction and segments may be concatenated.
//! The bare literal `0` is accepted without a unit. Negative values are
//! rejected rather than clamped.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

/// Fraction digits beyond this cannot change a nanosecond count.
const MAX_FRACTION_DIGITS: usize = 18;

/// Reasons a duration string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("negative durations are not allowed")]
    Negative,

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("missing unit after {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {0:?}")]
    UnknownUnit(String),

    #[error("duration is out of range")]
    Overflow,
}

/// Parse a duration such as `5s`, `1.5h` or `2m30s`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.strip_prefix('+').unwrap_or(input);
    if s.starts_with('-') {
        return Err(DurationError::Negative);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(DurationError::Empty);
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        if unit.is_empty() {
            return Err(DurationError::MissingUnit(number.to_owned()));
        }
        let scale = unit_scale(unit)?;
        let nanos = segment_nanos(number, scale)?;

        total = total.checked_add(nanos).ok_or(DurationError::Overflow)?;
        rest = next;
    }

    if total > u128::from(u64::MAX) {
        return Err(DurationError::Overflow);
    }
    Ok(Duration::from_nanos(total as u64))
}

fn unit_scale(unit: &str) -> Result<u128, DurationError> {
    match unit {
        "ns" => Ok(1),
        "us" | "µs" | "μs" => Ok(NANOS_PER_MICRO),
        "ms" => Ok(NANOS_PER_MILLI),
        "s" => Ok(NANOS_PER_SEC),
        "m" => Ok(NANOS_PER_MIN),
        "h" => Ok(NANOS_PER_HOUR),
        other => Err(DurationError::UnknownUnit(other.to_owned())),
    }
}

fn segment_nanos(number: &str, scale: u128) -> Result<u128, DurationError> {
    let invalid = || DurationError::InvalidNumber(number.to_owned());

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut nanos = whole.checked_mul(scale).ok_or(DurationError::Overflow)?;

    if !fraction.is_empty() {
        let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
        let numerator: u128 = digits.parse().map_err(|_| invalid())?;
        let denominator = 10u128.pow(digits.len() as u32);
        nanos = nanos
            .checked_add(numerator * scale / denominator)
            .ok_or(DurationError::Overflow)?;
    }

    Ok(nanos)
}
