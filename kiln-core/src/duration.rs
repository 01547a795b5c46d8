//! Duration wire format
//!
//! Polling intervals travel as unit-suffixed strings such as `"500ms"`,
//! `"10s"` or `"1h30m"`. Use as `#[serde(with = "kiln_core::duration")]`;
//! deserialization also accepts a plain integer number of seconds.

use serde::{Deserializer, Serializer, de};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("duration is empty")]
    Empty,

    #[error("missing number before unit in {0:?}")]
    MissingNumber(String),

    #[error("missing unit after number in {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} is too large")]
    Overflow(String),
}

const UNITS: [(&str, u64); 4] = [("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)];

/// Parses a duration string made of `<number><unit>` segments
///
/// Supported units are `h`, `m`, `s` and `ms`. Segments add up, so
/// `"1m30s"` is ninety seconds.
pub fn parse(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    let mut total_ms: u64 = 0;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(DurationError::MissingNumber(input.to_string()));
        }
        let (number, tail) = rest.split_at(digits);

        let unit_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let (unit, tail) = tail.split_at(unit_len);

        let factor = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, factor)| *factor)
            .ok_or_else(|| DurationError::UnknownUnit {
                unit: unit.to_string(),
                input: input.to_string(),
            })?;

        let value: u64 = number
            .parse()
            .map_err(|_| DurationError::Overflow(input.to_string()))?;

        total_ms = value
            .checked_mul(factor)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(|| DurationError::Overflow(input.to_string()))?;

        rest = tail;
    }

    Ok(Duration::from_millis(total_ms))
}

/// Formats a duration with the largest units first, e.g. `"1h30m"`
///
/// Sub-millisecond precision is dropped. A zero duration formats as `"0s"`.
pub fn format(duration: Duration) -> String {
    let mut remaining = duration.as_millis();
    if remaining == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, factor) in UNITS {
        let factor = u128::from(factor);
        let count = remaining / factor;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(unit);
            remaining -= count * factor;
        }
    }
    out
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string like \"1m30s\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        parse(value).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
        u64::try_from(value)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration cannot be negative"))
    }
}
