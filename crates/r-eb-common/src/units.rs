//! ---
//! eb_section: "01-core-functionality"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Shared primitives and utilities for the engine runtime."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Count and duration literals used in activity parameters.
//!
//! Counts accept decimal suffixes (`K`, `M`, `B`/`G`, `T`, powers of 1000)
//! so that `cycles=2M` and `cycles=0..1.5K` read naturally. Durations accept
//! `ns`, `us`, `ms`, `s`, `m` and `h`; a bare number uses the caller's
//! default unit.

use std::time::Duration;

use crate::error::UnitError;

/// Parse a count literal such as `1000`, `1K`, `2.5M` or `4T`.
pub fn parse_count(spec: &str) -> Result<u64, UnitError> {
    let (number, unit) = split_number(spec)?;
    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1_000,
        "m" => 1_000_000,
        "b" | "g" => 1_000_000_000,
        "t" => 1_000_000_000_000,
        _ => {
            return Err(UnitError::UnknownUnit {
                spec: spec.to_owned(),
                unit: unit.to_owned(),
            })
        }
    };

    if number.contains('.') {
        let base: f64 = number
            .parse()
            .map_err(|_| UnitError::NotANumber(spec.to_owned()))?;
        let value = base * multiplier as f64;
        if !value.is_finite() || value >= u64::MAX as f64 {
            return Err(UnitError::Overflow(spec.to_owned()));
        }
        return Ok(value.round() as u64);
    }

    let base: u64 = number
        .parse()
        .map_err(|_| UnitError::NotANumber(spec.to_owned()))?;
    base.checked_mul(multiplier)
        .ok_or_else(|| UnitError::Overflow(spec.to_owned()))
}

/// Parse a duration literal, interpreting bare numbers in `default_unit`.
pub fn parse_duration(spec: &str, default_unit: Duration) -> Result<Duration, UnitError> {
    let (number, unit) = split_number(spec)?;
    let scale = match unit.to_ascii_lowercase().as_str() {
        "" => default_unit,
        "ns" => Duration::from_nanos(1),
        "us" | "µs" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(3600),
        _ => {
            return Err(UnitError::UnknownUnit {
                spec: spec.to_owned(),
                unit: unit.to_owned(),
            })
        }
    };
    let base: f64 = number
        .parse()
        .map_err(|_| UnitError::NotANumber(spec.to_owned()))?;
    let nanos = base * scale.as_nanos() as f64;
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Err(UnitError::Overflow(spec.to_owned()));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

fn split_number(spec: &str) -> Result<(&str, &str), UnitError> {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Err(UnitError::Empty);
    }
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(UnitError::NotANumber(spec.to_owned()));
    }
    Ok((number, unit.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accept_decimal_suffixes() {
        assert_eq!(parse_count("1000").unwrap(), 1000);
        assert_eq!(parse_count("1K").unwrap(), 1000);
        assert_eq!(parse_count("2m").unwrap(), 2_000_000);
        assert_eq!(parse_count("1.5K").unwrap(), 1500);
        assert_eq!(parse_count(" 4T ").unwrap(), 4_000_000_000_000);
    }

    #[test]
    fn counts_reject_garbage() {
        assert_eq!(parse_count(""), Err(UnitError::Empty));
        assert!(matches!(parse_count("K"), Err(UnitError::NotANumber(_))));
        assert!(matches!(
            parse_count("10Q"),
            Err(UnitError::UnknownUnit { .. })
        ));
        assert!(matches!(
            parse_count("99999999999T"),
            Err(UnitError::Overflow(_))
        ));
    }

    #[test]
    fn durations_default_to_caller_unit() {
        let ms = Duration::from_millis(1);
        assert_eq!(parse_duration("250", ms).unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s", ms).unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1.5s", ms).unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("40us", ms).unwrap(), Duration::from_micros(40));
        assert!(parse_duration("3 fortnights", ms).is_err());
    }
}
