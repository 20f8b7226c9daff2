// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Time expression parsing
//!
//! User input accepts relative offsets (`30s`, `15m`, `2h`, `1d`, `1w`),
//! RFC 3339, plain dates (midnight UTC), unix seconds and `now`. Relative
//! offsets always resolve against the caller-supplied `now`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::FilterErrorReason;

static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*([smhdw])$").expect("valid regex"));

/// Parse a user-supplied time expression
pub fn parse_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, FilterErrorReason> {
    let input = input.trim();
    let unparseable = || FilterErrorReason::UnparseableTime(input.to_string());

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Some(caps) = RELATIVE_RE.captures(&input.to_lowercase()) {
        let amount: i64 = caps[1].parse().map_err(|_| unparseable())?;
        let unit_secs = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            _ => 604_800,
        };
        let offset = amount
            .checked_mul(unit_secs)
            .and_then(Duration::try_seconds)
            .ok_or_else(unparseable)?;
        return now.checked_sub_signed(offset).ok_or_else(unparseable);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(unparseable);
    }

    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = input.parse().map_err(|_| unparseable())?;
        return DateTime::from_timestamp(secs, 0).ok_or_else(unparseable);
    }

    Err(unparseable())
}

/// Interpret a timestamp as returned by the backend
///
/// Runs report float epoch seconds, events report epoch milliseconds as a
/// string; RFC 3339 strings are accepted too.
pub fn parse_backend_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_epoch_f64(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                // Anything past year 5138 in seconds is really milliseconds
                if ms.abs() > 100_000_000_000 {
                    return DateTime::from_timestamp_millis(ms);
                }
                return DateTime::from_timestamp(ms, 0);
            }
            if let Ok(secs) = s.parse::<f64>() {
                return from_epoch_f64(secs);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn from_epoch_f64(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// Epoch seconds as sent to the backend in range filters
pub fn to_epoch_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_relative_offsets() {
        assert_eq!(
            parse_time("2h", now()).unwrap().to_rfc3339(),
            "2024-06-01T10:00:00+00:00"
        );
        assert_eq!(
            parse_time("1d", now()).unwrap().to_rfc3339(),
            "2024-05-31T12:00:00+00:00"
        );
        assert_eq!(
            parse_time("30S", now()).unwrap().to_rfc3339(),
            "2024-06-01T11:59:30+00:00"
        );
        assert_eq!(parse_time("now", now()).unwrap(), now());
    }

    #[test]
    fn test_absolute_forms() {
        assert_eq!(
            parse_time("2024-01-31", now()).unwrap().to_rfc3339(),
            "2024-01-31T00:00:00+00:00"
        );
        assert_eq!(
            parse_time("2024-01-31T05:00:00+02:00", now())
                .unwrap()
                .to_rfc3339(),
            "2024-01-31T03:00:00+00:00"
        );
        assert_eq!(parse_time("0", now()).unwrap().timestamp(), 0);
    }

    #[test]
    fn test_unparseable() {
        for input in ["", "yesterday", "2x", "-1h", "2024-13-01"] {
            assert!(
                matches!(
                    parse_time(input, now()),
                    Err(FilterErrorReason::UnparseableTime(_))
                ),
                "{input}"
            );
        }
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(parse_time("99999999999999w", now()).is_err());
    }

    #[test]
    fn test_backend_timestamps() {
        let secs = parse_backend_timestamp(&serde_json::json!(1_700_000_000.5)).unwrap();
        assert_eq!(secs.timestamp_millis(), 1_700_000_000_500);

        let millis = parse_backend_timestamp(&serde_json::json!("1700000000123")).unwrap();
        assert_eq!(millis.timestamp_millis(), 1_700_000_000_123);

        let plain = parse_backend_timestamp(&serde_json::json!("1700000000")).unwrap();
        assert_eq!(plain.timestamp(), 1_700_000_000);

        assert!(parse_backend_timestamp(&serde_json::Value::Null).is_none());
        assert!(parse_backend_timestamp(&serde_json::json!("garbage")).is_none());
    }
}
