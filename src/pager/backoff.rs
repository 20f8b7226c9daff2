// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff shared by the pager and the follower
///
/// `max_attempts` counts every attempt including the first, so a policy with
/// `max_attempts = 5` sleeps at most four times before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "millis")]
    pub base: Duration,
    pub multiplier: f64,
    #[serde(with = "millis")]
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `failures`th consecutive failure (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.base.as_millis() as f64 * factor;
        let cap = self.cap.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.cap
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

/// Durations as integer milliseconds in config files
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_curve() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_retry_budget_counts_first_attempt() {
        let policy = BackoffPolicy::default();
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));

        let single = BackoffPolicy {
            max_attempts: 0,
            ..BackoffPolicy::default()
        };
        assert!(!single.allows_retry(1));
    }

    #[test]
    fn test_huge_failure_counts_stay_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_config_roundtrip_uses_millis() {
        let json = serde_json::to_value(BackoffPolicy::default()).unwrap();
        assert_eq!(json["base"], 1000);
        assert_eq!(json["cap"], 30000);

        let parsed: BackoffPolicy = serde_json::from_str(r#"{"base": 250}"#).unwrap();
        assert_eq!(parsed.base, Duration::from_millis(250));
        assert_eq!(parsed.max_attempts, 5);
    }
}
