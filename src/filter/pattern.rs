// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Text pattern normalization and matching

use super::FilterOp;
use crate::error::FilterErrorReason;

/// Characters with meaning in other pattern dialects; only `*` is ours
const UNSUPPORTED_METACHARACTERS: &[char] =
    &['?', '[', ']', '{', '}', '(', ')', '|', '^', '$', '+', '\\'];

/// Turn a user pattern into the narrowest operator that expresses it
///
/// Returns `Ok(None)` for a pattern that matches everything.
pub fn normalize_pattern(value: &str) -> Result<Option<FilterOp>, FilterErrorReason> {
    if let Some(c) = value.chars().find(|c| UNSUPPORTED_METACHARACTERS.contains(c)) {
        return Err(FilterErrorReason::UnsupportedPattern(c));
    }

    let mut collapsed = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }

    if collapsed == "*" {
        return Ok(None);
    }

    let stars = collapsed.matches('*').count();
    let op = match stars {
        0 => FilterOp::Equals { value: collapsed },
        1 if collapsed.ends_with('*') => {
            collapsed.pop();
            FilterOp::Prefix { value: collapsed }
        }
        _ => FilterOp::Wildcard { pattern: collapsed },
    };
    Ok(Some(op))
}

/// Match text against a pattern where `*` matches any run of characters
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None; // position of last '*' in pattern
    let mut star_ti = 0; // position in text when we saw last '*'

    while ti < text.len() {
        if pi < pattern.len() && pattern[pi] != '*' && pattern[pi] == text[ti] {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(sp) = star_pi {
            // Backtrack: let the last '*' swallow one more character
            pi = sp + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }

    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_picks_narrowest_operator() {
        assert_eq!(
            normalize_pattern("etl").unwrap(),
            Some(FilterOp::Equals {
                value: "etl".into()
            })
        );
        assert_eq!(
            normalize_pattern("etl_*").unwrap(),
            Some(FilterOp::Prefix {
                value: "etl_".into()
            })
        );
        assert_eq!(
            normalize_pattern("*_daily").unwrap(),
            Some(FilterOp::Wildcard {
                pattern: "*_daily".into()
            })
        );
        assert_eq!(
            normalize_pattern("etl**daily").unwrap(),
            Some(FilterOp::Wildcard {
                pattern: "etl*daily".into()
            })
        );
        assert_eq!(
            normalize_pattern("etl**").unwrap(),
            Some(FilterOp::Prefix {
                value: "etl".into()
            })
        );
    }

    #[test]
    fn test_bare_star_matches_everything() {
        assert_eq!(normalize_pattern("*").unwrap(), None);
        assert_eq!(normalize_pattern("***").unwrap(), None);
    }

    #[test]
    fn test_rejects_foreign_metacharacters() {
        assert_eq!(
            normalize_pattern("etl?"),
            Err(FilterErrorReason::UnsupportedPattern('?'))
        );
        assert_eq!(
            normalize_pattern("[ab]*"),
            Err(FilterErrorReason::UnsupportedPattern('['))
        );
        assert_eq!(
            normalize_pattern("^etl"),
            Err(FilterErrorReason::UnsupportedPattern('^'))
        );
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*_daily", "etl_daily"));
        assert!(glob_match("etl*daily", "etl_big_daily"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(!glob_match("etl", "etl2"));
    }
}
