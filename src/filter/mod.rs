// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Backend-agnostic filter structures
//!
//! A [`FilterSet`] is what the translator produces from raw CLI input and
//! what the pager hands to the backend. Predicates on the same field are
//! OR'd (set membership), distinct fields are AND'd. Predicates are kept in
//! schema order so that the same input always yields the same set.

mod eval;
pub mod pattern;
pub mod time;
mod translator;

pub use translator::{FilterTranslator, RawFilter};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Operator and operand of a single predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOp {
    Equals {
        value: String,
    },
    Prefix {
        value: String,
    },
    /// `*` matches any run of characters
    Wildcard {
        pattern: String,
    },
    /// Inclusive time range; at least one bound is set
    Range {
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FilterPredicate {
    pub field: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

/// Predicates on one field, OR'd together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterClause<'a> {
    pub field: &'a str,
    pub predicates: &'a [FilterPredicate],
}

impl FilterClause<'_> {
    /// Operand values when every predicate is an equality
    pub fn equals_values(&self) -> Option<Vec<&str>> {
        self.predicates
            .iter()
            .map(|p| match &p.op {
                FilterOp::Equals { value } => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Bounds when the clause is a single range
    pub fn range(&self) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        match self.predicates {
            [FilterPredicate {
                op: FilterOp::Range { lower, upper },
                ..
            }] => Some((*lower, *upper)),
            _ => None,
        }
    }
}

/// Validated, ordered filter for one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FilterSet {
    pub noun: String,
    /// Parent run for nested resources
    pub parent: Option<String>,
    pub predicates: Vec<FilterPredicate>,
}

impl FilterSet {
    pub fn new(noun: impl Into<String>, parent: Option<String>) -> Self {
        Self {
            noun: noun.into(),
            parent,
            predicates: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Group consecutive predicates by field
    pub fn clauses(&self) -> Vec<FilterClause<'_>> {
        self.predicates
            .chunk_by(|a, b| a.field == b.field)
            .map(|chunk| FilterClause {
                field: &chunk[0].field,
                predicates: chunk,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn clause(&self, field: &str) -> Option<FilterClause<'_>> {
        self.clauses().into_iter().find(|c| c.field == field)
    }

    /// SHA-256 over the canonical JSON form; binds cursors to this query shape
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(field: &str, value: &str) -> FilterPredicate {
        FilterPredicate {
            field: field.to_string(),
            op: FilterOp::Equals {
                value: value.to_string(),
            },
        }
    }

    #[test]
    fn test_clauses_group_by_field() {
        let mut set = FilterSet::new("run", None);
        set.predicates = vec![
            eq("status", "SUCCESS"),
            eq("status", "FAILURE"),
            eq("job", "etl"),
        ];

        let clauses = set.clauses();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].field, "status");
        assert_eq!(
            clauses[0].equals_values(),
            Some(vec!["SUCCESS", "FAILURE"])
        );
        assert_eq!(clauses[1].equals_values(), Some(vec!["etl"]));
    }

    #[test]
    fn test_fingerprint_depends_on_shape() {
        let mut a = FilterSet::new("run", None);
        a.predicates = vec![eq("status", "SUCCESS")];
        let b = a.clone();
        let mut c = a.clone();
        c.predicates = vec![eq("status", "FAILURE")];
        let d = FilterSet::new("run", Some("abc".into()));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_range_clause() {
        let lower = DateTime::from_timestamp(1_700_000_000, 0);
        let mut set = FilterSet::new("run", None);
        set.predicates = vec![FilterPredicate {
            field: "created".into(),
            op: FilterOp::Range { lower, upper: None },
        }];
        assert_eq!(set.clause("created").unwrap().range(), Some((lower, None)));
        assert!(set.clause("created").unwrap().equals_values().is_none());
    }
}
