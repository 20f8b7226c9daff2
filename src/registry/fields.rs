// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Filter schemas for each resource
//!
//! Every resource declares the fields it can be filtered on, the kind of
//! value each field holds, the operators it accepts and where the field
//! lives in a raw backend item. The translator validates user input against
//! this schema; the evaluator reads raw items through `json_path`.
//!
//! ## Field kinds
//!
//! - `Enum`: closed set of upper-case values (run status, log level, ...)
//! - `Symbol`: open set of upper-case identifiers (event types keep growing
//!   on the backend side)
//! - `Text`: free text, may be matched with `*` patterns
//! - `Fragment`: case-insensitive text; a bare value matches anywhere
//! - `KeyValue`: `key=value` pairs (run tags)
//! - `Time`: instants, only ever filtered by range

use serde::Serialize;

/// Operators a filter field may accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Prefix,
    Wildcard,
    Range,
    /// More than one value for the same field (OR'd together)
    In,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::Prefix => "prefix",
            Operator::Wildcard => "wildcard",
            Operator::Range => "range",
            Operator::In => "in",
        }
    }
}

/// What kind of value a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Enum(&'static [&'static str]),
    Symbol,
    Text,
    Fragment,
    KeyValue,
    Time,
}

/// A filterable field in a resource schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterField {
    /// Name used on the command line (`--filter status=...`)
    pub name: &'static str,
    pub kind: FieldKind,
    pub operators: &'static [Operator],
    /// Dotted path into a raw backend item
    pub json_path: &'static str,
}

impl FilterField {
    pub fn supports(&self, operator: Operator) -> bool {
        self.operators.contains(&operator)
    }
}

pub const RUN_STATUSES: &[&str] = &[
    "QUEUED",
    "NOT_STARTED",
    "MANAGED",
    "STARTING",
    "STARTED",
    "SUCCESS",
    "FAILURE",
    "CANCELING",
    "CANCELED",
];

/// Statuses after which a run produces no further events
pub const TERMINAL_RUN_STATUSES: &[&str] = &["SUCCESS", "FAILURE", "CANCELED"];

pub const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

pub const STEP_STATUSES: &[&str] = &["IN_PROGRESS", "SUCCESS", "FAILURE", "SKIPPED"];

pub const DEPLOYMENT_TYPES: &[&str] = &["PRODUCTION", "DEV", "BRANCH"];

const ENUM_OPS: &[Operator] = &[Operator::Equals, Operator::In];
const TEXT_OPS: &[Operator] = &[
    Operator::Equals,
    Operator::Prefix,
    Operator::Wildcard,
    Operator::In,
];
const ID_OPS: &[Operator] = &[Operator::Equals, Operator::In];
const RANGE_OPS: &[Operator] = &[Operator::Range];

pub const RUN_FIELDS: &[FilterField] = &[
    FilterField {
        name: "id",
        kind: FieldKind::Text,
        operators: ID_OPS,
        json_path: "runId",
    },
    FilterField {
        name: "status",
        kind: FieldKind::Enum(RUN_STATUSES),
        operators: ENUM_OPS,
        json_path: "status",
    },
    FilterField {
        name: "job",
        kind: FieldKind::Text,
        operators: TEXT_OPS,
        json_path: "jobName",
    },
    FilterField {
        name: "tag",
        kind: FieldKind::KeyValue,
        operators: ID_OPS,
        json_path: "tags",
    },
    FilterField {
        name: "created",
        kind: FieldKind::Time,
        operators: RANGE_OPS,
        json_path: "creationTime",
    },
];

pub const EVENT_FIELDS: &[FilterField] = &[
    FilterField {
        name: "type",
        kind: FieldKind::Symbol,
        operators: ENUM_OPS,
        json_path: "eventType",
    },
    FilterField {
        name: "step",
        kind: FieldKind::Fragment,
        operators: TEXT_OPS,
        json_path: "stepKey",
    },
    FilterField {
        name: "timestamp",
        kind: FieldKind::Time,
        operators: RANGE_OPS,
        json_path: "timestamp",
    },
];

pub const LOG_FIELDS: &[FilterField] = &[
    FilterField {
        name: "level",
        kind: FieldKind::Enum(LOG_LEVELS),
        operators: ENUM_OPS,
        json_path: "level",
    },
    FilterField {
        name: "step",
        kind: FieldKind::Fragment,
        operators: TEXT_OPS,
        json_path: "stepKey",
    },
    FilterField {
        name: "timestamp",
        kind: FieldKind::Time,
        operators: RANGE_OPS,
        json_path: "timestamp",
    },
];

pub const STEP_FIELDS: &[FilterField] = &[
    FilterField {
        name: "status",
        kind: FieldKind::Enum(STEP_STATUSES),
        operators: ENUM_OPS,
        json_path: "status",
    },
    FilterField {
        name: "step",
        kind: FieldKind::Fragment,
        operators: TEXT_OPS,
        json_path: "stepKey",
    },
];

pub const DEPLOYMENT_FIELDS: &[FilterField] = &[
    FilterField {
        name: "name",
        kind: FieldKind::Text,
        operators: TEXT_OPS,
        json_path: "deploymentName",
    },
    FilterField {
        name: "type",
        kind: FieldKind::Enum(DEPLOYMENT_TYPES),
        operators: ENUM_OPS,
        json_path: "deploymentType",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_fields_only_accept_ranges() {
        for fields in [RUN_FIELDS, EVENT_FIELDS, LOG_FIELDS] {
            for field in fields.iter().filter(|f| f.kind == FieldKind::Time) {
                assert_eq!(field.operators, &[Operator::Range], "{}", field.name);
            }
        }
    }

    #[test]
    fn test_enum_fields_reject_patterns() {
        let status = RUN_FIELDS.iter().find(|f| f.name == "status").unwrap();
        assert!(status.supports(Operator::In));
        assert!(!status.supports(Operator::Wildcard));
        assert!(!status.supports(Operator::Prefix));
    }

    #[test]
    fn test_step_fields_match_fragments() {
        for fields in [EVENT_FIELDS, LOG_FIELDS, STEP_FIELDS] {
            let step = fields.iter().find(|f| f.name == "step").unwrap();
            assert_eq!(step.kind, FieldKind::Fragment);
            assert!(step.supports(Operator::Wildcard));
        }
    }

    #[test]
    fn test_terminal_statuses_are_run_statuses() {
        for status in TERMINAL_RUN_STATUSES {
            assert!(RUN_STATUSES.contains(status));
        }
    }
}
