// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Translate raw CLI filter input into a validated [`FilterSet`]
//!
//! Supports:
//! - `field=value` and `field=a,b,c` (OR within a field)
//! - dedicated flags (`--status`, `--job`, ...) which arrive as the same
//!   `field=value` shape
//! - time ranges: `--since`/`--until` bind to the resource's time field,
//!   `--filter created=2d..1d` addresses it directly
//!
//! Translation is pure. Relative times resolve against the `now` captured
//! when the translator is built, so translating the same input twice gives
//! bit-identical sets.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::pattern::normalize_pattern;
use super::time::parse_time;
use super::{FilterOp, FilterPredicate, FilterSet};
use crate::error::{FilterErrorReason, FilterValidationError};
use crate::registry::ResourceDescriptor;
use crate::registry::fields::{FieldKind, FilterField, Operator};

/// One unvalidated filter as typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFilter {
    /// `field=value[,value...]`
    Values { field: String, raw: String },
    /// `--since`/`--until`; `field` defaults to the resource's time field
    Range {
        field: Option<String>,
        since: Option<String>,
        until: Option<String>,
    },
}

impl RawFilter {
    pub fn values(field: impl Into<String>, raw: impl Into<String>) -> Self {
        RawFilter::Values {
            field: field.into(),
            raw: raw.into(),
        }
    }

    /// Parse a `--filter` expression (`field=value[,value...]`)
    pub fn parse(expr: &str) -> Result<Self, FilterValidationError> {
        let (field, raw) = expr.split_once('=').ok_or_else(|| {
            FilterValidationError::new(
                expr.trim(),
                FilterErrorReason::MissingEquals(expr.to_string()),
            )
        })?;
        Ok(RawFilter::values(field.trim().to_lowercase(), raw))
    }
}

/// Per-field accumulator while translating
#[derive(Default)]
struct FieldInput {
    ops: Vec<FilterOp>,
    match_all: bool,
    lower: Option<DateTime<Utc>>,
    upper: Option<DateTime<Utc>>,
    ranged: bool,
}

pub struct FilterTranslator {
    now: DateTime<Utc>,
}

impl FilterTranslator {
    /// `now` is the single resolution point for relative times
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn translate(
        &self,
        descriptor: &ResourceDescriptor,
        parent: Option<&str>,
        raw: &[RawFilter],
    ) -> Result<FilterSet, FilterValidationError> {
        let mut inputs: Vec<FieldInput> = descriptor
            .fields
            .iter()
            .map(|_| FieldInput::default())
            .collect();

        for filter in raw {
            match filter {
                RawFilter::Values { field, raw } => {
                    let (idx, schema) = lookup(descriptor, field)?;
                    self.add_values(schema, raw, &mut inputs[idx])?;
                }
                RawFilter::Range {
                    field,
                    since,
                    until,
                } => {
                    let name = match field.as_deref().or(descriptor.time_field) {
                        Some(name) => name,
                        None => {
                            let flag = if since.is_some() { "since" } else { "until" };
                            return Err(unknown_field(descriptor, flag));
                        }
                    };
                    let (idx, schema) = lookup(descriptor, name)?;
                    let lower = self.parse_bound(schema, since.as_deref())?;
                    let upper = self.parse_bound(schema, until.as_deref())?;
                    narrow(&mut inputs[idx], lower, upper);
                }
            }
        }

        let mut set = FilterSet::new(descriptor.noun, parent.map(str::to_string));
        for (schema, input) in descriptor.fields.iter().zip(inputs) {
            if input.ranged {
                if let (Some(lower), Some(upper)) = (input.lower, input.upper)
                    && lower > upper
                {
                    return Err(FilterValidationError::new(
                        schema.name,
                        FilterErrorReason::MalformedRange(format!(
                            "lower bound {} is after upper bound {}",
                            lower.to_rfc3339(),
                            upper.to_rfc3339()
                        )),
                    ));
                }
                if input.lower.is_some() || input.upper.is_some() {
                    set.predicates.push(FilterPredicate {
                        field: schema.name.to_string(),
                        op: FilterOp::Range {
                            lower: input.lower,
                            upper: input.upper,
                        },
                    });
                }
                continue;
            }

            if input.match_all {
                continue;
            }
            for op in input.ops {
                set.predicates.push(FilterPredicate {
                    field: schema.name.to_string(),
                    op,
                });
            }
        }

        Ok(set)
    }

    fn add_values(
        &self,
        schema: &FilterField,
        raw: &str,
        input: &mut FieldInput,
    ) -> Result<(), FilterValidationError> {
        let err = |reason| FilterValidationError::new(schema.name, reason);

        let values: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();
        if values.is_empty() {
            return Err(err(FilterErrorReason::InvalidValue(raw.to_string())));
        }

        if let FieldKind::Time = schema.kind {
            if values.len() > 1 {
                return Err(err(FilterErrorReason::SingleValueOnly {
                    count: values.len(),
                }));
            }
            let (lower, upper) = match values[0].split_once("..") {
                Some((a, b)) => (
                    self.parse_bound(schema, Some(a).filter(|s| !s.trim().is_empty()))?,
                    self.parse_bound(schema, Some(b).filter(|s| !s.trim().is_empty()))?,
                ),
                None => (self.parse_bound(schema, Some(values[0].as_str()))?, None),
            };
            if lower.is_none() && upper.is_none() {
                return Err(err(FilterErrorReason::MalformedRange(values[0].clone())));
            }
            narrow(input, lower, upper);
            return Ok(());
        }

        let normalized = match schema.kind {
            FieldKind::Enum(allowed) => values
                .into_iter()
                .map(|v| {
                    let upper = v.to_uppercase();
                    if allowed.contains(&upper.as_str()) {
                        Ok(upper)
                    } else {
                        Err(err(FilterErrorReason::NotAllowed {
                            value: v,
                            allowed: allowed.join(", "),
                        }))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
            FieldKind::Symbol => values
                .into_iter()
                .map(|v| {
                    let upper = v.to_uppercase();
                    if upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        Ok(upper)
                    } else {
                        Err(err(FilterErrorReason::InvalidValue(v)))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
            FieldKind::Fragment => values.into_iter().map(|v| v.to_lowercase()).collect(),
            FieldKind::KeyValue => values
                .into_iter()
                .map(|v| match v.split_once('=') {
                    Some((key, value)) if !key.trim().is_empty() => {
                        Ok(format!("{}={}", key.trim(), value.trim()))
                    }
                    _ => Err(err(FilterErrorReason::InvalidValue(v))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => values,
        };

        for value in deduplicate(normalized) {
            let op = match schema.kind {
                FieldKind::Text | FieldKind::Fragment => {
                    match normalize_pattern(&value).map_err(err)? {
                        Some(FilterOp::Equals { value }) if schema.kind == FieldKind::Fragment => {
                            FilterOp::Wildcard {
                                pattern: format!("*{}*", value),
                            }
                        }
                        Some(op) => op,
                        None => {
                            input.match_all = true;
                            continue;
                        }
                    }
                }
                _ => FilterOp::Equals { value },
            };
            check_operator(schema, &op)?;
            if !input.ops.contains(&op) {
                input.ops.push(op);
            }
        }

        if input.ops.len() > 1 && !schema.supports(Operator::In) {
            return Err(err(FilterErrorReason::SingleValueOnly {
                count: input.ops.len(),
            }));
        }
        Ok(())
    }

    fn parse_bound(
        &self,
        schema: &FilterField,
        value: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, FilterValidationError> {
        if !schema.supports(Operator::Range) {
            return Err(FilterValidationError::new(
                schema.name,
                FilterErrorReason::UnsupportedOperator {
                    operator: Operator::Range.as_str(),
                },
            ));
        }
        value
            .map(|v| parse_time(v, self.now))
            .transpose()
            .map_err(|reason| FilterValidationError::new(schema.name, reason))
    }
}

fn lookup<'a>(
    descriptor: &'a ResourceDescriptor,
    field: &str,
) -> Result<(usize, &'a FilterField), FilterValidationError> {
    descriptor
        .fields
        .iter()
        .enumerate()
        .find(|(_, f)| f.name == field)
        .ok_or_else(|| unknown_field(descriptor, field))
}

fn unknown_field(descriptor: &ResourceDescriptor, field: &str) -> FilterValidationError {
    FilterValidationError::new(
        field,
        FilterErrorReason::UnknownField {
            noun: descriptor.noun.to_string(),
            supported: descriptor.field_names(),
        },
    )
}

fn check_operator(schema: &FilterField, op: &FilterOp) -> Result<(), FilterValidationError> {
    let operator = match op {
        FilterOp::Equals { .. } => Operator::Equals,
        FilterOp::Prefix { .. } => Operator::Prefix,
        FilterOp::Wildcard { .. } => Operator::Wildcard,
        FilterOp::Range { .. } => Operator::Range,
    };
    if schema.supports(operator) {
        Ok(())
    } else {
        Err(FilterValidationError::new(
            schema.name,
            FilterErrorReason::UnsupportedOperator {
                operator: operator.as_str(),
            },
        ))
    }
}

/// Intersect a new range with what the field already has
fn narrow(input: &mut FieldInput, lower: Option<DateTime<Utc>>, upper: Option<DateTime<Utc>>) {
    input.ranged = true;
    input.lower = match (input.lower, lower) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    input.upper = match (input.upper, upper) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
}

/// Deduplicate values while preserving order
fn deduplicate(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
