// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Client-side evaluation of a [`FilterSet`] against raw backend items
//!
//! Backends only push down what they can express exactly, so every page is
//! re-checked here. A clause matches when any of its predicates matches; an
//! item matches when every clause does.

use serde_json::Value;

use super::pattern::glob_match;
use super::time::parse_backend_timestamp;
use super::{FilterOp, FilterSet};
use crate::records::{format_json_value, get_nested_value};
use crate::registry::ResourceDescriptor;
use crate::registry::fields::{FieldKind, FilterField};

impl FilterSet {
    pub fn matches(&self, descriptor: &ResourceDescriptor, item: &Value) -> bool {
        if self.is_empty() {
            return true;
        }
        self.clauses().iter().all(|clause| {
            let Some(field) = descriptor.field(clause.field) else {
                return true;
            };
            let value = get_nested_value(item, field.json_path);
            clause
                .predicates
                .iter()
                .any(|p| op_matches(field, &p.op, &value))
        })
    }
}

fn op_matches(field: &FilterField, op: &FilterOp, value: &Value) -> bool {
    match (field.kind, op) {
        (FieldKind::KeyValue, FilterOp::Equals { value: pair }) => tag_matches(value, pair),
        (_, FilterOp::Range { lower, upper }) => match parse_backend_timestamp(value) {
            Some(ts) => lower.is_none_or(|l| ts >= l) && upper.is_none_or(|u| ts <= u),
            None => false,
        },
        (kind, op) => {
            let Some(text) = format_json_value(value) else {
                return false;
            };
            let text = if kind == FieldKind::Fragment {
                text.to_lowercase()
            } else {
                text
            };
            match op {
                FilterOp::Equals { value } if matches!(kind, FieldKind::Enum(_) | FieldKind::Symbol) => {
                    text.eq_ignore_ascii_case(value)
                }
                FilterOp::Equals { value } => &text == value,
                FilterOp::Prefix { value } => text.starts_with(value.as_str()),
                FilterOp::Wildcard { pattern } => glob_match(pattern, &text),
                FilterOp::Range { .. } => false,
            }
        }
    }
}

/// Tags arrive as `[{key, value}]` from the backend or as a flat map
fn tag_matches(tags: &Value, pair: &str) -> bool {
    let Some((key, expected)) = pair.split_once('=') else {
        return false;
    };
    match tags {
        Value::Array(items) => items.iter().any(|tag| {
            tag.get("key").and_then(Value::as_str) == Some(key)
                && tag.get("value").and_then(Value::as_str) == Some(expected)
        }),
        Value::Object(map) => map.get(key).and_then(Value::as_str) == Some(expected),
        _ => false,
    }
}
