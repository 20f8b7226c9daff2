// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Run event decoding
//!
//! Events arrive as a GraphQL union discriminated by `__typename`. Each
//! known type maps to its own [`EventPayload`] variant; unknown types are
//! kept as [`EventPayload::Other`] with their type name so nothing is lost.

use serde::Serialize;
use serde_json::Value;

use super::{EventRecord, asset_path, opt_str, opt_time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    StepStart,
    StepSuccess,
    StepFailure { error: Option<String> },
    StepSkipped,
    RunFailure { error: Option<String> },
    /// Run enqueued/started/succeeded/canceled and friends
    RunLifecycle,
    Materialization { asset_key: Option<String> },
    Observation { asset_key: Option<String> },
    Log,
    Engine { error: Option<String> },
    Other { type_name: String },
}

impl EventPayload {
    fn from_raw(raw: &Value) -> Self {
        let typename = raw
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let error = || {
            raw.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let asset_key = || raw.get("assetKey").and_then(asset_path);

        match typename {
            "ExecutionStepStartEvent" => EventPayload::StepStart,
            "ExecutionStepSuccessEvent" => EventPayload::StepSuccess,
            "ExecutionStepFailureEvent" => EventPayload::StepFailure { error: error() },
            "ExecutionStepSkippedEvent" => EventPayload::StepSkipped,
            "RunFailureEvent" => EventPayload::RunFailure { error: error() },
            "MaterializationEvent" => EventPayload::Materialization {
                asset_key: asset_key(),
            },
            "ObservationEvent" => EventPayload::Observation {
                asset_key: asset_key(),
            },
            "LogMessageEvent" => EventPayload::Log,
            "EngineEvent" => EventPayload::Engine { error: error() },
            t if t.starts_with("Run") && t.ends_with("Event") => EventPayload::RunLifecycle,
            other => EventPayload::Other {
                type_name: other.to_string(),
            },
        }
    }

    /// Extra detail shown after the message in human output
    pub fn detail(&self) -> Option<&str> {
        match self {
            EventPayload::StepFailure { error }
            | EventPayload::RunFailure { error }
            | EventPayload::Engine { error } => error.as_deref(),
            EventPayload::Materialization { asset_key }
            | EventPayload::Observation { asset_key } => asset_key.as_deref(),
            _ => None,
        }
    }
}

pub(super) fn normalize_event(raw: &Value, parent: Option<&str>) -> EventRecord {
    EventRecord {
        run_id: opt_str(raw, "runId").or_else(|| parent.map(str::to_string)),
        timestamp: opt_time(raw, "timestamp"),
        event_type: opt_str(raw, "eventType"),
        level: opt_str(raw, "level"),
        step_key: opt_str(raw, "stepKey"),
        message: opt_str(raw, "message").unwrap_or_default(),
        payload: EventPayload::from_raw(raw),
    }
}
