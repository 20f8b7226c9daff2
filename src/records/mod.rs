// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Normalized records
//!
//! Raw backend items are GraphQL objects whose shape differs per query and,
//! for events, per `__typename`. This module collapses them into one stable
//! shape per resource kind. Both output modes render from these types, so
//! structured field names never depend on human labels.
//!
//! - Timestamps become UTC `DateTime`s (runs report float seconds, events
//!   report millisecond strings)
//! - Tags become a key/value map, asset keys become `a/b/c` paths
//! - Event unions become [`EventPayload`] variants carrying only their own fields

pub mod display;
mod event;

pub use event::EventPayload;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::BackendError;
use crate::filter::time::parse_backend_timestamp;
use crate::registry::RecordKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedRecord {
    Run(RunRecord),
    Event(EventRecord),
    Log(LogLine),
    Step(StepRecord),
    Stats(RunStats),
    Deployment(DeploymentRecord),
    Outcome(MutationOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: String,
    pub job_name: Option<String>,
    pub pipeline_name: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub can_terminate: Option<bool>,
    pub root_run_id: Option<String>,
    pub parent_run_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub assets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub run_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub level: Option<String>,
    pub step_key: Option<String>,
    pub message: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub run_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub level: String,
    pub step_key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub run_id: Option<String>,
    pub step_key: String,
    pub status: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub steps_succeeded: u64,
    pub steps_failed: u64,
    pub materializations: u64,
    pub expectations: u64,
    pub enqueued_time: Option<DateTime<Utc>>,
    pub launch_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub id: Option<String>,
    pub deployment_type: Option<String>,
}

/// Result of terminate/delete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub run_id: String,
    pub action: String,
    pub success: bool,
    pub message: Option<String>,
}

impl NormalizedRecord {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NormalizedRecord::Run(_) => "run",
            NormalizedRecord::Event(_) => "event",
            NormalizedRecord::Log(_) => "log",
            NormalizedRecord::Step(_) => "step",
            NormalizedRecord::Stats(_) => "stats",
            NormalizedRecord::Deployment(_) => "deployment",
            NormalizedRecord::Outcome(_) => "outcome",
        }
    }
}

/// Collapse a raw backend item into the record shape for `kind`
///
/// `parent` is the run id for nested resources; it fills `run_id` when the
/// item itself does not carry one.
pub fn normalize(
    kind: RecordKind,
    raw: &Value,
    parent: Option<&str>,
) -> Result<NormalizedRecord, BackendError> {
    let record = match kind {
        RecordKind::Run => NormalizedRecord::Run(normalize_run(raw)?),
        RecordKind::Event => NormalizedRecord::Event(event::normalize_event(raw, parent)),
        RecordKind::Log => {
            let event = event::normalize_event(raw, parent);
            NormalizedRecord::Log(LogLine {
                run_id: event.run_id,
                timestamp: event.timestamp,
                level: event.level.unwrap_or_else(|| "INFO".to_string()),
                step_key: event.step_key,
                message: event.message,
            })
        }
        RecordKind::Step => NormalizedRecord::Step(StepRecord {
            run_id: parent.map(str::to_string),
            step_key: required_str(raw, "stepKey")?,
            status: opt_str(raw, "status"),
            start_time: opt_time(raw, "startTime"),
            end_time: opt_time(raw, "endTime"),
            attempts: raw
                .get("attempts")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
        }),
        RecordKind::Stats => {
            let stats = raw.get("stats").unwrap_or(raw);
            let mut record = normalize_stats(stats).unwrap_or_default();
            record.run_id = opt_str(raw, "runId").or_else(|| parent.map(str::to_string));
            NormalizedRecord::Stats(record)
        }
        RecordKind::Deployment => NormalizedRecord::Deployment(DeploymentRecord {
            name: required_str(raw, "deploymentName")?,
            id: opt_str(raw, "deploymentId"),
            deployment_type: opt_str(raw, "deploymentType"),
        }),
    };
    Ok(record)
}

/// Outcome of a terminate/delete mutation from its result union
pub fn normalize_outcome(action: &str, run_id: &str, raw: &Value) -> MutationOutcome {
    let typename = raw
        .get("__typename")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = opt_str(raw, "message").or_else(|| {
        raw.get("run")
            .and_then(|run| opt_str(run, "status"))
            .map(|status| format!("run is {}", status))
    });
    MutationOutcome {
        run_id: opt_str(raw, "runId")
            .or_else(|| raw.get("run").and_then(|run| opt_str(run, "runId")))
            .unwrap_or_else(|| run_id.to_string()),
        action: action.to_string(),
        success: typename.ends_with("Success"),
        message,
    }
}

fn normalize_run(raw: &Value) -> Result<RunRecord, BackendError> {
    let tags = raw
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| {
                    Some((
                        t.get("key")?.as_str()?.to_string(),
                        t.get("value")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    let assets = raw
        .get("assets")
        .and_then(Value::as_array)
        .map(|assets| {
            assets
                .iter()
                .filter_map(|a| asset_path(a.get("key")?))
                .collect()
        })
        .unwrap_or_default();

    Ok(RunRecord {
        run_id: required_str(raw, "runId")?,
        status: required_str(raw, "status")?,
        job_name: opt_str(raw, "jobName"),
        pipeline_name: opt_str(raw, "pipelineName"),
        creation_time: opt_time(raw, "creationTime"),
        start_time: opt_time(raw, "startTime"),
        end_time: opt_time(raw, "endTime"),
        can_terminate: raw.get("canTerminate").and_then(Value::as_bool),
        root_run_id: opt_str(raw, "rootRunId"),
        parent_run_id: opt_str(raw, "parentRunId"),
        tags,
        assets,
        stats: raw.get("stats").and_then(normalize_stats),
    })
}

/// Stats only count when the union resolved to a snapshot
fn normalize_stats(stats: &Value) -> Option<RunStats> {
    if let Some(typename) = stats.get("__typename").and_then(Value::as_str)
        && typename != "RunStatsSnapshot"
    {
        return None;
    }
    let count = |key: &str| stats.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(RunStats {
        run_id: None,
        steps_succeeded: count("stepsSucceeded"),
        steps_failed: count("stepsFailed"),
        materializations: count("materializations"),
        expectations: count("expectations"),
        enqueued_time: opt_time(stats, "enqueuedTime"),
        launch_time: opt_time(stats, "launchTime"),
        start_time: opt_time(stats, "startTime"),
        end_time: opt_time(stats, "endTime"),
    })
}

/// `{"path": ["a", "b"]}` becomes `a/b`
pub(crate) fn asset_path(key: &Value) -> Option<String> {
    let path = key.get("path")?.as_array()?;
    let parts: Vec<&str> = path.iter().filter_map(Value::as_str).collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn required_str(raw: &Value, key: &str) -> Result<String, BackendError> {
    opt_str(raw, key).ok_or_else(|| {
        BackendError::Fatal(format!("malformed backend item: missing '{}'", key))
    })
}

pub(crate) fn opt_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn opt_time(raw: &Value, key: &str) -> Option<DateTime<Utc>> {
    raw.get(key).and_then(parse_backend_timestamp)
}

/// Get a nested value from JSON using dot notation
pub(crate) fn get_nested_value(value: &Value, path: &str) -> Value {
    let mut current = value;

    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part).unwrap_or(&Value::Null),
            Value::Array(arr) => {
                if let Ok(idx) = part.parse::<usize>() {
                    arr.get(idx).unwrap_or(&Value::Null)
                } else {
                    &Value::Null
                }
            }
            _ => &Value::Null,
        };
    }

    current.clone()
}

/// Format a JSON value as a plain string; `None` for null
pub(crate) fn format_json_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => Some(serde_json::to_string(value).unwrap_or_default()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_value() {
        let json = json!({"run": {"tags": [{"key": "a"}]}});
        assert_eq!(get_nested_value(&json, "run.tags.0.key"), json!("a"));
        assert_eq!(get_nested_value(&json, "run.missing"), Value::Null);
        assert_eq!(get_nested_value(&json, "run.tags.x"), Value::Null);
    }

    #[test]
    fn test_format_json_value() {
        assert_eq!(format_json_value(&Value::Null), None);
        assert_eq!(format_json_value(&json!(true)), Some("true".into()));
        assert_eq!(format_json_value(&json!({"a": 1})), Some(r#"{"a":1}"#.into()));
    }

    #[test]
    fn test_normalize_run_view() {
        let mut raw = fixtures::run("9d38c7ea", "SUCCESS");
        raw["stats"] = json!({
            "__typename": "RunStatsSnapshot",
            "id": "stats123",
            "stepsSucceeded": 5,
            "stepsFailed": 0,
            "materializations": 2,
            "expectations": 0,
        });

        let NormalizedRecord::Run(run) = normalize(RecordKind::Run, &raw, None).unwrap() else {
            panic!("expected run");
        };
        assert_eq!(run.run_id, "9d38c7ea");
        assert_eq!(run.job_name.as_deref(), Some("test_job"));
        assert_eq!(run.tags.get("test_key").map(String::as_str), Some("test_value"));
        assert_eq!(run.assets, vec!["test/asset".to_string()]);
        assert_eq!(run.creation_time.unwrap().timestamp(), 1691849429);
        let stats = run.stats.unwrap();
        assert_eq!(stats.steps_succeeded, 5);
        assert_eq!(stats.materializations, 2);
    }

    #[test]
    fn test_stats_error_union_is_dropped() {
        let mut raw = fixtures::run("r1", "FAILURE");
        raw["stats"] = json!({"__typename": "PythonError", "message": "boom"});
        let NormalizedRecord::Run(run) = normalize(RecordKind::Run, &raw, None).unwrap() else {
            panic!("expected run");
        };
        assert!(run.stats.is_none());
    }

    #[test]
    fn test_missing_identity_is_fatal() {
        let err = normalize(RecordKind::Run, &json!({"status": "SUCCESS"}), None).unwrap_err();
        assert!(matches!(err, BackendError::Fatal(_)));
    }

    #[test]
    fn test_structured_shape_is_tagged() {
        let raw = fixtures::run("r1", "SUCCESS");
        let record = normalize(RecordKind::Run, &raw, None).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "run");
        assert_eq!(value["run_id"], "r1");
        assert_eq!(value["tags"]["test_key"], "test_value");
        assert!(value.get("stats").is_none());
    }

    #[test]
    fn test_step_and_stats_take_parent_run() {
        let raw = json!({"stepKey": "load", "status": "SUCCESS", "attempts": [{}, {}]});
        let NormalizedRecord::Step(step) = normalize(RecordKind::Step, &raw, Some("r1")).unwrap()
        else {
            panic!("expected step");
        };
        assert_eq!(step.run_id.as_deref(), Some("r1"));
        assert_eq!(step.attempts, 2);

        let raw = json!({"stats": {"__typename": "RunStatsSnapshot", "stepsFailed": 1}});
        let NormalizedRecord::Stats(stats) = normalize(RecordKind::Stats, &raw, Some("r1")).unwrap()
        else {
            panic!("expected stats");
        };
        assert_eq!(stats.run_id.as_deref(), Some("r1"));
        assert_eq!(stats.steps_failed, 1);
    }

    #[test]
    fn test_log_lines_default_level() {
        let mut raw = fixtures::event("LogMessageEvent", "LOGS_CAPTURED", None, 1_700_000_000_000);
        raw["level"] = Value::Null;
        let NormalizedRecord::Log(line) = normalize(RecordKind::Log, &raw, None).unwrap() else {
            panic!("expected log");
        };
        assert_eq!(line.level, "INFO");
        assert_eq!(line.run_id.as_deref(), Some("9d38c7ea"));
    }

    #[test]
    fn test_mutation_outcome() {
        let raw = json!({"__typename": "TerminateRunSuccess", "run": {"runId": "r1", "status": "CANCELING"}});
        let outcome = normalize_outcome("terminate", "r1", &raw);
        assert!(outcome.success);
        assert_eq!(outcome.run_id, "r1");
        assert_eq!(outcome.message.as_deref(), Some("run is CANCELING"));

        let raw = json!({"__typename": "DeletePipelineRunSuccess", "runId": "r2"});
        let outcome = normalize_outcome("delete", "r2", &raw);
        assert!(outcome.success);
        assert_eq!(outcome.action, "delete");
        assert!(outcome.message.is_none());
    }
}
