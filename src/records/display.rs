// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Human-mode views of normalized records

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::NormalizedRecord;
use crate::registry::RecordKind;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_time(ts: &Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn fmt_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

const RUN_COLUMNS: &[&str] = &[
    "run_id", "status", "job", "created", "started", "ended", "tags",
];
const EVENT_COLUMNS: &[&str] = &["timestamp", "type", "step_key", "message"];
const LOG_COLUMNS: &[&str] = &["timestamp", "level", "step_key", "message"];
const STEP_COLUMNS: &[&str] = &["step_key", "status", "started", "ended", "attempts"];
const STATS_COLUMNS: &[&str] = &[
    "run_id",
    "steps_succeeded",
    "steps_failed",
    "materializations",
    "expectations",
];
const DEPLOYMENT_COLUMNS: &[&str] = &["name", "id", "type"];
const OUTCOME_COLUMNS: &[&str] = &["run_id", "action", "success", "message"];

/// Table header for records of `kind`, also used for empty results
pub fn columns_for(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Run => RUN_COLUMNS,
        RecordKind::Event => EVENT_COLUMNS,
        RecordKind::Log => LOG_COLUMNS,
        RecordKind::Step => STEP_COLUMNS,
        RecordKind::Stats => STATS_COLUMNS,
        RecordKind::Deployment => DEPLOYMENT_COLUMNS,
    }
}

impl NormalizedRecord {
    /// Table header for this record
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            NormalizedRecord::Run(_) => RUN_COLUMNS,
            NormalizedRecord::Event(_) => EVENT_COLUMNS,
            NormalizedRecord::Log(_) => LOG_COLUMNS,
            NormalizedRecord::Step(_) => STEP_COLUMNS,
            NormalizedRecord::Stats(_) => STATS_COLUMNS,
            NormalizedRecord::Deployment(_) => DEPLOYMENT_COLUMNS,
            NormalizedRecord::Outcome(_) => OUTCOME_COLUMNS,
        }
    }

    /// Table cells, aligned with [`columns`](Self::columns)
    pub fn cells(&self) -> Vec<String> {
        match self {
            NormalizedRecord::Run(r) => vec![
                r.run_id.clone(),
                r.status.clone(),
                r.job_name.clone().or_else(|| r.pipeline_name.clone()).unwrap_or_default(),
                fmt_time(&r.creation_time),
                fmt_time(&r.start_time),
                fmt_time(&r.end_time),
                r.tags
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(","),
            ],
            NormalizedRecord::Event(e) => vec![
                fmt_time(&e.timestamp),
                fmt_opt(&e.event_type),
                fmt_opt(&e.step_key),
                match e.payload.detail() {
                    Some(detail) if !e.message.contains(detail) => {
                        format!("{} ({})", e.message, detail)
                    }
                    _ => e.message.clone(),
                },
            ],
            NormalizedRecord::Log(l) => vec![
                fmt_time(&l.timestamp),
                l.level.clone(),
                fmt_opt(&l.step_key),
                l.message.clone(),
            ],
            NormalizedRecord::Step(s) => vec![
                s.step_key.clone(),
                fmt_opt(&s.status),
                fmt_time(&s.start_time),
                fmt_time(&s.end_time),
                s.attempts.to_string(),
            ],
            NormalizedRecord::Stats(s) => vec![
                fmt_opt(&s.run_id),
                s.steps_succeeded.to_string(),
                s.steps_failed.to_string(),
                s.materializations.to_string(),
                s.expectations.to_string(),
            ],
            NormalizedRecord::Deployment(d) => vec![
                d.name.clone(),
                fmt_opt(&d.id),
                fmt_opt(&d.deployment_type),
            ],
            NormalizedRecord::Outcome(o) => vec![
                o.run_id.clone(),
                o.action.clone(),
                o.success.to_string(),
                fmt_opt(&o.message),
            ],
        }
    }

    /// `key: value` pairs for single-item views
    ///
    /// Lists collapse to an item count, maps render as inline JSON.
    pub fn summary(&self) -> Vec<(String, String)> {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        map.into_iter()
            .filter(|(key, _)| key != "kind")
            .map(|(key, value)| {
                let text = match &value {
                    Value::Null => "-".to_string(),
                    Value::String(s) => s.clone(),
                    Value::Array(items) => format!("{} items", items.len()),
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect()
    }

    /// Single line for streamed (follow) output
    pub fn line(&self) -> String {
        match self {
            NormalizedRecord::Log(l) => match &l.step_key {
                Some(step) => format!(
                    "{} {:<8} [{}] {}",
                    fmt_time(&l.timestamp),
                    l.level,
                    step,
                    l.message
                ),
                None => format!("{} {:<8} {}", fmt_time(&l.timestamp), l.level, l.message),
            },
            _ => self.cells().join("  "),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::records::fixtures;
    use crate::records::normalize;
    use crate::registry::RecordKind;

    #[test]
    fn test_cells_align_with_columns() {
        let run = normalize(RecordKind::Run, &fixtures::run("r1", "SUCCESS"), None).unwrap();
        assert_eq!(run.cells().len(), run.columns().len());

        let raw = fixtures::event("ExecutionStepStartEvent", "STEP_START", Some("a"), 1);
        let event = normalize(RecordKind::Event, &raw, None).unwrap();
        assert_eq!(event.cells().len(), event.columns().len());
        assert_eq!(event.cells()[1], "STEP_START");
    }

    #[test]
    fn test_summary_collapses_lists_and_maps() {
        let run = normalize(RecordKind::Run, &fixtures::run("r1", "SUCCESS"), None).unwrap();
        let summary = run.summary();
        let get = |key: &str| {
            summary
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(summary[0].0, "run_id");
        assert_eq!(get("assets"), Some("1 items"));
        assert_eq!(get("tags"), Some(r#"{"test_key":"test_value"}"#));
        assert_eq!(get("root_run_id"), Some("-"));
        assert_eq!(get("kind"), None);
    }

    #[test]
    fn test_log_line() {
        let raw = fixtures::event("LogMessageEvent", "LOGS_CAPTURED", Some("load"), 1_700_000_000_000);
        let line = normalize(RecordKind::Log, &raw, None).unwrap().line();
        assert_eq!(
            line,
            "2023-11-14 22:13:20 INFO     [load] LOGS_CAPTURED message"
        );
    }
}
