// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! GraphQL documents and response mapping for each operation
//!
//! Builders turn typed requests into `(document, variables)` pairs; parsers
//! pull the items and paging state out of the `data` object and classify
//! error unions (`RunNotFoundError`, `PythonError`, ...).

use serde_json::{Map, Value, json};

use super::{ItemRequest, MutationRequest, PageRequest, PageResponse};
use crate::error::BackendError;
use crate::filter::FilterSet;
use crate::filter::time::to_epoch_seconds;
use crate::registry::OperationId;
use crate::registry::fields::TERMINAL_RUN_STATUSES;

const RUN_FIELDS: &str = "
      id
      runId
      status
      pipelineName
      jobName
      creationTime
      startTime
      endTime
      canTerminate
      rootRunId
      parentRunId
      tags { key value }";

const RUNS_QUERY: &str = "
query RunsQuery($filter: RunsFilter, $cursor: String, $limit: Int) {
  runsOrError(filter: $filter, cursor: $cursor, limit: $limit) {
    __typename
    ... on Runs {
      results {__RUN_FIELDS__
      }
    }
    ... on InvalidPipelineRunsFilterError { message }
    ... on PythonError { message }
  }
}";

const RUN_VIEW_QUERY: &str = "
query RunViewQuery($runId: ID!) {
  runOrError(runId: $runId) {
    __typename
    ... on Run {__RUN_FIELDS__
      assets { key { path } }
      stats {
        __typename
        ... on RunStatsSnapshot {
          id
          stepsSucceeded
          stepsFailed
          materializations
          expectations
          enqueuedTime
          launchTime
          startTime
          endTime
        }
        ... on PythonError { message }
      }
    }
    ... on RunNotFoundError { message }
    ... on PythonError { message }
  }
}";

const RUN_STATS_QUERY: &str = "
query RunStatsQuery($runId: ID!) {
  runOrError(runId: $runId) {
    __typename
    ... on Run {
      runId
      stats {
        __typename
        ... on RunStatsSnapshot {
          stepsSucceeded
          stepsFailed
          materializations
          expectations
          enqueuedTime
          launchTime
          startTime
          endTime
        }
        ... on PythonError { message }
      }
    }
    ... on RunNotFoundError { message }
    ... on PythonError { message }
  }
}";

const RUN_EVENTS_QUERY: &str = "
query RunEventsQuery($runId: ID!, $afterCursor: String, $limit: Int) {
  runOrError(runId: $runId) {
    __typename
    ... on Run { status }
    ... on RunNotFoundError { message }
    ... on PythonError { message }
  }
  logsForRun(runId: $runId, afterCursor: $afterCursor, limit: $limit) {
    __typename
    ... on EventConnection {
      cursor
      hasMore
      events {
        __typename
        ... on MessageEvent { runId message timestamp level stepKey eventType }
        ... on ExecutionStepFailureEvent { error { message } }
        ... on RunFailureEvent { error { message } }
        ... on EngineEvent { error { message } }
        ... on MaterializationEvent { assetKey { path } }
        ... on ObservationEvent { assetKey { path } }
      }
    }
    ... on RunNotFoundError { message }
    ... on PythonError { message }
  }
}";

const RUN_STEPS_QUERY: &str = "
query RunStepsQuery($runId: ID!) {
  runOrError(runId: $runId) {
    __typename
    ... on Run {
      runId
      status
      stepStats { stepKey status startTime endTime attempts { startTime } }
    }
    ... on RunNotFoundError { message }
    ... on PythonError { message }
  }
}";

const DEPLOYMENTS_QUERY: &str = "
query DeploymentsQuery {
  fullDeployments { deploymentName deploymentId deploymentType }
}";

const TERMINATE_RUN_MUTATION: &str = "
mutation TerminateRun($runId: String!) {
  terminateRun(runId: $runId) {
    __typename
    ... on TerminateRunSuccess { run { runId status } }
    ... on TerminateRunFailure { message }
    ... on RunNotFoundError { message }
    ... on UnauthorizedError { message }
    ... on PythonError { message }
  }
}";

const DELETE_RUN_MUTATION: &str = "
mutation DeleteRun($runId: String!) {
  deletePipelineRun(runId: $runId) {
    __typename
    ... on DeletePipelineRunSuccess { runId }
    ... on RunNotFoundError { message }
    ... on UnauthorizedError { message }
    ... on PythonError { message }
  }
}";

/// A ready-to-send GraphQL request
#[derive(Debug, Clone, PartialEq)]
pub(super) struct GraphQlRequest {
    pub query: String,
    pub variables: Value,
}

impl GraphQlRequest {
    fn new(template: &str, variables: Value) -> Self {
        Self {
            query: template.replace("__RUN_FIELDS__", RUN_FIELDS),
            variables,
        }
    }
}

fn unsupported(operation: OperationId) -> BackendError {
    BackendError::Fatal(format!("operation '{}' is not supported here", operation))
}

fn parent_run(filters: &FilterSet) -> Result<&str, BackendError> {
    filters
        .parent
        .as_deref()
        .ok_or_else(|| BackendError::Fatal("missing run id for nested resource".into()))
}

pub(super) fn page_query(request: &PageRequest) -> Result<GraphQlRequest, BackendError> {
    let limit = request.page_size;
    let req = match request.operation {
        OperationId::RUNS_LIST => GraphQlRequest::new(
            RUNS_QUERY,
            json!({
                "filter": runs_filter(&request.filters),
                "cursor": request.cursor,
                "limit": limit,
            }),
        ),
        OperationId::RUNS_EVENTS => GraphQlRequest::new(
            RUN_EVENTS_QUERY,
            json!({
                "runId": parent_run(&request.filters)?,
                "afterCursor": request.cursor,
                "limit": limit,
            }),
        ),
        OperationId::RUNS_STEPS => GraphQlRequest::new(
            RUN_STEPS_QUERY,
            json!({ "runId": parent_run(&request.filters)? }),
        ),
        OperationId::DEPLOYMENTS_LIST => GraphQlRequest::new(DEPLOYMENTS_QUERY, json!({})),
        other => return Err(unsupported(other)),
    };
    Ok(req)
}

/// Push down what `RunsFilter` expresses exactly; the engine re-checks everything
fn runs_filter(filters: &FilterSet) -> Value {
    let mut filter = Map::new();

    for clause in filters.clauses() {
        match clause.field {
            "id" => {
                if let Some(ids) = clause.equals_values() {
                    filter.insert("runIds".into(), json!(ids));
                }
            }
            "status" => {
                if let Some(statuses) = clause.equals_values() {
                    filter.insert("statuses".into(), json!(statuses));
                }
            }
            "job" => {
                if let Some(values) = clause.equals_values()
                    && let [job] = values.as_slice()
                {
                    filter.insert("pipelineName".into(), json!(job));
                }
            }
            // Backend tag filters are AND'd, so only a single tag is exact
            "tag" => {
                if let Some(values) = clause.equals_values()
                    && let [pair] = values.as_slice()
                    && let Some((key, value)) = pair.split_once('=')
                {
                    filter.insert("tags".into(), json!([{ "key": key, "value": value }]));
                }
            }
            "created" => {
                if let Some((lower, upper)) = clause.range() {
                    if let Some(lower) = lower {
                        filter.insert("createdAfter".into(), json!(to_epoch_seconds(lower)));
                    }
                    if let Some(upper) = upper {
                        filter.insert("createdBefore".into(), json!(to_epoch_seconds(upper)));
                    }
                }
            }
            _ => {}
        }
    }

    if filter.is_empty() {
        Value::Null
    } else {
        Value::Object(filter)
    }
}

pub(super) fn parse_page(
    request: &PageRequest,
    data: &Value,
) -> Result<PageResponse, BackendError> {
    match request.operation {
        OperationId::RUNS_LIST => {
            let root = check_union(field(data, "runsOrError")?)?;
            let items = array(root, "results")?;
            // A full page means there may be more; the cursor is the last run id
            let has_more = !items.is_empty() && items.len() >= request.page_size;
            let next_cursor = if has_more {
                items
                    .last()
                    .and_then(|run| run.get("runId"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            } else {
                None
            };
            Ok(PageResponse {
                has_more: next_cursor.is_some(),
                next_cursor,
                items,
                terminal: false,
            })
        }
        OperationId::RUNS_EVENTS => {
            let run = check_union(field(data, "runOrError")?)?;
            let terminal = run
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|s| TERMINAL_RUN_STATUSES.contains(&s));
            let logs = check_union(field(data, "logsForRun")?)?;
            let next_cursor = logs
                .get("cursor")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| request.cursor.clone());
            Ok(PageResponse {
                items: array(logs, "events")?,
                next_cursor,
                has_more: logs.get("hasMore").and_then(Value::as_bool).unwrap_or(false),
                terminal,
            })
        }
        OperationId::RUNS_STEPS => {
            let run = check_union(field(data, "runOrError")?)?;
            let items = if request.cursor.is_some() {
                Vec::new()
            } else {
                array(run, "stepStats")?
            };
            Ok(PageResponse {
                items,
                next_cursor: None,
                has_more: false,
                terminal: true,
            })
        }
        OperationId::DEPLOYMENTS_LIST => {
            let items = if request.cursor.is_some() {
                Vec::new()
            } else {
                array(data, "fullDeployments")?
            };
            Ok(PageResponse {
                items,
                next_cursor: None,
                has_more: false,
                terminal: true,
            })
        }
        other => Err(unsupported(other)),
    }
}

pub(super) fn item_query(request: &ItemRequest) -> Result<GraphQlRequest, BackendError> {
    let template = match request.operation {
        OperationId::RUNS_VIEW => RUN_VIEW_QUERY,
        OperationId::RUNS_STATS => RUN_STATS_QUERY,
        other => return Err(unsupported(other)),
    };
    Ok(GraphQlRequest::new(template, json!({ "runId": request.id })))
}

pub(super) fn parse_item(data: &Value) -> Result<Value, BackendError> {
    check_union(field(data, "runOrError")?).cloned()
}

pub(super) fn mutation_query(request: &MutationRequest) -> Result<GraphQlRequest, BackendError> {
    let template = match request.operation {
        OperationId::RUNS_TERMINATE => TERMINATE_RUN_MUTATION,
        OperationId::RUNS_DELETE => DELETE_RUN_MUTATION,
        other => return Err(unsupported(other)),
    };
    Ok(GraphQlRequest::new(template, json!({ "runId": request.id })))
}

pub(super) fn parse_mutation(
    request: &MutationRequest,
    data: &Value,
) -> Result<Value, BackendError> {
    let root = match request.operation {
        OperationId::RUNS_TERMINATE => field(data, "terminateRun")?,
        OperationId::RUNS_DELETE => field(data, "deletePipelineRun")?,
        other => return Err(unsupported(other)),
    };
    check_union(root).cloned()
}

fn field<'a>(data: &'a Value, name: &str) -> Result<&'a Value, BackendError> {
    match data.get(name) {
        Some(Value::Null) | None => Err(BackendError::Fatal(format!(
            "no '{}' in backend response",
            name
        ))),
        Some(value) => Ok(value),
    }
}

fn array(value: &Value, name: &str) -> Result<Vec<Value>, BackendError> {
    match value.get(name) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(BackendError::Fatal(format!(
            "malformed backend response: '{}' is not a list",
            name
        ))),
    }
}

/// Classify GraphQL error unions by `__typename`
fn check_union(value: &Value) -> Result<&Value, BackendError> {
    let typename = value
        .get("__typename")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = || {
        value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string()
    };

    match typename {
        "RunNotFoundError" => Err(BackendError::NotFound(format!(
            "Run not found: {}",
            message()
        ))),
        "PythonError" => Err(BackendError::Fatal(format!("API Error: {}", message()))),
        "UnauthorizedError" => Err(BackendError::Fatal(format!("Unauthorized: {}", message()))),
        t if t.ends_with("Error") || t.ends_with("Failure") => {
            Err(BackendError::Fatal(format!("{}: {}", t, message())))
        }
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterTranslator, RawFilter};
    use crate::records::fixtures;
    use crate::registry::build_default_registry;
    use chrono::DateTime;

    fn runs_request(raw: &[RawFilter], page_size: usize) -> PageRequest {
        let registry = build_default_registry();
        let descriptor = registry.describe("run").unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        PageRequest {
            operation: OperationId::RUNS_LIST,
            filters: FilterTranslator::new(now)
                .translate(descriptor, None, raw)
                .unwrap(),
            cursor: None,
            page_size,
        }
    }

    #[test]
    fn test_runs_filter_pushdown() {
        let request = runs_request(
            &[
                RawFilter::values("status", "SUCCESS,FAILURE"),
                RawFilter::values("job", "etl"),
                RawFilter::values("tag", "team=data"),
                RawFilter::Range {
                    field: None,
                    since: Some("1h".into()),
                    until: None,
                },
            ],
            50,
        );
        let query = page_query(&request).unwrap();
        let filter = &query.variables["filter"];
        assert_eq!(filter["statuses"], json!(["SUCCESS", "FAILURE"]));
        assert_eq!(filter["pipelineName"], "etl");
        assert_eq!(filter["tags"], json!([{"key": "team", "value": "data"}]));
        assert_eq!(filter["createdAfter"], json!(1_699_996_400.0));
        assert_eq!(query.variables["limit"], 50);
        assert!(query.query.contains("runsOrError"));
        assert!(query.query.contains("canTerminate"));
    }

    #[test]
    fn test_patterns_and_multi_tags_are_not_pushed_down() {
        let request = runs_request(
            &[
                RawFilter::values("job", "etl_*"),
                RawFilter::values("tag", "a=1,b=2"),
            ],
            50,
        );
        let query = page_query(&request).unwrap();
        assert_eq!(query.variables["filter"], Value::Null);
    }

    #[test]
    fn test_runs_page_cursor_is_last_run_id() {
        let request = runs_request(&[], 2);
        let data = json!({"runsOrError": {
            "__typename": "Runs",
            "results": [fixtures::run("a", "SUCCESS"), fixtures::run("b", "FAILURE")],
        }});
        let page = parse_page(&request, &data).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("b"));
        assert!(page.has_more);

        let data = json!({"runsOrError": {"__typename": "Runs", "results": [fixtures::run("c", "SUCCESS")]}});
        let page = parse_page(&request, &data).unwrap();
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_events_page_reports_terminal_run() {
        let registry = build_default_registry();
        let descriptor = registry.describe("event").unwrap();
        let filters = FilterTranslator::new(chrono::Utc::now())
            .translate(descriptor, Some("r1"), &[])
            .unwrap();
        let request = PageRequest {
            operation: OperationId::RUNS_EVENTS,
            filters,
            cursor: Some("5".into()),
            page_size: 100,
        };
        let query = page_query(&request).unwrap();
        assert_eq!(query.variables["runId"], "r1");
        assert_eq!(query.variables["afterCursor"], "5");

        let data = json!({
            "runOrError": {"__typename": "Run", "status": "SUCCESS"},
            "logsForRun": {
                "__typename": "EventConnection",
                "cursor": "7",
                "hasMore": false,
                "events": [
                    fixtures::event("ExecutionStepStartEvent", "STEP_START", Some("a"), 1),
                    fixtures::event("RunSuccessEvent", "RUN_SUCCESS", None, 2),
                ],
            },
        });
        let page = parse_page(&request, &data).unwrap();
        assert!(page.terminal);
        assert!(!page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("7"));
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_error_unions_are_classified() {
        let not_found = json!({"runOrError": {
            "__typename": "RunNotFoundError",
            "message": "Run with id 'nonexistent' was not found",
        }});
        assert_eq!(
            parse_item(&not_found).unwrap_err(),
            BackendError::NotFound("Run not found: Run with id 'nonexistent' was not found".into())
        );

        let python = json!({"runOrError": {"__typename": "PythonError", "message": "Database connection failed"}});
        assert_eq!(
            parse_item(&python).unwrap_err(),
            BackendError::Fatal("API Error: Database connection failed".into())
        );

        assert!(matches!(
            parse_item(&json!({"runOrError": null})),
            Err(BackendError::Fatal(_))
        ));
    }

    #[test]
    fn test_terminate_failure_is_fatal() {
        let request = MutationRequest {
            operation: OperationId::RUNS_TERMINATE,
            id: "r1".into(),
        };
        let data = json!({"terminateRun": {"__typename": "TerminateRunFailure", "message": "not running"}});
        assert_eq!(
            parse_mutation(&request, &data).unwrap_err(),
            BackendError::Fatal("TerminateRunFailure: not running".into())
        );

        let ok = json!({"terminateRun": {"__typename": "TerminateRunSuccess", "run": {"runId": "r1", "status": "CANCELING"}}});
        assert_eq!(parse_mutation(&request, &ok).unwrap()["run"]["status"], "CANCELING");
    }

    #[test]
    fn test_view_query_is_not_a_page_operation() {
        let request = ItemRequest {
            operation: OperationId::RUNS_LIST,
            id: "r1".into(),
        };
        assert!(item_query(&request).is_err());
    }
}
