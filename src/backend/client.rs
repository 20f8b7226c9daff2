// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! GraphQL-over-HTTP backend
//!
//! Every session gets its own `reqwest::Client`, so no connection pool is
//! shared between a pager and anything else in the process. Failures are
//! classified here: transport errors, timeouts, 429 and 5xx are transient,
//! everything else (other HTTP errors, GraphQL `errors`, undecodable bodies)
//! is fatal.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::queries::{self, GraphQlRequest};
use super::recording::Recorder;
use super::{Backend, Connection, ItemRequest, MutationRequest, PageRequest, PageResponse};
use crate::error::BackendError;

const API_TOKEN_HEADER: &str = "Dagster-Cloud-Api-Token";
const DEPLOYMENT_HEADER: &str = "Dagster-Cloud-Deployment";

/// Connect timeout per session
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout; a timed out read is retried like any transient error
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GraphQlBackend {
    endpoint: String,
    deployment: Option<String>,
    api_token: Option<String>,
    recorder: Option<Arc<Recorder>>,
}

impl GraphQlBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            deployment: None,
            api_token: None,
            recorder: None,
        }
    }

    pub fn with_deployment(mut self, deployment: Option<String>) -> Self {
        self.deployment = deployment;
        self
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    pub fn with_recorder(mut self, recorder: Option<Recorder>) -> Self {
        self.recorder = recorder.map(Arc::new);
        self
    }
}

#[async_trait]
impl Backend for GraphQlBackend {
    async fn connect(&self) -> Result<Box<dyn Connection>, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("runq/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        debug!(endpoint = %self.endpoint, deployment = ?self.deployment, "Opened backend session");

        Ok(Box::new(GraphQlConnection {
            client,
            endpoint: self.endpoint.clone(),
            deployment: self.deployment.clone(),
            api_token: self.api_token.clone(),
            recorder: self.recorder.clone(),
        }))
    }
}

struct GraphQlConnection {
    client: reqwest::Client,
    endpoint: String,
    deployment: Option<String>,
    api_token: Option<String>,
    recorder: Option<Arc<Recorder>>,
}

impl GraphQlConnection {
    /// POST one document and return its `data` object
    async fn execute(&self, operation: &str, request: GraphQlRequest) -> Result<Value, BackendError> {
        let body = json!({
            "query": request.query,
            "variables": request.variables,
        });

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(ref token) = self.api_token {
            http = http.header(API_TOKEN_HEADER, token);
        }
        if let Some(ref deployment) = self.deployment {
            http = http.header(DEPLOYMENT_HEADER, deployment);
        }

        trace!(operation = %operation, variables = %request.variables, "Sending GraphQL request");

        let response = http.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("undecodable backend response: {}", e)))?;

        if let Some(ref recorder) = self.recorder
            && let Err(e) = recorder.record(operation, &request.query, &request.variables, &payload)
        {
            warn!(operation = %operation, error = %e, "Failed to record exchange");
        }

        graphql_data(payload)
    }
}

#[async_trait]
impl Connection for GraphQlConnection {
    async fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, BackendError> {
        let query = queries::page_query(request)?;
        let data = self.execute(request.operation.name(), query).await?;
        queries::parse_page(request, &data)
    }

    async fn fetch_one(&mut self, request: &ItemRequest) -> Result<Value, BackendError> {
        let query = queries::item_query(request)?;
        let data = self.execute(request.operation.name(), query).await?;
        queries::parse_item(&data)
    }

    async fn mutate(&mut self, request: &MutationRequest) -> Result<Value, BackendError> {
        let query = queries::mutation_query(request)?;
        let data = self.execute(request.operation.name(), query).await?;
        queries::parse_mutation(request, &data)
    }
}

/// Check if an HTTP status is worth retrying
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };
    if is_retryable_status(status) {
        BackendError::Transient(message)
    } else {
        BackendError::Fatal(message)
    }
}

fn classify_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_builder() {
        BackendError::Fatal(format!("invalid request: {}", err))
    } else if err.is_timeout() {
        BackendError::Transient(format!("request timed out: {}", err))
    } else {
        BackendError::Transient(format!("transport error: {}", err))
    }
}

/// Unwrap a GraphQL response body into its `data` object
fn graphql_data(mut payload: Value) -> Result<Value, BackendError> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect();
        return Err(BackendError::Fatal(format!(
            "GraphQL error: {}",
            if messages.is_empty() {
                "unknown error".to_string()
            } else {
                messages.join("; ")
            }
        )));
    }

    match payload.get_mut("data").map(Value::take) {
        Some(Value::Null) | None => Err(BackendError::Fatal(
            "No data returned from API".to_string(),
        )),
        Some(data) => Ok(data),
    }
}
