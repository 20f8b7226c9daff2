// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Remote backend contract
//!
//! The engine never speaks GraphQL directly. It asks a [`Backend`] for a
//! session-scoped [`Connection`] and issues typed page, item and mutation
//! requests through it. The connection is owned by exactly one pager or
//! follower and dropped on every exit path.

mod client;
#[cfg(test)]
pub mod fake;
mod queries;
pub mod recording;

pub use client::GraphQlBackend;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BackendError;
use crate::filter::FilterSet;
use crate::registry::OperationId;

/// One page of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub operation: OperationId,
    pub filters: FilterSet,
    /// Opaque backend token; `None` starts from the beginning
    pub cursor: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResponse {
    pub items: Vec<Value>,
    /// Token to resume after the last item of this page
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// The watched resource reached a terminal state; no new items will appear
    pub terminal: bool,
}

/// A single item by id (run view, run stats)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    pub operation: OperationId,
    pub id: String,
}

/// A state-changing request (terminate, delete)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub operation: OperationId,
    pub id: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a session; each pager or follower gets its own
    async fn connect(&self) -> Result<Box<dyn Connection>, BackendError>;
}

#[async_trait]
pub trait Connection: Send {
    async fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, BackendError>;

    async fn fetch_one(&mut self, request: &ItemRequest) -> Result<Value, BackendError>;

    async fn mutate(&mut self, request: &MutationRequest) -> Result<Value, BackendError>;
}
