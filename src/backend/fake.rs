// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Scriptable in-memory backend for engine tests
//!
//! Serves either a fixed item list paged by index (`"0"`, `"1"`, ... as
//! cursors) or a queue of scripted page responses. Counts fetches and live
//! connections so tests can observe that cancelled sessions stop fetching and
//! release their connection.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Backend, Connection, ItemRequest, MutationRequest, PageRequest, PageResponse};
use crate::error::BackendError;

enum Source {
    /// Index-paged items; `stream` cursors always advance like an event log
    Items {
        items: Vec<Value>,
        terminal: bool,
        stream: bool,
    },
    Scripted(VecDeque<Result<PageResponse, BackendError>>),
}

struct State {
    source: Source,
    fail_on: HashMap<usize, BackendError>,
    fail_from: Option<(usize, BackendError)>,
    requests: Vec<PageRequest>,
    mutations: Vec<MutationRequest>,
}

#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
    fetches: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl FakeBackend {
    fn with_source(source: Source) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                source,
                fail_on: HashMap::new(),
                fail_from: None,
                requests: Vec::new(),
                mutations: Vec::new(),
            })),
            fetches: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A finite collection; the cursor disappears on the last page
    pub fn collection(items: Vec<Value>) -> Self {
        Self::with_source(Source::Items {
            items,
            terminal: true,
            stream: false,
        })
    }

    /// An event log; the cursor always points past the last delivered item
    pub fn stream(items: Vec<Value>, terminal: bool) -> Self {
        Self::with_source(Source::Items {
            items,
            terminal,
            stream: true,
        })
    }

    pub fn scripted(pages: Vec<Result<PageResponse, BackendError>>) -> Self {
        Self::with_source(Source::Scripted(pages.into()))
    }

    /// Fail the `n`th fetch (1-based)
    pub fn fail_fetch(self, n: usize, err: BackendError) -> Self {
        self.state.lock().unwrap().fail_on.insert(n, err);
        self
    }

    /// Fail every fetch from the `n`th on
    pub fn fail_from(self, n: usize, err: BackendError) -> Self {
        self.state.lock().unwrap().fail_from = Some((n, err));
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Cursors of every page request, in order
    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|r| r.cursor.clone())
            .collect()
    }

    pub fn requested_page_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|r| r.page_size)
            .collect()
    }

    pub fn mutations(&self) -> Vec<MutationRequest> {
        self.state.lock().unwrap().mutations.clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn connect(&self) -> Result<Box<dyn Connection>, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            backend: self.clone(),
        }))
    }
}

struct FakeConnection {
    backend: FakeBackend,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.backend.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeConnection {
    /// Count the fetch and return the injected failure, if any
    fn injected_failure(&self, state: &mut State) -> Option<BackendError> {
        let n = self.backend.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = state.fail_on.remove(&n) {
            return Some(err);
        }
        match &state.fail_from {
            Some((from, err)) if n >= *from => Some(err.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn fetch_page(&mut self, request: &PageRequest) -> Result<PageResponse, BackendError> {
        let mut state = self.backend.state.lock().unwrap();
        state.requests.push(request.clone());
        if let Some(err) = self.injected_failure(&mut state) {
            return Err(err);
        }

        match &mut state.source {
            Source::Items {
                items,
                terminal,
                stream,
            } => {
                let start: usize = match &request.cursor {
                    Some(c) => c
                        .parse()
                        .map_err(|_| BackendError::Fatal(format!("bad cursor {c}")))?,
                    None => 0,
                };
                let start = start.min(items.len());
                let end = (start + request.page_size.max(1)).min(items.len());
                let has_more = end < items.len();
                let next_cursor = if *stream || has_more {
                    Some(end.to_string())
                } else {
                    None
                };
                Ok(PageResponse {
                    items: items[start..end].to_vec(),
                    next_cursor,
                    has_more,
                    terminal: *terminal,
                })
            }
            Source::Scripted(pages) => pages.pop_front().unwrap_or_else(|| {
                Ok(PageResponse {
                    items: Vec::new(),
                    next_cursor: request.cursor.clone(),
                    has_more: false,
                    terminal: true,
                })
            }),
        }
    }

    async fn fetch_one(&mut self, request: &ItemRequest) -> Result<Value, BackendError> {
        let mut state = self.backend.state.lock().unwrap();
        if let Some(err) = self.injected_failure(&mut state) {
            return Err(err);
        }
        let found = match &state.source {
            Source::Items { items, .. } => items
                .iter()
                .find(|item| item.get("runId").and_then(Value::as_str) == Some(request.id.as_str()))
                .cloned(),
            Source::Scripted(_) => None,
        };
        found.ok_or_else(|| BackendError::NotFound(format!("Run not found: {}", request.id)))
    }

    async fn mutate(&mut self, request: &MutationRequest) -> Result<Value, BackendError> {
        let mut state = self.backend.state.lock().unwrap();
        state.mutations.push(request.clone());
        if let Some(err) = self.injected_failure(&mut state) {
            return Err(err);
        }
        Ok(json!({"__typename": "TerminateRunSuccess", "run": {"runId": request.id, "status": "CANCELING"}}))
    }
}
