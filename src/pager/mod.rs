// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cursor pager
//!
//! Drives sequential page fetches over one collection and exposes them as a
//! lazy sequence of normalized records:
//!
//! - pages come back in backend order and are never reordered
//! - a transient failure retries the *same* cursor with exponential backoff;
//!   a page is never skipped
//! - identities already delivered in this session are suppressed
//! - the backend connection is acquired on first fetch and released on
//!   exhaustion, error, cancellation or drop
//!
//! `page_size` only changes how many round trips are made, never what is
//! delivered.

mod backoff;
mod cursor;

pub use backoff::BackoffPolicy;
pub use cursor::PageCursor;

use futures::{Stream, TryStreamExt};
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, Connection, PageRequest, PageResponse};
use crate::error::{BackendError, EngineError};
use crate::filter::FilterSet;
use crate::progress::ProgressHandle;
use crate::records::{NormalizedRecord, format_json_value, get_nested_value, normalize};
use crate::registry::{OperationId, ResourceDescriptor};

/// Default number of items requested per round trip
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct PagerOptions {
    pub page_size: usize,
    /// Stop after this many records
    pub limit: Option<usize>,
    /// Resume point from `--cursor`
    pub start: Option<PageCursor>,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            limit: None,
            start: None,
        }
    }
}

/// One delivered page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<NormalizedRecord>,
    /// Where to resume after this page; `None` once the collection is exhausted
    pub cursor: Option<PageCursor>,
}

/// Result of a single follow poll
#[derive(Debug, Clone, PartialEq)]
pub struct Poll {
    pub records: Vec<NormalizedRecord>,
    pub has_more: bool,
    pub terminal: bool,
}

pub struct CursorPager<'a> {
    backend: &'a dyn Backend,
    descriptor: &'a ResourceDescriptor,
    operation: OperationId,
    filters: FilterSet,
    fingerprint: String,
    options: PagerOptions,
    policy: BackoffPolicy,
    progress: ProgressHandle,
    cancel: CancellationToken,
    connection: Option<Box<dyn Connection>>,
    /// Backend token for the next fetch; advanced only after a successful one
    cursor: Option<String>,
    seen: HashSet<String>,
    delivered: usize,
    pages: u32,
    done: bool,
    more_available: bool,
}

impl<'a> CursorPager<'a> {
    /// Prepare a session; nothing is fetched until [`next`](Self::next) or [`poll`](Self::poll)
    pub fn open(
        backend: &'a dyn Backend,
        descriptor: &'a ResourceDescriptor,
        filters: FilterSet,
        options: PagerOptions,
        policy: BackoffPolicy,
        progress: ProgressHandle,
        cancel: CancellationToken,
    ) -> Result<Self, EngineError> {
        let operation = descriptor.operations.list.ok_or_else(|| EngineError::Fatal {
            message: format!("resource '{}' has no list operation", descriptor.noun),
            attempts: 0,
        })?;
        let fingerprint = filters.fingerprint();
        let cursor = options.start.as_ref().map(|c| c.token.clone());

        Ok(Self {
            backend,
            descriptor,
            operation,
            filters,
            fingerprint,
            options,
            policy,
            progress,
            cancel,
            connection: None,
            cursor,
            seen: HashSet::new(),
            delivered: 0,
            pages: 0,
            done: false,
            more_available: false,
        })
    }

    #[cfg(test)]
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Cursor to continue from when the session stopped early
    pub fn resume_cursor(&self) -> Option<PageCursor> {
        if !self.more_available {
            return None;
        }
        self.cursor
            .as_ref()
            .map(|token| PageCursor::new(self.fingerprint.clone(), token.clone()))
    }

    /// Current backend position, for follow sessions
    pub fn position(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    fn remaining(&self) -> Option<usize> {
        self.options
            .limit
            .map(|limit| limit.saturating_sub(self.delivered))
    }

    /// `--limit` records have been delivered
    pub fn limit_reached(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// Release the connection and refuse further fetches
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!(resource = %self.descriptor.noun, pages = self.pages, "Released backend session");
        }
        self.done = true;
    }

    /// Drop the connection but keep the session; the next fetch reconnects
    pub fn reset_connection(&mut self) {
        self.connection = None;
    }

    async fn connection(&mut self) -> Result<&mut Box<dyn Connection>, BackendError> {
        if self.connection.is_none() {
            self.progress.connecting(self.descriptor.noun);
            self.connection = Some(self.backend.connect().await?);
        }
        match self.connection.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(BackendError::Fatal("backend session unavailable".into())),
        }
    }

    fn request(&self, page_size: usize) -> PageRequest {
        PageRequest {
            operation: self.operation,
            filters: self.filters.clone(),
            cursor: self.cursor.clone(),
            page_size,
        }
    }

    /// One fetch at the current cursor, no retry and no cancellation check
    async fn fetch_once(&mut self, page_size: usize) -> Result<PageResponse, BackendError> {
        let request = self.request(page_size);
        let result = match self.connection().await {
            Ok(conn) => conn.fetch_page(&request).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result
            && e.is_transient()
        {
            // The session may be poisoned; reconnect on the next attempt
            self.connection = None;
        }
        result
    }

    /// Fetch the page at the current cursor, retrying transient failures
    async fn fetch_with_retry(&mut self, page_size: usize) -> Result<PageResponse, EngineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let cancel = self.cancel.clone();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = self.fetch_once(page_size) => result,
            };

            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && self.policy.allows_retry(attempt) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        resource = %self.descriptor.noun,
                        cursor = ?self.cursor,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable error, backing off"
                    );
                    self.progress.retrying(
                        attempt,
                        self.policy.max_attempts,
                        delay.as_millis() as u64,
                        &e.to_string(),
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        self.progress.giving_up(attempt, &e.to_string());
                    }
                    return Err(EngineError::from_backend(e, attempt));
                }
            }
        }
    }

    /// Filter, dedupe and normalize the raw items of one page
    fn accept(&mut self, items: Vec<Value>) -> Result<Vec<NormalizedRecord>, BackendError> {
        let parent = self.filters.parent.clone();
        let mut records = Vec::with_capacity(items.len());

        for item in items {
            if !self.filters.matches(self.descriptor, &item) {
                continue;
            }
            if let Some(path) = self.descriptor.identity_path
                && let Some(identity) = format_json_value(&get_nested_value(&item, path))
                && !self.seen.insert(identity.clone())
            {
                debug!(resource = %self.descriptor.noun, identity = %identity, "Suppressed duplicate record");
                continue;
            }
            if self.remaining().is_some_and(|r| records.len() >= r) {
                break;
            }
            records.push(normalize(
                self.descriptor.record_kind,
                &item,
                parent.as_deref(),
            )?);
        }

        self.delivered += records.len();
        Ok(records)
    }

    /// Fetch the next page of a bounded sequence; `None` once exhausted
    pub async fn next(&mut self) -> Result<Option<Page>, EngineError> {
        if self.done {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            self.close();
            return Err(EngineError::Cancelled);
        }

        let page_size = match self.remaining() {
            Some(0) => {
                self.close();
                return Ok(None);
            }
            Some(remaining) => self.options.page_size.min(remaining).max(1),
            None => self.options.page_size.max(1),
        };

        let response = match self.fetch_with_retry(page_size).await {
            Ok(response) => response,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        self.pages += 1;
        let raw_count = response.items.len();
        let records = match self.accept(response.items) {
            Ok(records) => records,
            Err(e) => {
                self.close();
                return Err(EngineError::from_backend(e, 1));
            }
        };

        debug!(
            resource = %self.descriptor.noun,
            page = self.pages,
            items_this_page = raw_count,
            delivered = records.len(),
            total_so_far = self.delivered,
            "Fetched page"
        );
        self.progress
            .page_fetched(self.descriptor.noun, self.pages, records.len());

        let exhausted = match (&response.next_cursor, response.has_more) {
            (Some(next), true) => {
                if self.cursor.as_deref() == Some(next.as_str()) && raw_count == 0 {
                    warn!(resource = %self.descriptor.noun, cursor = %next, "Backend did not advance cursor, stopping");
                    true
                } else {
                    self.cursor = Some(next.clone());
                    false
                }
            }
            _ => true,
        };

        self.more_available = !exhausted;
        if exhausted || self.remaining() == Some(0) {
            self.close();
        }

        Ok(Some(Page {
            records,
            cursor: self.resume_cursor(),
        }))
    }

    /// Single unretried fetch for follow sessions
    ///
    /// The cursor advances only when the fetch succeeds, so a failed poll is
    /// repeated from the same position. Retry and cancellation belong to the
    /// caller.
    pub async fn poll(&mut self) -> Result<Poll, BackendError> {
        let page_size = match self.remaining() {
            Some(remaining) => self.options.page_size.min(remaining).max(1),
            None => self.options.page_size.max(1),
        };
        let response = self.fetch_once(page_size).await?;

        self.pages += 1;
        if let Some(next) = response.next_cursor {
            self.cursor = Some(next);
        }
        let raw_count = response.items.len();
        let records = self.accept(response.items)?;

        debug!(
            resource = %self.descriptor.noun,
            cursor = ?self.cursor,
            items_this_page = raw_count,
            delivered = records.len(),
            terminal = response.terminal,
            "Polled stream"
        );
        self.progress
            .page_fetched(self.descriptor.noun, self.pages, records.len());

        Ok(Poll {
            records,
            has_more: response.has_more,
            terminal: response.terminal,
        })
    }

    /// The remaining sequence as a lazy stream of records
    pub fn records(&mut self) -> impl Stream<Item = Result<NormalizedRecord, EngineError>> + '_ {
        futures::stream::try_unfold(self, |pager| async move {
            match pager.next().await? {
                Some(page) => {
                    let records = page.records.into_iter().map(Ok::<_, EngineError>);
                    Ok::<_, EngineError>(Some((futures::stream::iter(records), pager)))
                }
                None => Ok(None),
            }
        })
        .try_flatten()
    }
}
