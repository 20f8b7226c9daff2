// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Command dispatcher
//!
//! Resolves `<noun> <verb> [id]` against the registry, translates filters,
//! then picks the execution path:
//!
//! - bounded `list` through a [`CursorPager`]
//! - `list --follow` through a [`StreamFollower`]
//! - `view`/`stats` as a single retried read
//! - `terminate`/`delete` as a single, never retried, mutation
//!
//! Records go to the [`Renderer`]; status chatter goes to the progress
//! channel. Errors are returned, never written to the record stream.

use futures::TryStreamExt;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ItemRequest, MutationRequest};
use crate::error::{EngineError, UserInputError};
use crate::filter::{FilterSet, FilterTranslator, RawFilter};
use crate::follow::StreamFollower;
use crate::output::{OutputMode, Renderer};
use crate::pager::{BackoffPolicy, CursorPager, PageCursor, PagerOptions};
use crate::progress::{Diagnostic, ProgressHandle, create_spinner};
use crate::records::display::columns_for;
use crate::records::{normalize, normalize_outcome};
use crate::registry::{OperationId, ResourceDescriptor, ResourceRegistry, Verb};

/// One command line, already parsed but not yet validated
#[derive(Debug, Clone)]
pub struct Invocation {
    pub noun: String,
    pub verb: String,
    pub id: Option<String>,
    pub filters: Vec<RawFilter>,
    pub limit: Option<usize>,
    pub page_size: usize,
    pub cursor: Option<String>,
    pub follow: bool,
    pub poll_interval: Duration,
}

impl Invocation {
    pub fn new(noun: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            noun: noun.into(),
            verb: verb.into(),
            id: None,
            filters: Vec::new(),
            limit: None,
            page_size: crate::pager::DEFAULT_PAGE_SIZE,
            cursor: None,
            follow: false,
            poll_interval: crate::follow::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A fully validated command
#[derive(Debug)]
pub struct Plan<'r> {
    pub target: &'r ResourceDescriptor,
    /// One of list, view, terminate, delete
    pub verb: Verb,
    /// Run id for view/mutations, parent run for nested lists
    pub id: Option<String>,
    pub filters: FilterSet,
    pub start: Option<PageCursor>,
    pub follow: bool,
}

pub struct Dispatcher<'a> {
    registry: &'a ResourceRegistry,
    backend: &'a dyn Backend,
    translator: FilterTranslator,
    policy: BackoffPolicy,
    progress: ProgressHandle,
    cancel: CancellationToken,
    show_spinner: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        registry: &'a ResourceRegistry,
        backend: &'a dyn Backend,
        translator: FilterTranslator,
        policy: BackoffPolicy,
        progress: ProgressHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backend,
            translator,
            policy,
            progress,
            cancel,
            show_spinner: false,
        }
    }

    /// Show a spinner on stderr while human-mode bounded commands fetch
    pub fn with_spinner(mut self, enabled: bool) -> Self {
        self.show_spinner = enabled;
        self
    }

    /// Validate an invocation without touching the backend
    pub fn resolve(&self, inv: &Invocation) -> Result<Plan<'a>, UserInputError> {
        let descriptor = self.registry.describe(&inv.noun)?;
        let verb = self.registry.resolve_verb(&inv.noun, &inv.verb)?;
        let id = inv.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let missing_id = || UserInputError::MissingId {
            noun: descriptor.noun.to_string(),
            verb: verb.as_str().to_string(),
        };

        let (target, verb, id) = match verb.nested_noun() {
            Some(nested) => {
                let target = self.registry.describe(nested)?;
                let inner = if target.supports(Verb::List) {
                    Verb::List
                } else {
                    Verb::View
                };
                (target, inner, Some(id.ok_or_else(missing_id)?))
            }
            None => match verb {
                Verb::List if descriptor.requires_parent => {
                    (descriptor, verb, Some(id.ok_or_else(missing_id)?))
                }
                Verb::List => {
                    if id.is_some() {
                        return Err(UserInputError::UnexpectedId {
                            noun: descriptor.noun.to_string(),
                            verb: verb.as_str().to_string(),
                        });
                    }
                    (descriptor, verb, None)
                }
                _ => (descriptor, verb, Some(id.ok_or_else(missing_id)?)),
            },
        };

        if inv.follow && !(verb == Verb::List && target.followable) {
            return Err(UserInputError::FollowUnsupported {
                noun: target.noun.to_string(),
            });
        }
        if verb != Verb::List {
            if !inv.filters.is_empty() || inv.cursor.is_some() {
                return Err(UserInputError::InvalidArgument(format!(
                    "'{} {}' does not accept filters or --cursor",
                    descriptor.noun,
                    inv.verb
                )));
            }
            if inv.limit.is_some() {
                return Err(UserInputError::InvalidArgument(format!(
                    "'{} {}' does not accept --limit",
                    descriptor.noun, inv.verb
                )));
            }
        }
        if inv.page_size == 0 {
            return Err(UserInputError::InvalidArgument(
                "--page-size must be at least 1".to_string(),
            ));
        }

        let parent = if verb == Verb::List { id } else { None };
        let filters = self.translator.translate(target, parent, &inv.filters)?;
        let start = inv
            .cursor
            .as_deref()
            .map(|c| PageCursor::resume(c, &filters))
            .transpose()?;

        Ok(Plan {
            target,
            verb,
            id: id.map(str::to_string),
            filters,
            start,
            follow: inv.follow,
        })
    }

    /// Run one invocation to completion, writing records to `renderer`
    pub async fn execute<W: Write>(
        &self,
        inv: &Invocation,
        renderer: &mut Renderer<W>,
    ) -> Result<(), EngineError> {
        let plan = self.resolve(inv)?;
        info!(
            noun = %plan.target.noun,
            verb = %plan.verb.as_str(),
            id = ?plan.id,
            filters = plan.filters.predicates.len(),
            follow = plan.follow,
            now = %self.translator.now(),
            "Dispatching command"
        );

        match plan.verb {
            Verb::List if plan.follow => self.follow(plan, inv, renderer).await,
            Verb::List => self.list(plan, inv, renderer).await,
            Verb::View => self.view(plan, renderer).await,
            verb if verb.is_mutation() => self.mutate(plan, renderer).await,
            other => Err(EngineError::Fatal {
                message: format!("verb '{}' cannot be executed directly", other.as_str()),
                attempts: 0,
            }),
        }
    }

    fn open_pager(&self, plan: Plan<'a>, inv: &Invocation) -> Result<CursorPager<'a>, EngineError> {
        CursorPager::open(
            self.backend,
            plan.target,
            plan.filters,
            PagerOptions {
                page_size: inv.page_size,
                limit: inv.limit,
                start: plan.start,
            },
            self.policy,
            self.progress.clone(),
            self.cancel.clone(),
        )
    }

    async fn list<W: Write>(
        &self,
        plan: Plan<'a>,
        inv: &Invocation,
        renderer: &mut Renderer<W>,
    ) -> Result<(), EngineError> {
        let kind = plan.target.record_kind;
        let noun = plan.target.noun;
        let mut pager = self.open_pager(plan, inv)?;

        let spinner = (self.show_spinner && renderer.mode() == OutputMode::Human)
            .then(|| create_spinner(&format!("Fetching {} records...", noun)));
        self.progress.attach_spinner(spinner.clone());
        let mut progress_rx = self.progress.subscribe();

        let result = {
            let work = drain(&mut pager, renderer);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    biased;
                    update = progress_rx.recv(), if spinner.is_some() => {
                        if let (Ok(update), Some(spinner)) = (update, &spinner) {
                            spinner.set_message(self.spinner_message(noun, &update));
                        }
                    }
                    result = &mut work => break result,
                }
            }
        };

        self.progress.attach_spinner(None);
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        match result {
            Ok(()) => {
                renderer.finish(columns_for(kind))?;
                if let Some(cursor) = pager.resume_cursor() {
                    self.progress.next_cursor(&cursor.to_string());
                }
                Ok(())
            }
            Err(e) => {
                // Show what was gathered before the failure
                if renderer.mode() == OutputMode::Human && renderer.emitted() > 0 {
                    renderer.finish(columns_for(kind))?;
                }
                Err(e)
            }
        }
    }

    fn spinner_message(&self, noun: &str, update: &Diagnostic) -> String {
        match update {
            Diagnostic::PageFetched { .. } => {
                let (pages, records) = self.progress.progress();
                format!("Fetched {} {} records ({} pages)...", records, noun, pages)
            }
            other => other
                .message()
                .unwrap_or_else(|| format!("Fetching {} records...", noun)),
        }
    }

    async fn follow<W: Write>(
        &self,
        plan: Plan<'a>,
        inv: &Invocation,
        renderer: &mut Renderer<W>,
    ) -> Result<(), EngineError> {
        let noun = plan.target.noun;
        let pager = self.open_pager(plan, inv)?;
        let mut follower = StreamFollower::new(
            pager,
            noun,
            inv.poll_interval,
            self.policy,
            self.progress.clone(),
            self.cancel.clone(),
        );
        let termination = follower
            .run(|record| renderer.stream_item(&record).map_err(EngineError::from))
            .await?;
        debug!(noun = %noun, delivered = follower.session().delivered, "Follow finished");
        termination.into_result()
    }

    async fn view<W: Write>(&self, plan: Plan<'a>, renderer: &mut Renderer<W>) -> Result<(), EngineError> {
        let operation = required_operation(plan.target, Verb::View)?;
        let id = plan.id.unwrap_or_default();
        let raw = self.fetch_item(operation, &id).await?;
        let record = normalize(plan.target.record_kind, &raw, Some(&id))
            .map_err(|e| EngineError::from_backend(e, 1))?;
        debug!(kind = record.kind_name(), id = %id, "Fetched item");
        renderer.view(&record)?;
        Ok(())
    }

    /// Single-item read, retried on transient failures like a page fetch
    async fn fetch_item(&self, operation: OperationId, id: &str) -> Result<serde_json::Value, EngineError> {
        let request = ItemRequest {
            operation,
            id: id.to_string(),
        };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                result = async {
                    self.progress.connecting(operation.name());
                    let mut conn = self.backend.connect().await?;
                    conn.fetch_one(&request).await
                } => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.policy.allows_retry(attempt) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        operation = %operation,
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
                        _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
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

    async fn mutate<W: Write>(&self, plan: Plan<'a>, renderer: &mut Renderer<W>) -> Result<(), EngineError> {
        let operation = required_operation(plan.target, plan.verb)?;
        let id = plan.id.unwrap_or_default();
        let request = MutationRequest {
            operation,
            id: id.clone(),
        };
        info!(operation = %operation, run_id = %id, "Sending mutation");

        // Mutations are not idempotent; one attempt only
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = async {
                let mut conn = self.backend.connect().await?;
                conn.mutate(&request).await
            } => result,
        };
        let raw = result.map_err(|e| EngineError::from_backend(e, 1))?;
        let outcome = normalize_outcome(plan.verb.as_str(), &id, &raw);
        renderer.view(&crate::records::NormalizedRecord::Outcome(outcome))?;
        Ok(())
    }
}

fn required_operation(target: &ResourceDescriptor, verb: Verb) -> Result<OperationId, EngineError> {
    target.operation_for(verb).ok_or_else(|| EngineError::Fatal {
        message: format!(
            "resource '{}' has no backend operation for '{}'",
            target.noun,
            verb.as_str()
        ),
        attempts: 0,
    })
}

/// Hand every record of a bounded list to the renderer
async fn drain<W: Write>(
    pager: &mut CursorPager<'_>,
    renderer: &mut Renderer<W>,
) -> Result<(), EngineError> {
    let result = async {
        let records = pager.records();
        tokio::pin!(records);
        while let Some(record) = records.try_next().await? {
            renderer.list_item(&record)?;
        }
        Ok::<_, EngineError>(())
    }
    .await;
    if result.is_err() {
        pager.close();
    }
    result
}
