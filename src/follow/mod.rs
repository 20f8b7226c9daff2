// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Stream follower for `--follow`
//!
//! An explicit state machine over a [`CursorPager`] session. The transition
//! methods (`on_page`, `on_failure`, `on_tick`, `cancel`) are synchronous and
//! never sleep; [`StreamFollower::run`] is the only place that suspends, on
//! either a fetch, a poll interval or a backoff delay, and every suspension
//! also watches the cancellation token.
//!
//! Records are deduplicated by cursor: the pager only advances its cursor
//! after a successful poll, so a failed poll is repeated from the last
//! acknowledged position and nothing is delivered twice.

mod state;

pub use state::{Action, FollowState, StreamSession, Termination};

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BackendError, EngineError};
use crate::pager::{BackoffPolicy, CursorPager, Poll};
use crate::progress::ProgressHandle;
use crate::records::NormalizedRecord;

/// Default delay between polls once the stream is drained
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct StreamFollower<'a> {
    pager: CursorPager<'a>,
    resource: &'static str,
    state: FollowState,
    session: StreamSession,
    poll_interval: Duration,
    policy: BackoffPolicy,
    progress: ProgressHandle,
    cancel: CancellationToken,
}

impl<'a> StreamFollower<'a> {
    pub fn new(
        pager: CursorPager<'a>,
        resource: &'static str,
        poll_interval: Duration,
        policy: BackoffPolicy,
        progress: ProgressHandle,
        cancel: CancellationToken,
    ) -> Self {
        let session = StreamSession {
            cursor: pager.position().map(str::to_string),
            ..StreamSession::default()
        };
        Self {
            pager,
            resource,
            state: FollowState::Idle,
            session,
            poll_interval,
            policy,
            progress,
            cancel,
        }
    }

    pub fn state(&self) -> &FollowState {
        &self.state
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn next_action(&self) -> Action {
        match &self.state {
            FollowState::Idle | FollowState::Polling => Action::Poll,
            FollowState::Waiting => Action::Sleep(self.poll_interval),
            FollowState::Backoff { delay, .. } => Action::Sleep(*delay),
            FollowState::Terminated(t) => Action::Stop(t.clone()),
        }
    }

    fn terminate(&mut self, termination: Termination) {
        if matches!(self.state, FollowState::Terminated(_)) {
            return;
        }
        match &termination {
            Termination::Done => self.progress.stream_completed(self.resource),
            Termination::Cancelled => self.progress.cancelled(),
            Termination::Fatal { .. } | Termination::NotFound(_) => {}
        }
        debug!(resource = %self.resource, termination = ?termination, polls = self.session.polls, "Follow session terminated");
        self.pager.close();
        self.state = FollowState::Terminated(termination);
    }

    /// A poll succeeded and its records were delivered
    pub fn on_page(&mut self, poll: &Poll) {
        if matches!(self.state, FollowState::Terminated(_)) {
            return;
        }
        if self.session.consecutive_failures > 0 {
            info!(
                resource = %self.resource,
                after_failures = self.session.consecutive_failures,
                "Reconnected"
            );
            self.progress.reconnected(self.session.consecutive_failures);
        }
        self.session.consecutive_failures = 0;
        self.session.last_success = Some(Instant::now());
        self.session.cursor = self.pager.position().map(str::to_string);
        self.session.polls += 1;

        // The limit ends the session even if the backend has more
        let done = self.pager.limit_reached() || (poll.terminal && !poll.has_more);
        if done {
            self.terminate(Termination::Done);
            return;
        }
        self.state = if poll.has_more {
            FollowState::Polling
        } else {
            FollowState::Waiting
        };
    }

    /// A poll failed; transient failures back off, anything else terminates
    pub fn on_failure(&mut self, err: BackendError) {
        if matches!(self.state, FollowState::Terminated(_)) {
            return;
        }
        match err {
            BackendError::Transient(message) => {
                self.session.consecutive_failures += 1;
                let failures = self.session.consecutive_failures;
                if !self.policy.allows_retry(failures) {
                    warn!(resource = %self.resource, attempts = failures, error = %message, "Giving up on stream");
                    self.progress.giving_up(failures, &message);
                    self.terminate(Termination::Fatal {
                        message,
                        attempts: failures,
                    });
                    return;
                }
                let delay = self.policy.delay_for(failures);
                warn!(
                    resource = %self.resource,
                    cursor = ?self.session.cursor,
                    attempt = failures,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Stream fetch failed, reconnecting"
                );
                self.progress
                    .reconnecting(failures, delay.as_millis() as u64, &message);
                self.pager.reset_connection();
                self.state = FollowState::Backoff { failures, delay };
            }
            BackendError::Fatal(message) => self.terminate(Termination::Fatal {
                message,
                attempts: self.session.consecutive_failures + 1,
            }),
            BackendError::NotFound(message) => self.terminate(Termination::NotFound(message)),
        }
    }

    /// A poll interval or backoff delay elapsed
    pub fn on_tick(&mut self) {
        if matches!(self.state, FollowState::Waiting | FollowState::Backoff { .. }) {
            self.state = FollowState::Polling;
        }
    }

    pub fn cancel(&mut self) {
        self.terminate(Termination::Cancelled);
    }

    /// Drive the session until it terminates, handing each record to `deliver`
    ///
    /// `deliver` failing (typically a closed stdout) ends the session with
    /// that error.
    pub async fn run<F>(&mut self, mut deliver: F) -> Result<Termination, EngineError>
    where
        F: FnMut(NormalizedRecord) -> Result<(), EngineError>,
    {
        let cancel = self.cancel.clone();
        loop {
            match self.next_action() {
                Action::Poll => {
                    if cancel.is_cancelled() {
                        self.cancel();
                        continue;
                    }
                    if self.state == FollowState::Idle {
                        self.state = FollowState::Polling;
                    }
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.cancel();
                            continue;
                        }
                        result = self.pager.poll() => result,
                    };
                    match result {
                        Ok(mut poll) => {
                            for record in poll.records.drain(..) {
                                if let Err(e) = deliver(record) {
                                    self.pager.close();
                                    return Err(e);
                                }
                                self.session.delivered += 1;
                            }
                            self.on_page(&poll);
                        }
                        Err(e) => self.on_failure(e),
                    }
                }
                Action::Sleep(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => self.cancel(),
                        _ = tokio::time::sleep(delay) => self.on_tick(),
                    }
                }
                Action::Stop(termination) => return Ok(termination),
            }
        }
    }
}
