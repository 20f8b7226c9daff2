// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::time::Duration;
use tokio::time::Instant;

use crate::error::EngineError;

/// Why a follow session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The watched run reached a terminal state and nothing is pending
    Done,
    Cancelled,
    Fatal { message: String, attempts: u32 },
    NotFound(String),
}

impl Termination {
    /// Terminal state is success; everything else is an engine error
    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            Termination::Done => Ok(()),
            Termination::Cancelled => Err(EngineError::Cancelled),
            Termination::Fatal { message, attempts } => Err(EngineError::Fatal { message, attempts }),
            Termination::NotFound(message) => Err(EngineError::NotFound(message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowState {
    Idle,
    Polling,
    /// Drained everything available; sleeping one poll interval
    Waiting,
    /// Sleeping after `failures` consecutive transient failures
    Backoff { failures: u32, delay: Duration },
    Terminated(Termination),
}

/// What the driver loop should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Poll,
    Sleep(Duration),
    Stop(Termination),
}

/// Bookkeeping for one follow session
#[derive(Debug, Clone, Default)]
pub struct StreamSession {
    /// Last acknowledged backend cursor
    pub cursor: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<Instant>,
    pub delivered: usize,
    pub polls: u32,
}
