// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for runq
//!
//! Lower layers (registry, filter translation) only raise [`UserInputError`].
//! The pager and follower classify remote failures via [`BackendError`] and
//! escalate exhausted retries to [`EngineError::Fatal`]. Only the dispatcher
//! and `main` turn an [`EngineError`] into a message and an exit code.

use thiserror::Error;

/// Process exit codes
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FATAL: i32 = 1;
    pub const USER_INPUT: i32 = 2;
    pub const NOT_FOUND: i32 = 3;
    pub const CANCELLED: i32 = 130;
}

/// Why a filter could not be translated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterErrorReason {
    #[error("unknown field for resource '{noun}' (supported: {supported})")]
    UnknownField { noun: String, supported: String },
    #[error("operator '{operator}' is not supported for this field")]
    UnsupportedOperator { operator: &'static str },
    #[error("field accepts a single value, got {count}")]
    SingleValueOnly { count: usize },
    #[error("malformed range: {0}")]
    MalformedRange(String),
    #[error("unparseable time '{0}' (expected e.g. 2h, 1d, 2024-01-31 or RFC 3339)")]
    UnparseableTime(String),
    #[error("invalid value '{value}' (allowed: {allowed})")]
    NotAllowed { value: String, allowed: String },
    #[error("invalid value '{0}'")]
    InvalidValue(String),
    #[error("unsupported pattern metacharacter '{0}' (only '*' is supported)")]
    UnsupportedPattern(char),
    #[error("missing '=' in filter expression '{0}' (expected field=value)")]
    MissingEquals(String),
}

/// A filter rejected during translation, naming the offending field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter on field '{field}': {reason}")]
pub struct FilterValidationError {
    pub field: String,
    pub reason: FilterErrorReason,
}

impl FilterValidationError {
    pub fn new(field: impl Into<String>, reason: FilterErrorReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

/// Errors caused by what the user typed; never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserInputError {
    #[error("unknown resource '{noun}' (available: {available})")]
    UnknownNoun { noun: String, available: String },
    #[error("resource '{noun}' does not support '{verb}' (supported: {supported})")]
    UnsupportedVerb {
        noun: String,
        verb: String,
        supported: String,
    },
    #[error(transparent)]
    Filter(#[from] FilterValidationError),
    #[error("'{noun} {verb}' requires a run id")]
    MissingId { noun: String, verb: String },
    #[error("'{noun} {verb}' does not take an id argument")]
    UnexpectedId { noun: String, verb: String },
    #[error("resource '{noun}' cannot be followed")]
    FollowUnsupported { noun: String },
    #[error("cursor was issued for a different query; rerun without --cursor")]
    CursorMismatch,
    #[error("malformed cursor '{0}'")]
    MalformedCursor(String),
    #[error("{0}")]
    InvalidArgument(String),
}

/// Failure reported by the remote service, already classified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network failure, timeout, rate limiting or a 5xx-equivalent
    #[error("transient backend error: {0}")]
    Transient(String),
    #[error("backend error: {0}")]
    Fatal(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Top-level error surfaced to the dispatcher
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    UserInput(#[from] UserInputError),
    #[error("{0}")]
    NotFound(String),
    #[error("{message} (after {attempts} attempt(s))")]
    Fatal { message: String, attempts: u32 },
    #[error("cancelled")]
    Cancelled,
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

impl EngineError {
    /// Map a backend failure that will not be retried any further
    pub fn from_backend(err: BackendError, attempts: u32) -> Self {
        match err {
            BackendError::NotFound(message) => EngineError::NotFound(message),
            BackendError::Transient(message) | BackendError::Fatal(message) => {
                EngineError::Fatal { message, attempts }
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::UserInput(_) => exit_code::USER_INPUT,
            EngineError::NotFound(_) => exit_code::NOT_FOUND,
            EngineError::Fatal { .. } | EngineError::Output(_) => exit_code::FATAL,
            EngineError::Cancelled => exit_code::CANCELLED,
        }
    }

    /// Stable name used in structured diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UserInput(_) => "user_input",
            EngineError::NotFound(_) => "not_found",
            EngineError::Fatal { .. } => "fatal_backend",
            EngineError::Cancelled => "cancelled",
            EngineError::Output(_) => "output",
        }
    }
}

impl From<FilterValidationError> for EngineError {
    fn from(err: FilterValidationError) -> Self {
        EngineError::UserInput(UserInputError::Filter(err))
    }
}
