// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

use crate::error::UserInputError;
use crate::filter::FilterSet;

/// Hex characters of the filter fingerprint shown to users
const FINGERPRINT_PREFIX_LEN: usize = 16;

/// Backend token bound to the filter shape that produced it
///
/// Rendered as `<fingerprint-prefix>.<token>`. A cursor only resumes a query
/// with the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub fingerprint: String,
    pub token: String,
}

impl PageCursor {
    pub fn new(fingerprint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            token: token.into(),
        }
    }

    fn prefix(&self) -> &str {
        let end = self.fingerprint.len().min(FINGERPRINT_PREFIX_LEN);
        &self.fingerprint[..end]
    }

    /// Parse a user-supplied cursor and check it belongs to `filters`
    pub fn resume(value: &str, filters: &FilterSet) -> Result<Self, UserInputError> {
        let (prefix, token) = value
            .trim()
            .split_once('.')
            .filter(|(p, t)| {
                p.len() == FINGERPRINT_PREFIX_LEN
                    && p.bytes().all(|b| b.is_ascii_hexdigit())
                    && !t.is_empty()
            })
            .ok_or_else(|| UserInputError::MalformedCursor(value.to_string()))?;

        let fingerprint = filters.fingerprint();
        if !fingerprint.starts_with(&prefix.to_ascii_lowercase()) {
            return Err(UserInputError::CursorMismatch);
        }
        Ok(Self::new(fingerprint, token))
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.prefix(), self.token)
    }
}
