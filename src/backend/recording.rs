// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Request/response recording for fixture capture (`--record <dir>`)
//!
//! Each GraphQL exchange is written to
//! `<dir>/<operation>_<timestamp>_<seq>.json` holding the operation name,
//! the time, the request (document and variables) and the raw response.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomically write content to a file using tempfile + rename
///
/// Readers see either no file or the complete file, never a partial one.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use tempfile::NamedTempFile;

    let temp_file = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))
        .context("Failed to create temp file")?;

    std::fs::write(temp_file.path(), content)
        .with_context(|| format!("Failed to write temp file {:?}", temp_file.path()))?;

    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file to {:?}", path))?;

    Ok(())
}

#[derive(Serialize)]
struct Recording<'a> {
    command: &'a str,
    timestamp: String,
    request: RecordedRequest<'a>,
    response: &'a Value,
}

#[derive(Serialize)]
struct RecordedRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Debug)]
pub struct Recorder {
    dir: PathBuf,
    seq: AtomicUsize,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create recording directory {:?}", dir))?;
        Ok(Self {
            dir,
            seq: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one exchange; returns the file written
    pub fn record(
        &self,
        operation: &str,
        query: &str,
        variables: &Value,
        response: &Value,
    ) -> Result<PathBuf> {
        let now = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}_{}_{:04}.json",
            operation.replace('.', "_"),
            now.format("%Y%m%d_%H%M%S%3f"),
            seq
        );
        let path = self.dir.join(file_name);

        let recording = Recording {
            command: operation,
            timestamp: now.to_rfc3339(),
            request: RecordedRequest { query, variables },
            response,
        };
        let content = serde_json::to_vec_pretty(&recording)?;
        atomic_write(&path, &content)?;
        Ok(path)
    }
}
