// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Diagnostic channel for long-running operations
//!
//! The pager and follower report status transitions (connecting, retrying,
//! reconnecting, giving up) here instead of on the data stream. Updates are
//! broadcast to subscribers (the spinner) and optionally echoed to stderr,
//! as plain lines in human mode or one JSON object per line in structured
//! mode, so stdout only ever carries records.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg} {elapsed:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Status update, never part of the data stream
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Opening a backend session
    Connecting { resource: String },
    PageFetched {
        resource: String,
        page: u32,
        records: usize,
    },
    /// A bounded fetch failed transiently and will be retried on the same cursor
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    /// A follow session lost the backend and is backing off
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Reconnected { after_failures: u32 },
    GivingUp { attempts: u32, error: String },
    /// The watched run reached a terminal state
    StreamCompleted { resource: String },
    Cancelled,
    /// More results remain; pass this to `--cursor` to continue
    NextCursor { cursor: String },
    Failed {
        kind: String,
        message: String,
        exit_code: i32,
    },
}

impl Diagnostic {
    /// Plain-text rendering for human mode; `None` for chatter not worth a line
    pub fn message(&self) -> Option<String> {
        let msg = match self {
            Diagnostic::Connecting { resource } => format!("Connecting to fetch {}...", resource),
            Diagnostic::PageFetched { .. } => return None,
            Diagnostic::Retrying {
                attempt,
                max_attempts,
                delay_ms,
                error,
            } => format!(
                "Retrying in {}ms (attempt {}/{}): {}",
                delay_ms, attempt, max_attempts, error
            ),
            Diagnostic::Reconnecting {
                attempt,
                delay_ms,
                error,
            } => format!(
                "Reconnecting in {}ms (failure {}): {}",
                delay_ms, attempt, error
            ),
            Diagnostic::Reconnected { after_failures } => {
                format!("Reconnected after {} failure(s)", after_failures)
            }
            Diagnostic::GivingUp { attempts, error } => {
                format!("Giving up after {} attempt(s): {}", attempts, error)
            }
            Diagnostic::StreamCompleted { resource } => {
                format!("Stream of {} completed", resource)
            }
            Diagnostic::Cancelled => "Cancelled".to_string(),
            Diagnostic::NextCursor { cursor } => {
                format!("More results available; continue with --cursor {}", cursor)
            }
            Diagnostic::Failed { message, .. } => format!("Error: {}", message),
        };
        Some(msg)
    }
}

/// Where diagnostics are echoed besides subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Silent,
    Human,
    Json,
}

pub struct ProgressReporter {
    sender: broadcast::Sender<Diagnostic>,
    echo: Echo,
    sink: Mutex<Box<dyn Write + Send>>,
    /// Spinner currently drawn on the terminal, cleared while echoing
    spinner: Mutex<Option<ProgressBar>>,
    pages: AtomicUsize,
    records: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(echo: Echo) -> Self {
        Self::with_sink(echo, Box::new(std::io::stderr()))
    }

    /// Echo diagnostics to `sink` instead of stderr
    pub fn with_sink(echo: Echo, sink: Box<dyn Write + Send>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            echo,
            sink: Mutex::new(sink),
            spinner: Mutex::new(None),
            pages: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
        }
    }

    /// Route echoed lines around `spinner` until it is detached with `None`
    pub fn attach_spinner(&self, spinner: Option<ProgressBar>) {
        if let Ok(mut current) = self.spinner.lock() {
            *current = spinner;
        }
    }

    /// Subscribe to diagnostic updates
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.sender.subscribe()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        if let Diagnostic::PageFetched { records, .. } = &diagnostic {
            self.pages.fetch_add(1, Ordering::SeqCst);
            self.records.fetch_add(*records, Ordering::SeqCst);
        }
        self.echo(&diagnostic);
        let _ = self.sender.send(diagnostic);
    }

    fn echo(&self, diagnostic: &Diagnostic) {
        let line = match self.echo {
            Echo::Silent => return,
            // Connection chatter is left to the spinner and the log file
            Echo::Human if matches!(diagnostic, Diagnostic::Connecting { .. }) => return,
            Echo::Human => match diagnostic.message() {
                Some(msg) => msg,
                None => return,
            },
            Echo::Json => {
                if matches!(diagnostic, Diagnostic::PageFetched { .. }) {
                    return;
                }
                match serde_json::to_string(diagnostic) {
                    Ok(json) => json,
                    Err(_) => return,
                }
            }
        };
        let write = || {
            if let Ok(mut sink) = self.sink.lock() {
                let _ = writeln!(sink, "{}", line);
                let _ = sink.flush();
            }
        };
        let spinner = self.spinner.lock().ok().and_then(|s| s.clone());
        match spinner {
            Some(spinner) => spinner.suspend(write),
            None => write(),
        }
    }

    pub fn connecting(&self, resource: &str) {
        self.report(Diagnostic::Connecting {
            resource: resource.to_string(),
        });
    }

    pub fn page_fetched(&self, resource: &str, page: u32, records: usize) {
        self.report(Diagnostic::PageFetched {
            resource: resource.to_string(),
            page,
            records,
        });
    }

    pub fn retrying(&self, attempt: u32, max_attempts: u32, delay_ms: u64, error: &str) {
        self.report(Diagnostic::Retrying {
            attempt,
            max_attempts,
            delay_ms,
            error: error.to_string(),
        });
    }

    pub fn reconnecting(&self, attempt: u32, delay_ms: u64, error: &str) {
        self.report(Diagnostic::Reconnecting {
            attempt,
            delay_ms,
            error: error.to_string(),
        });
    }

    pub fn reconnected(&self, after_failures: u32) {
        self.report(Diagnostic::Reconnected { after_failures });
    }

    pub fn giving_up(&self, attempts: u32, error: &str) {
        self.report(Diagnostic::GivingUp {
            attempts,
            error: error.to_string(),
        });
    }

    pub fn stream_completed(&self, resource: &str) {
        self.report(Diagnostic::StreamCompleted {
            resource: resource.to_string(),
        });
    }

    pub fn cancelled(&self) {
        self.report(Diagnostic::Cancelled);
    }

    pub fn next_cursor(&self, cursor: &str) {
        self.report(Diagnostic::NextCursor {
            cursor: cursor.to_string(),
        });
    }

    pub fn failed(&self, kind: &str, message: &str, exit_code: i32) {
        self.report(Diagnostic::Failed {
            kind: kind.to_string(),
            message: message.to_string(),
            exit_code,
        });
    }

    /// Pages and records fetched so far
    pub fn progress(&self) -> (usize, usize) {
        (
            self.pages.load(Ordering::SeqCst),
            self.records.load(Ordering::SeqCst),
        )
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Echo::Silent)
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

pub fn create_progress_handle(echo: Echo) -> ProgressHandle {
    Arc::new(ProgressReporter::new(echo))
}


#[cfg(test)]
mod tests {
    use super::testing::SharedSink;
    use super::*;

    #[test]
    fn test_progress_counts_pages() {
        let reporter = ProgressReporter::default();
        reporter.page_fetched("run", 1, 10);
        reporter.page_fetched("run", 2, 5);
        assert_eq!(reporter.progress(), (2, 15));
    }

    #[test]
    fn test_subscribe_receives_updates() {
        let reporter = ProgressReporter::default();
        let mut receiver = reporter.subscribe();

        reporter.connecting("event");
        reporter.reconnecting(1, 1000, "timeout");
        reporter.reconnected(1);

        let updates: Vec<_> = std::iter::from_fn(|| receiver.try_recv().ok()).collect();
        assert_eq!(updates.len(), 3);
        assert!(matches!(updates[0], Diagnostic::Connecting { .. }));
        assert_eq!(
            updates[1],
            Diagnostic::Reconnecting {
                attempt: 1,
                delay_ms: 1000,
                error: "timeout".into()
            }
        );
        assert!(matches!(updates[2], Diagnostic::Reconnected { after_failures: 1 }));
    }

    #[test]
    fn test_structured_diagnostic_shape() {
        let json = serde_json::to_value(Diagnostic::GivingUp {
            attempts: 5,
            error: "HTTP 503".into(),
        })
        .unwrap();
        assert_eq!(json["diagnostic"], "giving_up");
        assert_eq!(json["attempts"], 5);

        let json = serde_json::to_value(Diagnostic::Cancelled).unwrap();
        assert_eq!(json, serde_json::json!({"diagnostic": "cancelled"}));
    }

    #[test]
    fn test_json_echo_writes_one_tagged_line_per_diagnostic() {
        let sink = SharedSink::default();
        let reporter = ProgressReporter::with_sink(Echo::Json, Box::new(sink.clone()));

        reporter.page_fetched("run", 1, 10);
        reporter.retrying(1, 5, 1000, "HTTP 503");
        reporter.failed("fatal_backend", "API Error: boom", 1);

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        let failed: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(failed["diagnostic"], "failed");
        assert_eq!(failed["kind"], "fatal_backend");
        assert_eq!(failed["exit_code"], 1);
    }

    #[test]
    fn test_human_echo_with_spinner_attached() {
        let sink = SharedSink::default();
        let reporter = ProgressReporter::with_sink(Echo::Human, Box::new(sink.clone()));
        let spinner = ProgressBar::hidden();
        reporter.attach_spinner(Some(spinner.clone()));

        reporter.connecting("run");
        reporter.reconnected(2);
        reporter.attach_spinner(None);
        reporter.cancelled();

        assert_eq!(
            sink.lines(),
            vec!["Reconnected after 2 failure(s)".to_string(), "Cancelled".to_string()]
        );
    }

    #[test]
    fn test_page_chatter_has_no_human_line() {
        let page = Diagnostic::PageFetched {
            resource: "run".into(),
            page: 1,
            records: 3,
        };
        assert!(page.message().is_none());
        assert_eq!(
            Diagnostic::NextCursor {
                cursor: "abc.1".into()
            }
            .message()
            .unwrap(),
            "More results available; continue with --cursor abc.1"
        );
    }
}
