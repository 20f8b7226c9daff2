// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::Parser;
use std::path::PathBuf;

use crate::error::FilterValidationError;
use crate::filter::RawFilter;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "runq")]
#[command(
    author,
    version,
    about = "Query runs, events, logs and steps of a remote orchestration backend",
    after_help = "Examples:\n  \
        runq run list --status FAILURE --since 1d\n  \
        runq run view 9d38c7ea\n  \
        runq run logs 9d38c7ea --follow\n  \
        runq event list 9d38c7ea --type STEP_FAILURE,RUN_FAILURE --json"
)]
pub struct Args {
    /// Resource noun (run, event, log, step, stats, deployment)
    pub noun: String,

    /// Verb (list, view, terminate, delete, events, logs, steps, stats)
    #[arg(default_value = "list")]
    pub verb: String,

    /// Run id for view, mutations and nested resources
    pub id: Option<String>,

    /// Output one JSON object per line instead of tables
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// GraphQL endpoint URL
    #[arg(long, env = "RUNQ_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Deployment to query
    #[arg(long, env = "RUNQ_DEPLOYMENT")]
    pub deployment: Option<String>,

    /// Write every GraphQL request/response pair to this directory
    #[arg(long, value_name = "DIR")]
    pub record: Option<PathBuf>,

    /// Maximum number of records to return
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Items requested per round trip
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Resume a previous list from the cursor it reported
    #[arg(long)]
    pub cursor: Option<String>,

    /// Keep streaming new events until the run finishes
    #[arg(short, long)]
    pub follow: bool,

    /// Seconds between polls while following
    #[arg(long, value_name = "SECONDS")]
    pub poll_interval: Option<f64>,

    /// Generic filter, repeatable (field=value[,value...])
    #[arg(long = "filter", value_name = "FIELD=VALUE")]
    pub filters: Vec<String>,

    /// Filter by run or step status (comma-separated)
    #[arg(long)]
    pub status: Option<String>,

    /// Filter by job name (supports trailing or inner '*')
    #[arg(long)]
    pub job: Option<String>,

    /// Filter by tag, repeatable (key=value)
    #[arg(long = "tag", value_name = "KEY=VALUE")]
    pub tags: Vec<String>,

    /// Filter by event type (comma-separated)
    #[arg(long = "type", value_name = "TYPE")]
    pub event_type: Option<String>,

    /// Filter by step key (supports '*')
    #[arg(long)]
    pub step: Option<String>,

    /// Filter log lines by level (comma-separated)
    #[arg(long)]
    pub level: Option<String>,

    /// Filter deployments by name
    #[arg(long)]
    pub name: Option<String>,

    /// Only records at or after this time (2h, 1d, 2024-01-31, RFC 3339)
    #[arg(long)]
    pub since: Option<String>,

    /// Only records at or before this time
    #[arg(long)]
    pub until: Option<String>,
}

impl Args {
    /// Every filter flag as raw, unvalidated input in command-line order
    pub fn raw_filters(&self) -> Result<Vec<RawFilter>, FilterValidationError> {
        let mut raw = Vec::new();

        let dedicated = [
            ("status", &self.status),
            ("job", &self.job),
            ("type", &self.event_type),
            ("step", &self.step),
            ("level", &self.level),
            ("name", &self.name),
        ];
        for (field, value) in dedicated {
            if let Some(value) = value {
                raw.push(RawFilter::values(field, value.as_str()));
            }
        }
        for tag in &self.tags {
            raw.push(RawFilter::values("tag", tag.as_str()));
        }
        for expr in &self.filters {
            raw.push(RawFilter::parse(expr)?);
        }
        if self.since.is_some() || self.until.is_some() {
            raw.push(RawFilter::Range {
                field: None,
                since: self.since.clone(),
                until: self.until.clone(),
            });
        }

        Ok(raw)
    }
}
