// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod backend;
mod cli;
pub mod config;
mod dispatch;
mod error;
mod filter;
mod follow;
mod output;
mod pager;
pub mod progress;
mod records;
mod registry;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::IsTerminal;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::prelude::*;

use backend::GraphQlBackend;
use backend::recording::Recorder;
use cli::Args;
use dispatch::{Dispatcher, Invocation};
use error::{EngineError, UserInputError, exit_code};
use filter::FilterTranslator;
use output::{OutputMode, Renderer};
use progress::{Echo, ProgressHandle, create_progress_handle};
use registry::build_default_registry;

/// Environment variable holding the API token sent with every request
const API_TOKEN_ENV: &str = "RUNQ_API_TOKEN";

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // Rotate daily or at 10MB, keep 5 files
    let log_path = log_dir.join("runq.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "runq=debug" } else { "runq=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let progress = create_progress_handle(if args.json { Echo::Json } else { Echo::Human });
    let code = match run(&args, &progress).await {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => report_failure(&e, &progress),
    };

    if code != exit_code::SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}

/// Map a failure to its exit code and report it on the diagnostic channel
fn report_failure(err: &anyhow::Error, progress: &ProgressHandle) -> i32 {
    let Some(engine) = err.downcast_ref::<EngineError>() else {
        error!(error = %format!("{:#}", err), "Startup failed");
        progress.failed("config", &format!("{:#}", err), exit_code::FATAL);
        return exit_code::FATAL;
    };

    // Downstream closed the pipe (`runq run list | head`)
    if let EngineError::Output(io) = engine
        && io.kind() == std::io::ErrorKind::BrokenPipe
    {
        debug!("Output closed by reader");
        return exit_code::SUCCESS;
    }

    let code = engine.exit_code();
    error!(kind = engine.kind(), exit_code = code, error = %engine, "Command failed");
    progress.failed(engine.kind(), &engine.to_string(), code);
    code
}

fn build_invocation(args: &Args, config: &config::Config) -> Result<Invocation, EngineError> {
    let poll_interval = match args.poll_interval {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                UserInputError::InvalidArgument(format!(
                    "--poll-interval must be a positive number of seconds, got {}",
                    secs
                ))
            })?,
        None => config.poll_interval(),
    };

    Ok(Invocation {
        noun: args.noun.clone(),
        verb: args.verb.clone(),
        id: args.id.clone(),
        filters: args.raw_filters()?,
        limit: args.limit,
        page_size: args.page_size.unwrap_or_else(|| config.page_size()),
        cursor: args.cursor.clone(),
        follow: args.follow,
        poll_interval,
    })
}

async fn run(args: &Args, progress: &ProgressHandle) -> Result<()> {
    let config = config::Config::load()?;
    let invocation = build_invocation(args, &config)?;

    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| config.endpoint().to_string());
    let deployment = args.deployment.clone().or_else(|| config.deployment.clone());
    let recorder = args
        .record
        .as_ref()
        .map(|dir| Recorder::new(dir.clone()))
        .transpose()
        .context("Failed to prepare recording directory")?;

    debug!(
        endpoint = %endpoint,
        deployment = ?deployment,
        recording = ?recorder.as_ref().map(|r| r.dir().display().to_string()),
        "Backend configured"
    );
    let backend = GraphQlBackend::new(endpoint)
        .with_deployment(deployment)
        .with_api_token(std::env::var(API_TOKEN_ENV).ok())
        .with_recorder(recorder);

    // Ctrl-C cancels the active session at its next suspension point
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let registry = build_default_registry();
    let mode = if args.json {
        OutputMode::Structured
    } else {
        OutputMode::Human
    };
    let dispatcher = Dispatcher::new(
        &registry,
        &backend,
        FilterTranslator::new(Utc::now()),
        config.backoff,
        progress.clone(),
        cancel,
    )
    .with_spinner(std::io::stderr().is_terminal());

    let mut renderer = Renderer::new(mode, std::io::stdout().lock());
    dispatcher.execute(&invocation, &mut renderer).await?;
    Ok(())
}
