//! Tracing subscriber installation for the `orchestrator-kernel` binary
//! (spec.md §9.2), grounded in the teacher's `LoggerImpl::init` — rescoped
//! to stdout-only structured logging since this crate has no log-rotation
//! or secret-scrubbing requirement of its own.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber. Keep the returned guard alive
/// for the lifetime of the process; dropping it early stops the
/// non-blocking writer from flushing.
pub fn init() -> Result<WorkerGuard> {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
