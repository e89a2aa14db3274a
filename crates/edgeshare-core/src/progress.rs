//! Optional periodic progress reporting.
//!
//! Reporting is purely observational: it never changes results or the
//! order in which positions are processed. When enabled, a status line
//! is emitted after every `step_size`-th completed query position.
//!
//! Each reporter counts positions for a single thread of control. In
//! parallel mode every worker owns its own reporter over its own
//! partition, so workers never share a counter.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

/// Target used for progress events emitted by [`TracingSink`].
pub const PROGRESS_TARGET: &str = "edgeshare::progress";

/// When to emit progress status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Emit a line every this many completed positions (`0` disables).
    pub step_size: usize,
    /// Reporting only happens when this is `true`.
    pub verbose: bool,
}

impl ProgressConfig {
    /// Build a progress configuration.
    #[must_use]
    pub const fn configure(step_size: usize, verbose: bool) -> Self {
        Self { step_size, verbose }
    }

    /// Returns `true` when status lines will be emitted.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.verbose && self.step_size > 0
    }
}

/// One progress status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Worker slot, or `None` in serial mode.
    pub worker: Option<usize>,
    /// Positions completed so far by this reporter.
    pub processed: usize,
    /// Positions this reporter is responsible for.
    pub total: usize,
    /// Wall-clock time since the reporter started.
    pub elapsed: Duration,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(worker) = self.worker {
            write!(f, "T{worker} ")?;
        }
        write!(
            f,
            "#{} / {} ({:.3?})",
            self.processed, self.total, self.elapsed
        )
    }
}

/// Destination for progress status lines.
pub trait ProgressSink: Send + Sync {
    /// Deliver one status line.
    fn emit(&self, line: &StatusLine);
}

/// Emits status lines as `tracing` events on [`PROGRESS_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, line: &StatusLine) {
        tracing::info!(
            target: PROGRESS_TARGET,
            worker = line.worker,
            processed = line.processed,
            total = line.total,
            elapsed_ms = u64::try_from(line.elapsed.as_millis()).unwrap_or(u64::MAX),
            "{line}"
        );
    }
}

/// Counts completed positions and emits status lines at the configured step.
pub struct ProgressReporter<'a> {
    config: ProgressConfig,
    worker: Option<usize>,
    total: usize,
    completed: usize,
    started: Instant,
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressReporter<'a> {
    /// Start a reporter for `total` positions.
    #[must_use]
    pub fn new(
        config: ProgressConfig,
        worker: Option<usize>,
        total: usize,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            worker,
            total,
            completed: 0,
            started: Instant::now(),
            sink,
        }
    }

    /// Record one completed position.
    ///
    /// Returns `true` if a status line was emitted.
    pub fn record_completed(&mut self) -> bool {
        self.completed += 1;
        if !self.config.is_enabled() || self.completed % self.config.step_size != 0 {
            return false;
        }
        self.sink.emit(&StatusLine {
            worker: self.worker,
            processed: self.completed,
            total: self.total,
            elapsed: self.started.elapsed(),
        });
        true
    }

    /// Positions completed so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }
}
