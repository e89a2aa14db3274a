//! Engine configuration.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use edgeshare_core::{ExecutionMode, MatcherKind, ProgressConfig, RunOptions};
use serde::{Deserialize, Serialize};

/// Configuration for one engine invocation.
///
/// The defaults reproduce the fixed locations the bundle producer and
/// artifact consumer agree on: the bundle is read from
/// [`DEFAULT_INPUT_PATH`](Self::DEFAULT_INPUT_PATH) and answers are
/// written to
/// `<DEFAULT_OUTPUT_DIR>/<DEFAULT_ARTIFACT_PREFIX><position>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path of the JSON input bundle.
    pub input_path: PathBuf,

    /// Directory receiving one artifact per query position.
    pub output_dir: PathBuf,

    /// File name prefix of each artifact; the position and `.json`
    /// extension are appended.
    pub artifact_prefix: String,

    /// Emit a progress line every this many completed positions.
    /// `0` disables progress reporting.
    pub progress_step_size: usize,

    /// Progress reporting only happens when this is `true`.
    pub verbose: bool,

    /// Use a worker pool (`true`) or a single thread (`false`).
    pub parallel: bool,

    /// Upper bound on parallel workers. `None` uses the available
    /// processing units. Ignored in serial mode.
    pub worker_count: Option<NonZeroUsize>,

    /// Neighbour search strategy.
    pub matcher: MatcherKind,
}

impl EngineConfig {
    /// Default bundle location.
    pub const DEFAULT_INPUT_PATH: &'static str = "/tmp/_temp_polygons_todo.json";
    /// Default artifact directory.
    pub const DEFAULT_OUTPUT_DIR: &'static str = "/tmp";
    /// Default artifact file name prefix.
    pub const DEFAULT_ARTIFACT_PREFIX: &'static str = "_temp_polygon_neighbours_";
    /// Default progress step (disabled).
    pub const DEFAULT_PROGRESS_STEP_SIZE: usize = 0;
    /// Default verbosity.
    pub const DEFAULT_VERBOSE: bool = false;
    /// Default scheduling mode.
    pub const DEFAULT_PARALLEL: bool = true;

    /// The configuration used by the three-argument entry point.
    #[must_use]
    pub fn with_flags(progress_step_size: usize, verbose: bool, parallel: bool) -> Self {
        Self {
            progress_step_size,
            verbose,
            parallel,
            ..Self::default()
        }
    }

    /// The scheduling mode selected by `parallel` and `worker_count`.
    #[must_use]
    pub const fn execution_mode(&self) -> ExecutionMode {
        if self.parallel {
            ExecutionMode::Parallel {
                worker_count: self.worker_count,
            }
        } else {
            ExecutionMode::Serial
        }
    }

    /// Options handed to the core dispatcher.
    #[must_use]
    pub const fn run_options(&self) -> RunOptions {
        RunOptions {
            mode: self.execution_mode(),
            matcher: self.matcher,
            progress: ProgressConfig::configure(self.progress_step_size, self.verbose),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(Self::DEFAULT_INPUT_PATH),
            output_dir: PathBuf::from(Self::DEFAULT_OUTPUT_DIR),
            artifact_prefix: Self::DEFAULT_ARTIFACT_PREFIX.to_string(),
            progress_step_size: Self::DEFAULT_PROGRESS_STEP_SIZE,
            verbose: Self::DEFAULT_VERBOSE,
            parallel: Self::DEFAULT_PARALLEL,
            worker_count: None,
            matcher: MatcherKind::default(),
        }
    }
}
