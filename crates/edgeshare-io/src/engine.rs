//! The engine entry point: load bundle, answer queries, write artifacts.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use edgeshare_core::{TracingSink, dispatch, store};
use web_time::Instant;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::writer::ResultWriter;

/// What one successful invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of polygons in the bundle (N).
    pub polygon_count: usize,
    /// Artifact paths, indexed by query position.
    pub artifacts: Vec<PathBuf>,
    /// Time spent reading and decoding the bundle.
    pub load_time: Duration,
    /// Time spent answering queries.
    pub run_time: Duration,
}

/// Find neighbours using the default bundle and artifact locations.
///
/// Equivalent to [`run`] with [`EngineConfig::with_flags`].
///
/// # Errors
///
/// See [`run`].
pub fn find_neighbours(
    progress_step_size: usize,
    verbose: bool,
    parallel: bool,
) -> Result<RunSummary, EngineError> {
    run(&EngineConfig::with_flags(progress_step_size, verbose, parallel))
}

/// Load the bundle, answer every query position, and write one artifact
/// per position.
///
/// Artifacts are written only after every position has been answered,
/// so a failed call leaves no new artifacts behind. Artifacts from
/// earlier calls are never read or merged; same-named files are
/// replaced.
///
/// # Errors
///
/// - [`EngineError::InputNotFound`] if the bundle does not exist.
/// - [`EngineError::Io`] if the bundle cannot be read or an artifact
///   cannot be written.
/// - [`EngineError::Neighbour`] for a malformed bundle, an out-of-range
///   query index, or a failed worker.
pub fn run(config: &EngineConfig) -> Result<RunSummary, EngineError> {
    let load_start = Instant::now();
    let bytes = fs::read(&config.input_path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            EngineError::InputNotFound {
                path: config.input_path.clone(),
            }
        } else {
            EngineError::io(&config.input_path, e)
        }
    })?;
    let (collection, queries) =
        store::load_slice(&bytes).map_err(edgeshare_core::NeighbourError::from)?;
    let load_time = load_start.elapsed();
    tracing::info!(
        path = %config.input_path.display(),
        polygons = collection.len(),
        queries = queries.len(),
        ?load_time,
        "loaded polygon bundle"
    );

    let run_start = Instant::now();
    let answers = dispatch::run(&collection, &queries, &config.run_options(), &TracingSink)?;
    let run_time = run_start.elapsed();

    let per_polygon = u32::try_from(collection.len())
        .ok()
        .filter(|&n| n > 0)
        .map(|n| run_time / n);
    tracing::info!(
        mode = ?config.execution_mode(),
        matcher = ?config.matcher,
        ?run_time,
        ?per_polygon,
        "answered query positions"
    );

    let writer = ResultWriter::new(&config.output_dir, config.artifact_prefix.as_str());
    let artifacts = writer.write_all(&answers)?;

    Ok(RunSummary {
        polygon_count: collection.len(),
        artifacts,
        load_time,
        run_time,
    })
}
