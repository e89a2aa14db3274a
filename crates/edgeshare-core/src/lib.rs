//! edgeshare-core: Pure shared-edge adjacency engine (sans-IO).
//!
//! Given a collection of simple closed polygons and an ordered list of
//! query indices, finds for each query position the polygons that share
//! at least one boundary edge with the queried polygon:
//! decode bundle -> validate queries -> prepare matcher -> dispatch
//! (serial or parallel) -> per-position answers.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! JSON values and returns structured data. Reading bundles from disk
//! and writing per-position artifacts lives in `edgeshare-io`.

pub mod dispatch;
pub mod matcher;
pub mod progress;
pub mod store;
pub mod types;

pub use dispatch::{Answers, ExecutionMode, RunOptions, WorkerPool};
pub use matcher::{AdjacencyMatcher, Edge, MatcherKind, NeighbourFinder};
pub use progress::{ProgressConfig, ProgressSink, StatusLine, TracingSink};
pub use types::{
    FormatError, NeighbourError, NeighbourResult, Point, Polygon, PolygonCollection, QuerySet,
    RuntimeError,
};

/// Decode a bundle and answer every query position.
///
/// Combines [`store::load_slice`] and [`dispatch::run`]. Progress lines
/// go to `tracing` via [`TracingSink`].
///
/// # Errors
///
/// Returns [`NeighbourError::Format`] for a malformed bundle (before any
/// computation), [`NeighbourError::IndexOutOfRange`] for an invalid
/// query index, and [`NeighbourError::Runtime`] if parallel execution
/// fails.
pub fn process(bundle: &[u8], options: &RunOptions) -> Result<Answers, NeighbourError> {
    let (collection, queries) = store::load_slice(bundle)?;
    dispatch::run(&collection, &queries, options, &TracingSink)
}
