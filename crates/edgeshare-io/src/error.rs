//! Errors surfaced by the engine entry point.

use std::path::PathBuf;

use edgeshare_core::NeighbourError;

/// Errors that can occur while loading, computing or writing.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The input bundle does not exist.
    #[error("input file \"{}\" not found", path.display())]
    InputNotFound {
        /// The missing bundle path.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("I/O error on \"{}\": {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The bundle was malformed, a query index was invalid, or a worker
    /// failed.
    #[error(transparent)]
    Neighbour(#[from] NeighbourError),

    /// An artifact could not be encoded or decoded.
    #[error("artifact \"{}\" is invalid: {reason}", path.display())]
    Artifact {
        /// The artifact path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
