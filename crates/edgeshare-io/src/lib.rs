//! edgeshare-io: Filesystem side of the edgeshare engine.
//!
//! Reads the JSON input bundle, runs the pure engine from
//! `edgeshare-core`, and writes one answer artifact per query position.
//! Creating the bundle and deleting the artifacts afterwards are left to
//! the caller.

pub mod config;
pub mod engine;
pub mod error;
pub mod writer;

pub use config::EngineConfig;
pub use engine::{RunSummary, find_neighbours, run};
pub use error::EngineError;
pub use writer::{NO_NEIGHBOURS_SENTINEL, ResultWriter, read_artifact};
