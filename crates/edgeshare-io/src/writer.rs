//! Per-position answer artifacts.
//!
//! Every query position gets its own JSON file named after the
//! position: `<dir>/<prefix><position>.json`. The file holds an array of
//! ascending neighbour indices, or the single sentinel `[-1]` when the
//! queried polygon has no neighbours.
//!
//! Writes are atomic from a reader's point of view: the payload is
//! written to a hidden temporary sibling and then renamed over the
//! target, so an artifact is either complete or absent.

use std::fs;
use std::path::{Path, PathBuf};

use edgeshare_core::{Answers, NeighbourResult};

use crate::error::EngineError;

/// Artifact value meaning "no neighbours".
pub const NO_NEIGHBOURS_SENTINEL: i64 = -1;

/// Encode an answer as artifact values.
///
/// # Errors
///
/// Returns the offending index if it does not fit in an `i64`.
pub fn encode_artifact(result: &NeighbourResult) -> Result<Vec<i64>, usize> {
    match result {
        NeighbourResult::NoNeighbours => Ok(vec![NO_NEIGHBOURS_SENTINEL]),
        NeighbourResult::SharedWith(indices) => indices
            .iter()
            .map(|&idx| i64::try_from(idx).map_err(|_| idx))
            .collect(),
    }
}

/// Decode artifact values back into an answer.
///
/// # Errors
///
/// Returns a description of the problem if the values are empty,
/// contain the sentinel alongside other values, contain other negative
/// values, or are not strictly ascending.
pub fn decode_artifact(values: &[i64]) -> Result<NeighbourResult, String> {
    if values == [NO_NEIGHBOURS_SENTINEL] {
        return Ok(NeighbourResult::NoNeighbours);
    }
    if values.is_empty() {
        return Err("empty artifact".to_string());
    }
    let indices = values
        .iter()
        .map(|&v| usize::try_from(v).map_err(|_| format!("negative index {v}")))
        .collect::<Result<Vec<_>, _>>()?;
    if indices.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err("indices are not strictly ascending".to_string());
    }
    Ok(NeighbourResult::SharedWith(indices))
}

/// Read and decode one artifact file.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the file cannot be read and
/// [`EngineError::Artifact`] if its contents are not a valid answer.
pub fn read_artifact(path: &Path) -> Result<NeighbourResult, EngineError> {
    let bytes = fs::read(path).map_err(|e| EngineError::io(path, e))?;
    let values: Vec<i64> = serde_json::from_slice(&bytes).map_err(|e| EngineError::Artifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    decode_artifact(&values).map_err(|reason| EngineError::Artifact {
        path: path.to_path_buf(),
        reason,
    })
}

/// Writes answers to position-addressed artifact files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultWriter {
    dir: PathBuf,
    prefix: String,
}

impl ResultWriter {
    /// Create a writer placing artifacts in `dir` with file name `prefix`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// The artifact path for query `position`.
    #[must_use]
    pub fn artifact_path(&self, position: usize) -> PathBuf {
        self.dir.join(format!("{}{position}.json", self.prefix))
    }

    fn temp_path(&self, position: usize) -> PathBuf {
        self.dir.join(format!(".{}{position}.json.tmp", self.prefix))
    }

    /// Persist the answer for one position, replacing any older artifact.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Artifact`] if an index cannot be encoded
    /// and [`EngineError::Io`] if the temporary file cannot be written
    /// or renamed.
    pub fn write(&self, position: usize, result: &NeighbourResult) -> Result<PathBuf, EngineError> {
        let staged = self.stage(position, result)?;
        staged.commit()
    }

    /// Write the payload for `position` to its temporary sibling.
    fn stage(&self, position: usize, result: &NeighbourResult) -> Result<Staged, EngineError> {
        let target = self.artifact_path(position);
        let values = encode_artifact(result).map_err(|idx| EngineError::Artifact {
            path: target.clone(),
            reason: format!("index {idx} does not fit the artifact encoding"),
        })?;
        let payload = serde_json::to_vec(&values).map_err(|e| EngineError::Artifact {
            path: target.clone(),
            reason: e.to_string(),
        })?;

        let temp = self.temp_path(position);
        if let Err(e) = fs::write(&temp, payload) {
            let _ = fs::remove_file(&temp);
            return Err(EngineError::io(&temp, e));
        }
        Ok(Staged { temp, target })
    }

    /// Persist every answer, one artifact per position.
    ///
    /// Creates the output directory if needed. Every payload is staged
    /// to a temporary file before any artifact is renamed into place, and
    /// a failure at any point removes what this call wrote, so either all
    /// artifacts appear or none do. Returns the artifact paths in
    /// position order.
    ///
    /// # Errors
    ///
    /// Returns the first error from creating the directory, staging a
    /// payload, or renaming it into place.
    pub fn write_all(&self, answers: &Answers) -> Result<Vec<PathBuf>, EngineError> {
        if answers.is_empty() {
            return Ok(Vec::new());
        }
        fs::create_dir_all(&self.dir).map_err(|e| EngineError::io(&self.dir, e))?;

        let mut staged = Vec::with_capacity(answers.len());
        for (position, result) in answers.iter() {
            match self.stage(position, result) {
                Ok(file) => staged.push(file),
                Err(e) => {
                    staged.iter().for_each(Staged::discard);
                    return Err(e);
                }
            }
        }

        let mut paths = Vec::with_capacity(staged.len());
        let mut pending = staged.into_iter();
        while let Some(file) = pending.next() {
            match file.commit() {
                Ok(path) => paths.push(path),
                Err(e) => {
                    pending.for_each(|rest| rest.discard());
                    for path in &paths {
                        let _ = fs::remove_file(path);
                    }
                    tracing::warn!(
                        dir = %self.dir.display(),
                        rolled_back = paths.len(),
                        "artifact write failed, removed partial output"
                    );
                    return Err(e);
                }
            }
        }
        tracing::debug!(
            artifacts = paths.len(),
            dir = %self.dir.display(),
            "wrote neighbour artifacts"
        );
        Ok(paths)
    }
}

/// A payload written to its temporary path, not yet visible as an artifact.
struct Staged {
    temp: PathBuf,
    target: PathBuf,
}

impl Staged {
    /// Rename the temporary file over the artifact path.
    fn commit(self) -> Result<PathBuf, EngineError> {
        if let Err(e) = fs::rename(&self.temp, &self.target) {
            self.discard();
            return Err(EngineError::io(&self.target, e));
        }
        Ok(self.target)
    }

    fn discard(&self) {
        let _ = fs::remove_file(&self.temp);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_no_neighbours_is_sentinel() {
        assert_eq!(
            encode_artifact(&NeighbourResult::NoNeighbours).unwrap(),
            vec![-1]
        );
    }

    #[test]
    fn encode_shared_with_keeps_order() {
        let result = NeighbourResult::SharedWith(vec![0, 2, 3]);
        assert_eq!(encode_artifact(&result).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn decode_rejects_malformed_values() {
        assert!(decode_artifact(&[]).is_err());
        assert!(decode_artifact(&[-1, 2]).is_err());
        assert!(decode_artifact(&[3, 1]).is_err());
        assert!(decode_artifact(&[1, 1]).is_err());
    }

    #[test]
    fn decode_sentinel() {
        assert_eq!(
            decode_artifact(&[-1]).unwrap(),
            NeighbourResult::NoNeighbours
        );
    }

    #[test]
    fn artifact_path_uses_position() {
        let writer = ResultWriter::new("/out", "nb_");
        assert_eq!(writer.artifact_path(12), PathBuf::from("/out/nb_12.json"));
    }

    #[test]
    fn write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path(), "nb_");
        let path = writer
            .write(4, &NeighbourResult::SharedWith(vec![1, 9]))
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1,9]");

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["nb_4.json"]);
    }

    #[test]
    fn write_replaces_stale_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path(), "nb_");
        fs::write(writer.artifact_path(0), "[5,6,7,8,9,10]").unwrap();
        writer.write(0, &NeighbourResult::NoNeighbours).unwrap();
        assert_eq!(
            read_artifact(&writer.artifact_path(0)).unwrap(),
            NeighbourResult::NoNeighbours
        );
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("absent"), "nb_");
        let err = writer.write(0, &NeighbourResult::NoNeighbours).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn failed_commit_rolls_back_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path(), "nb_");
        // A directory in the way of position 2 makes its rename fail.
        fs::create_dir(writer.artifact_path(2)).unwrap();
        let answers = Answers::from(vec![
            NeighbourResult::SharedWith(vec![3]),
            NeighbourResult::NoNeighbours,
            NeighbourResult::NoNeighbours,
        ]);

        let err = writer.write_all(&answers).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["nb_2.json"]);
        assert!(writer.artifact_path(2).is_dir());
    }

    #[test]
    fn read_artifact_reports_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb_0.json");
        fs::write(&path, "{\"not\": \"an array\"}").unwrap();
        let err = read_artifact(&path).unwrap_err();
        assert!(matches!(err, EngineError::Artifact { .. }));
    }
}
