//! Shared types for the edgeshare adjacency engine.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::matcher::VertexKey;

/// A 2D point in the bundle's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns `true` if both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<Point> for geo::Coord<f64> {
    fn from(p: Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// A simple closed polygon ring.
///
/// The first vertex equals the last. Construction through
/// [`Polygon::try_new`] guarantees the ring is closed, every coordinate
/// is finite, and at least three distinct vertices exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon(Vec<Point>);

impl Polygon {
    /// Validate and wrap a closed ring of vertices.
    ///
    /// `index` is the polygon's position in its collection and is only
    /// used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::NonFinite`] for NaN or infinite
    /// coordinates, [`FormatError::NotClosed`] if the first vertex does
    /// not equal the last, and [`FormatError::Degenerate`] if fewer than
    /// three distinct vertices remain.
    pub fn try_new(index: usize, vertices: Vec<Point>) -> Result<Self, FormatError> {
        if let Some(vertex) = vertices.iter().position(|p| !p.is_finite()) {
            return Err(FormatError::NonFinite {
                key: format!("arr_{index}"),
                vertex,
            });
        }

        let (Some(first), Some(last)) = (vertices.first(), vertices.last()) else {
            return Err(FormatError::Degenerate { index, distinct: 0 });
        };
        if first != last {
            return Err(FormatError::NotClosed { index });
        }

        let distinct = vertices
            .iter()
            .map(|&p| VertexKey::from_point(p))
            .collect::<HashSet<_>>()
            .len();
        if distinct < 3 {
            return Err(FormatError::Degenerate { index, distinct });
        }

        Ok(Self(vertices))
    }

    /// Returns the ring's vertices, closing vertex included.
    #[must_use]
    pub fn vertices(&self) -> &[Point] {
        &self.0
    }

    /// Returns the number of stored vertices, closing vertex included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for a validated ring; provided for API symmetry.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert the ring into a `geo::LineString` for geometric queries.
    #[must_use]
    pub fn to_line_string(&self) -> geo::LineString<f64> {
        geo::LineString::new(self.0.iter().map(|&p| p.into()).collect())
    }
}

/// The read-only polygon collection for one engine invocation.
///
/// Polygon `i` lives at index `i`; the collection never changes after
/// it has been loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolygonCollection(Vec<Polygon>);

impl PolygonCollection {
    /// Wrap an ordered list of polygons.
    #[must_use]
    pub const fn new(polygons: Vec<Polygon>) -> Self {
        Self(polygons)
    }

    /// Number of polygons (N).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the collection holds no polygons.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the polygon at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Polygon> {
        self.0.get(index)
    }

    /// Iterate over `(index, polygon)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Polygon)> {
        self.0.iter().enumerate()
    }
}

/// Ordered polygon indices to answer, one answer per position.
///
/// Duplicate indices are allowed and answered independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySet(Vec<usize>);

impl QuerySet {
    /// Wrap an ordered list of polygon indices.
    #[must_use]
    pub const fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// Number of query positions (n_test).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is queried.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the polygon index queried at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<usize> {
        self.0.get(position).copied()
    }

    /// Returns all queried indices in position order.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Check every queried index against `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`NeighbourError::IndexOutOfRange`] for the first position
    /// whose index is not below `collection.len()`.
    pub fn validate(&self, collection: &PolygonCollection) -> Result<(), NeighbourError> {
        let count = collection.len();
        match self.0.iter().position(|&index| index >= count) {
            Some(position) => Err(NeighbourError::IndexOutOfRange {
                position,
                index: self.0[position],
                count,
            }),
            None => Ok(()),
        }
    }
}

/// The answer for one query position.
///
/// The `-1` sentinel used by output artifacts never appears here; it is
/// produced only when an answer is encoded at the artifact boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighbourResult {
    /// Ascending, distinct indices of polygons sharing at least one edge.
    SharedWith(Vec<usize>),
    /// No polygon shares an edge with the queried one.
    NoNeighbours,
}

impl NeighbourResult {
    /// Build a result from neighbour indices in any order.
    ///
    /// Indices are sorted and deduplicated; an empty input yields
    /// [`NoNeighbours`](Self::NoNeighbours).
    #[must_use]
    pub fn from_indices(mut indices: Vec<usize>) -> Self {
        if indices.is_empty() {
            return Self::NoNeighbours;
        }
        indices.sort_unstable();
        indices.dedup();
        Self::SharedWith(indices)
    }

    /// Neighbour indices in ascending order (empty for no neighbours).
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        match self {
            Self::SharedWith(indices) => indices,
            Self::NoNeighbours => &[],
        }
    }

    /// Returns `true` if `index` is a neighbour.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.indices().binary_search(&index).is_ok()
    }

    /// Returns `true` for [`NoNeighbours`](Self::NoNeighbours).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::NoNeighbours)
    }
}

/// The input bundle is malformed.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The bundle is not a JSON document.
    #[error("bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The bundle's top level is not a JSON object.
    #[error("bundle must be a JSON object")]
    NotAnObject,

    /// A required key is absent.
    #[error("required key `{0}` is missing from the bundle")]
    MissingKey(String),

    /// A key holds a value of the wrong kind.
    #[error("key `{key}` must be {expected}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// Human-readable description of the expected value.
        expected: &'static str,
    },

    /// A declared length disagrees with the stored element count.
    #[error("key `{key}` declares {declared} entries but holds {actual}")]
    LengthMismatch {
        /// The key whose contents were counted.
        key: String,
        /// The length declared by the bundle.
        declared: usize,
        /// The number of entries actually stored.
        actual: usize,
    },

    /// A vertex does not have exactly two coordinates.
    #[error("vertex {vertex} of `{key}` has {dims} coordinates, expected 2")]
    Dimensionality {
        /// The vertex array key.
        key: String,
        /// Position of the vertex within the array.
        vertex: usize,
        /// Number of coordinates found.
        dims: usize,
    },

    /// A vertex coordinate is NaN or infinite.
    #[error("vertex {vertex} of `{key}` has a non-finite coordinate")]
    NonFinite {
        /// The vertex array key.
        key: String,
        /// Position of the vertex within the array.
        vertex: usize,
    },

    /// The first vertex of a ring does not equal its last.
    #[error("polygon {index} is not closed")]
    NotClosed {
        /// Index of the polygon.
        index: usize,
    },

    /// A ring has fewer than three distinct vertices.
    #[error("polygon {index} has {distinct} distinct vertices, expected at least 3")]
    Degenerate {
        /// Index of the polygon.
        index: usize,
        /// Number of distinct vertices found.
        distinct: usize,
    },
}

/// Parallel execution failed.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The per-call worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    /// A worker panicked before finishing its partition.
    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked {
        /// Slot number of the failed worker.
        worker: usize,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// Positions were left without an answer after every worker joined.
    #[error("{missing} of {total} query positions have no answer after all workers joined")]
    Incomplete {
        /// Number of unanswered positions.
        missing: usize,
        /// Total number of query positions.
        total: usize,
    },
}

/// Errors surfaced by a neighbour search.
#[derive(Debug, thiserror::Error)]
pub enum NeighbourError {
    /// The input bundle is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A query references a polygon that does not exist.
    #[error(
        "query position {position} references polygon {index}, but the collection holds {count} polygons"
    )]
    IndexOutOfRange {
        /// Query position holding the bad index.
        position: usize,
        /// The out-of-range polygon index.
        index: usize,
        /// Number of polygons in the collection.
        count: usize,
    },

    /// Parallel execution failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
