//! Shared-edge adjacency: canonical edges and neighbour search.
//!
//! Two polygons are neighbours when they have at least one edge in
//! common. Edges are compared by exact coordinate equality, independent
//! of direction: `(a, b)` and `(b, a)` are the same edge. No tolerance is
//! applied, so shared borders must carry bit-identical coordinates.
//!
//! This module defines the free functions [`edges_of`], [`shares_edge`]
//! and [`neighbours_of`], the [`NeighbourFinder`] trait used by the
//! dispatcher, and the [`MatcherKind`] enum for selecting a search
//! strategy at runtime. All strategies return identical results.

use std::collections::{HashMap, HashSet};

use geo::BoundingRect;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use serde::{Deserialize, Serialize};

use crate::types::{NeighbourResult, Point, Polygon, PolygonCollection};

/// A vertex reduced to a hashable, totally ordered key.
///
/// Two keys are equal exactly when the coordinates compare equal with
/// `==`. Negative zero is folded into positive zero so `-0.0` and `0.0`
/// produce the same key. Coordinates are assumed finite, which
/// [`Polygon::try_new`] guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexKey {
    x: u64,
    y: u64,
}

impl VertexKey {
    /// Build the key for a point.
    #[must_use]
    pub fn from_point(p: Point) -> Self {
        // -0.0 + 0.0 == +0.0
        Self {
            x: (p.x + 0.0).to_bits(),
            y: (p.y + 0.0).to_bits(),
        }
    }

    /// Recover the point this key was built from.
    #[must_use]
    pub const fn to_point(self) -> Point {
        Point::new(f64::from_bits(self.x), f64::from_bits(self.y))
    }
}

/// An undirected edge in canonical orientation (smaller key first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    start: VertexKey,
    end: VertexKey,
}

impl Edge {
    /// Build the canonical edge between two points.
    ///
    /// Returns `None` when both points coincide: a zero-length edge is a
    /// point, and touching at a point does not make two polygons
    /// neighbours.
    #[must_use]
    pub fn new(a: Point, b: Point) -> Option<Self> {
        let ka = VertexKey::from_point(a);
        let kb = VertexKey::from_point(b);
        match ka.cmp(&kb) {
            std::cmp::Ordering::Less => Some(Self { start: ka, end: kb }),
            std::cmp::Ordering::Greater => Some(Self { start: kb, end: ka }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The edge's endpoints in canonical order.
    #[must_use]
    pub const fn endpoints(self) -> (Point, Point) {
        (self.start.to_point(), self.end.to_point())
    }
}

/// The set of distinct canonical edges of one polygon.
pub type EdgeSet = HashSet<Edge>;

/// Derive the canonical edge set of a polygon.
///
/// For vertices `v0..vk` with `v0 == vk`, yields the edges
/// `(v0, v1) .. (v(k-1), vk)`; the closing edge is the last pair.
/// Repeated consecutive vertices contribute no edge.
#[must_use]
pub fn edges_of(polygon: &Polygon) -> EdgeSet {
    polygon
        .vertices()
        .windows(2)
        .filter_map(|pair| Edge::new(pair[0], pair[1]))
        .collect()
}

/// Returns `true` if the two edge sets have at least one edge in common.
fn sets_intersect(a: &EdgeSet, b: &EdgeSet) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().any(|edge| large.contains(edge))
}

/// Returns `true` if polygons `a` and `b` share at least one edge.
#[must_use]
pub fn shares_edge(a: &Polygon, b: &Polygon) -> bool {
    sets_intersect(&edges_of(a), &edges_of(b))
}

/// Find every polygon sharing an edge with `collection[target]`.
///
/// Scans all other indices in order. This is the reference definition
/// the [`AdjacencyMatcher`] strategies are checked against; it derives
/// edge sets on every call.
///
/// Returns [`NeighbourResult::NoNeighbours`] when `target` is out of
/// range.
#[must_use]
pub fn neighbours_of(target: usize, collection: &PolygonCollection) -> NeighbourResult {
    let Some(polygon) = collection.get(target) else {
        return NeighbourResult::NoNeighbours;
    };
    let target_edges = edges_of(polygon);
    let matches = collection
        .iter()
        .filter(|&(idx, other)| idx != target && sets_intersect(&target_edges, &edges_of(other)))
        .map(|(idx, _)| idx)
        .collect();
    NeighbourResult::from_indices(matches)
}

/// Selects which neighbour search strategy to use.
///
/// Every strategy produces the same results; they differ only in
/// preparation cost and per-query cost. Prepared state lives for a
/// single engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatcherKind {
    /// Compare the target's edge set against every other polygon's.
    ///
    /// O(N) candidates per query. Edge sets are derived once up front.
    Scan,

    /// Map each edge to the polygons owning it.
    ///
    /// Average O(E) per query after an O(total edges) build.
    #[default]
    EdgeIndex,

    /// Prune candidates with an R*-tree over bounding boxes, then compare
    /// edge sets of the survivors only.
    ///
    /// A shared edge forces the two bounding boxes to at least touch, so
    /// pruning never drops a true neighbour.
    Envelope,
}

/// Answers "which polygons share an edge with polygon `target`?".
///
/// Implementations must be safe to share between worker threads and
/// must be deterministic: the answer for a target never depends on
/// call order or on which thread asks.
pub trait NeighbourFinder: Sync {
    /// Find the neighbours of the polygon at `target`.
    fn neighbours_of(&self, target: usize) -> NeighbourResult;
}

/// A bounding box tagged with its polygon index, for R*-tree insertion.
type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Prepared per-call search state for one [`MatcherKind`].
enum Strategy {
    Scan {
        edges: Vec<EdgeSet>,
    },
    EdgeIndex {
        owners: HashMap<Edge, Vec<usize>>,
    },
    Envelope {
        edges: Vec<EdgeSet>,
        envelopes: Vec<AABB<[f64; 2]>>,
        tree: RTree<IndexedEnvelope>,
    },
}

/// Read-only neighbour search over one [`PolygonCollection`].
///
/// Built once per invocation and shared by reference with every worker.
pub struct AdjacencyMatcher<'a> {
    collection: &'a PolygonCollection,
    kind: MatcherKind,
    strategy: Strategy,
}

impl<'a> AdjacencyMatcher<'a> {
    /// Prepare the chosen strategy over `collection`.
    #[must_use]
    pub fn new(collection: &'a PolygonCollection, kind: MatcherKind) -> Self {
        let strategy = match kind {
            MatcherKind::Scan => Strategy::Scan {
                edges: all_edge_sets(collection),
            },
            MatcherKind::EdgeIndex => Strategy::EdgeIndex {
                owners: build_edge_owners(collection),
            },
            MatcherKind::Envelope => {
                let envelopes: Vec<_> = collection.iter().map(|(_, p)| envelope_of(p)).collect();
                let tree = RTree::bulk_load(
                    envelopes
                        .iter()
                        .enumerate()
                        .map(|(idx, env)| {
                            GeomWithData::new(Rectangle::from_aabb(*env), idx)
                        })
                        .collect(),
                );
                Strategy::Envelope {
                    edges: all_edge_sets(collection),
                    envelopes,
                    tree,
                }
            }
        };
        tracing::debug!(
            strategy = ?kind,
            polygons = collection.len(),
            "prepared adjacency matcher"
        );
        Self {
            collection,
            kind,
            strategy,
        }
    }

    /// The strategy this matcher was prepared with.
    #[must_use]
    pub const fn kind(&self) -> MatcherKind {
        self.kind
    }
}

impl NeighbourFinder for AdjacencyMatcher<'_> {
    fn neighbours_of(&self, target: usize) -> NeighbourResult {
        if target >= self.collection.len() {
            return NeighbourResult::NoNeighbours;
        }

        let matches = match &self.strategy {
            Strategy::Scan { edges } => {
                let target_edges = &edges[target];
                edges
                    .iter()
                    .enumerate()
                    .filter(|&(idx, other)| idx != target && sets_intersect(target_edges, other))
                    .map(|(idx, _)| idx)
                    .collect()
            }
            Strategy::EdgeIndex { owners } => {
                let mut found = Vec::new();
                if let Some(polygon) = self.collection.get(target) {
                    for edge in edges_of(polygon) {
                        if let Some(list) = owners.get(&edge) {
                            found.extend(list.iter().copied().filter(|&idx| idx != target));
                        }
                    }
                }
                found
            }
            Strategy::Envelope {
                edges,
                envelopes,
                tree,
            } => {
                let target_edges = &edges[target];
                tree.locate_in_envelope_intersecting(&envelopes[target])
                    .map(|candidate| candidate.data)
                    .filter(|&idx| idx != target && sets_intersect(target_edges, &edges[idx]))
                    .collect()
            }
        };

        NeighbourResult::from_indices(matches)
    }
}

fn all_edge_sets(collection: &PolygonCollection) -> Vec<EdgeSet> {
    collection.iter().map(|(_, p)| edges_of(p)).collect()
}

/// Map every canonical edge to the ascending list of polygons owning it.
fn build_edge_owners(collection: &PolygonCollection) -> HashMap<Edge, Vec<usize>> {
    let mut owners: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (idx, polygon) in collection.iter() {
        for edge in edges_of(polygon) {
            owners.entry(edge).or_default().push(idx);
        }
    }
    owners
}

/// Axis-aligned bounding box of a polygon, as an `rstar` envelope.
fn envelope_of(polygon: &Polygon) -> AABB<[f64; 2]> {
    polygon.to_line_string().bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
