//! Input bundle decoding: build the polygon collection and query list.
//!
//! A bundle is a single JSON object with these keys:
//!
//! | Key | Value |
//! |---|---|
//! | `n_polygons` | polygon count N |
//! | `n_test_polygons` | query count n_test |
//! | `test_indices` | array of n_test polygon indices, in position order |
//! | `arr_<i>` | vertex array of polygon `i`: `[[x, y], ...]`, closed |
//! | `len_<i>` | declared vertex count of polygon `i` |
//!
//! Unknown keys are ignored. Decoding either returns both structures or
//! a [`FormatError`]; nothing is computed from a malformed bundle.
//!
//! This module has no I/O. Reading the bundle from disk lives in
//! `edgeshare-io`.

use serde_json::{Map, Value, json};

use crate::types::{FormatError, Point, Polygon, PolygonCollection, QuerySet};

/// Key holding the polygon count.
pub const N_POLYGONS_KEY: &str = "n_polygons";
/// Key holding the query count.
pub const N_TEST_KEY: &str = "n_test_polygons";
/// Key holding the ordered query indices.
pub const TEST_INDICES_KEY: &str = "test_indices";

/// Key of polygon `index`'s vertex array.
#[must_use]
pub fn vertices_key(index: usize) -> String {
    format!("arr_{index}")
}

/// Key of polygon `index`'s declared vertex count.
#[must_use]
pub fn length_key(index: usize) -> String {
    format!("len_{index}")
}

/// Decode a bundle from raw JSON bytes.
///
/// # Errors
///
/// Returns [`FormatError::Json`] if the bytes are not JSON, otherwise
/// any error from [`load`].
pub fn load_slice(bytes: &[u8]) -> Result<(PolygonCollection, QuerySet), FormatError> {
    let value: Value = serde_json::from_slice(bytes)?;
    load(&value)
}

/// Decode a parsed bundle into its polygon collection and query list.
///
/// # Errors
///
/// - [`FormatError::NotAnObject`] if the top level is not an object.
/// - [`FormatError::MissingKey`] if any required key is absent.
/// - [`FormatError::InvalidValue`] if a count or index is not a
///   non-negative integer, or a coordinate is not a number.
/// - [`FormatError::LengthMismatch`] if `len_<i>` disagrees with the
///   stored vertex count, or `test_indices` holds a number of entries
///   other than `n_test_polygons`.
/// - [`FormatError::Dimensionality`] if a vertex is not a pair.
/// - Any ring validation error from [`Polygon::try_new`].
pub fn load(bundle: &Value) -> Result<(PolygonCollection, QuerySet), FormatError> {
    let map = bundle.as_object().ok_or(FormatError::NotAnObject)?;

    let n_polygons = read_count(map, N_POLYGONS_KEY)?;
    let n_test = read_count(map, N_TEST_KEY)?;
    let queries = read_queries(map, n_test)?;

    let polygons = (0..n_polygons)
        .map(|index| read_polygon(map, index))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        polygons = n_polygons,
        queries = queries.len(),
        "decoded polygon bundle"
    );
    Ok((PolygonCollection::new(polygons), queries))
}

/// Encode rings and query indices as a bundle.
///
/// The inverse of [`load`] for well-formed input. Producers (the bench
/// harness, test fixtures) use this to write bundles the engine reads.
#[must_use]
pub fn encode_bundle(rings: &[Vec<Point>], test_indices: &[usize]) -> Value {
    let mut map = Map::new();
    map.insert(N_POLYGONS_KEY.into(), json!(rings.len()));
    map.insert(N_TEST_KEY.into(), json!(test_indices.len()));
    map.insert(TEST_INDICES_KEY.into(), json!(test_indices));
    for (index, ring) in rings.iter().enumerate() {
        let coords: Vec<[f64; 2]> = ring.iter().map(|p| [p.x, p.y]).collect();
        map.insert(vertices_key(index), json!(coords));
        map.insert(length_key(index), json!(ring.len()));
    }
    Value::Object(map)
}

fn require<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value, FormatError> {
    map.get(key)
        .ok_or_else(|| FormatError::MissingKey(key.to_string()))
}

fn as_index(value: &Value, key: &str) -> Result<usize, FormatError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| FormatError::InvalidValue {
            key: key.to_string(),
            expected: "a non-negative integer",
        })
}

fn read_count(map: &Map<String, Value>, key: &str) -> Result<usize, FormatError> {
    as_index(require(map, key)?, key)
}

fn read_queries(map: &Map<String, Value>, n_test: usize) -> Result<QuerySet, FormatError> {
    let entries = require(map, TEST_INDICES_KEY)?
        .as_array()
        .ok_or_else(|| FormatError::InvalidValue {
            key: TEST_INDICES_KEY.to_string(),
            expected: "an array of polygon indices",
        })?;
    if entries.len() != n_test {
        return Err(FormatError::LengthMismatch {
            key: TEST_INDICES_KEY.to_string(),
            declared: n_test,
            actual: entries.len(),
        });
    }
    let indices = entries
        .iter()
        .map(|v| as_index(v, TEST_INDICES_KEY))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QuerySet::new(indices))
}

fn read_polygon(map: &Map<String, Value>, index: usize) -> Result<Polygon, FormatError> {
    let len_key = length_key(index);
    let arr_key = vertices_key(index);

    let declared = read_count(map, &len_key)?;
    let rows = require(map, &arr_key)?
        .as_array()
        .ok_or_else(|| FormatError::InvalidValue {
            key: arr_key.clone(),
            expected: "an array of [x, y] vertices",
        })?;
    if rows.len() != declared {
        return Err(FormatError::LengthMismatch {
            key: arr_key,
            declared,
            actual: rows.len(),
        });
    }

    let mut vertices = Vec::with_capacity(rows.len());
    for (vertex, row) in rows.iter().enumerate() {
        let coords = row.as_array().ok_or_else(|| FormatError::InvalidValue {
            key: arr_key.clone(),
            expected: "an array of [x, y] vertices",
        })?;
        let [x, y] = coords.as_slice() else {
            return Err(FormatError::Dimensionality {
                key: arr_key,
                vertex,
                dims: coords.len(),
            });
        };
        let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) else {
            return Err(FormatError::InvalidValue {
                key: arr_key,
                expected: "numeric coordinates",
            });
        };
        vertices.push(Point::new(x, y));
    }

    Polygon::try_new(index, vertices)
}
