//! Fixed-radius density clustering over cosine distance.
//!
//! The expansion itself is `linfa-clustering`'s DBSCAN. Inputs are unit
//! vectors, where `|a - b|^2 = 2 * (1 - cos(a, b))`, so a cosine radius maps
//! onto a Euclidean tolerance without changing neighbourhoods.

use linfa::traits::Transformer;
use linfa_clustering::Dbscan;
use ndarray::{Array1, Array2};

use ecotax_shared::{EcotaxError, NOISE_CLUSTER_ID, Result};

/// Euclidean radius between unit vectors equivalent to cosine distance `eps`.
pub fn euclidean_tolerance(eps: f64) -> f64 {
    (2.0 * eps.max(0.0)).sqrt()
}

/// Label every unit-length point with a local cluster id (`0..`) or
/// [`NOISE_CLUSTER_ID`].
///
/// A point is a core point when at least `min_samples` points, itself
/// included, lie within `eps`. Clusters are grown from cores in index order
/// and a point first seen as noise is reclaimed as a border point when a later
/// cluster reaches it, so labels are deterministic.
pub fn dbscan(points: &[Vec<f64>], eps: f64, min_samples: usize) -> Result<Vec<i64>> {
    if points.is_empty() {
        return Ok(Vec::new());
    }
    if eps <= 0.0 {
        return Err(EcotaxError::validation(format!("eps must be positive, got {eps}")));
    }
    if min_samples < 2 {
        return Err(EcotaxError::validation(format!(
            "min_samples must be at least 2, got {min_samples}"
        )));
    }

    let dim = points[0].len();
    let flat: Vec<f64> = points.iter().flatten().copied().collect();
    let records = Array2::from_shape_vec((points.len(), dim), flat)
        .map_err(|e| EcotaxError::validation(format!("embeddings differ in dimension: {e}")))?;

    let memberships: std::result::Result<Array1<Option<usize>>, _> = Dbscan::params(min_samples)
        .tolerance(euclidean_tolerance(eps))
        .transform(&records);
    let memberships = memberships
        .map_err(|e| EcotaxError::validation(format!("invalid density parameters: {e}")))?;

    Ok(memberships
        .iter()
        .map(|m| m.map_or(NOISE_CLUSTER_ID, |c| c as i64))
        .collect())
}
