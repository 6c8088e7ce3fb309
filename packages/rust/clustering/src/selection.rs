//! Choosing k for centroid clustering.

use ecotax_shared::KScore;

use crate::kmeans::{KMeansFit, kmeans};
use crate::metrics::silhouette;

/// Outcome of evaluating a range of k.
#[derive(Debug, Clone)]
pub struct KSelection {
    pub scores: Vec<KScore>,
    pub silhouette_k: Option<usize>,
    pub elbow_k: Option<usize>,
    pub selected_k: usize,
    /// Fit for `selected_k`.
    pub fit: KMeansFit,
}

/// Inclusive `[k_start, k_end]` clipped to `[2, n - 1]`.
pub fn candidate_ks(k_start: usize, k_end: usize, n: usize) -> Vec<usize> {
    if n < 3 {
        return Vec::new();
    }
    let lo = k_start.max(2);
    let hi = k_end.min(n - 1);
    (lo..=hi).collect()
}

/// Largest second difference of the inertia curve; the first k when the curve
/// is too short to bend.
pub fn elbow(scores: &[KScore]) -> Option<usize> {
    if scores.len() < 3 {
        return scores.first().map(|s| s.k);
    }
    let mut best: Option<(usize, f64)> = None;
    for w in scores.windows(3) {
        let bend = w[0].inertia - 2.0 * w[1].inertia + w[2].inertia;
        if best.is_none_or(|(_, b)| bend > b) {
            best = Some((w[1].k, bend));
        }
    }
    best.map(|(k, _)| k)
}

/// Evaluate every candidate k and pick the silhouette winner, falling back to
/// the elbow when no k has a valid silhouette.
///
/// With no candidates (fewer than three points) every point lands in one
/// cluster.
pub fn select_k(points: &[Vec<f64>], k_start: usize, k_end: usize, seed: u64) -> KSelection {
    let ks = candidate_ks(k_start, k_end, points.len());
    if ks.is_empty() {
        let fit = kmeans(points, 1, seed);
        return KSelection {
            scores: Vec::new(),
            silhouette_k: None,
            elbow_k: None,
            selected_k: fit.centroids.len(),
            fit,
        };
    }

    let mut scores = Vec::with_capacity(ks.len());
    let mut fits = Vec::with_capacity(ks.len());
    for &k in &ks {
        let fit = kmeans(points, k, seed);
        let labels: Vec<i64> = fit.labels.iter().map(|&l| l as i64).collect();
        scores.push(KScore {
            k,
            inertia: fit.inertia,
            silhouette: silhouette(points, &labels),
        });
        fits.push(fit);
    }

    let mut silhouette_k: Option<(usize, f64)> = None;
    for s in &scores {
        let Some(value) = s.silhouette else { continue };
        if silhouette_k.is_none_or(|(_, best)| value > best) {
            silhouette_k = Some((s.k, value));
        }
    }
    let silhouette_k = silhouette_k.map(|(k, _)| k);
    let elbow_k = elbow(&scores);
    let selected_k = silhouette_k.or(elbow_k).unwrap_or(ks[0]);

    let idx = ks.iter().position(|&k| k == selected_k).unwrap_or(0);
    let fit = fits.swap_remove(idx);
    KSelection {
        scores,
        silhouette_k,
        elbow_k,
        selected_k,
        fit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(k: usize, inertia: f64) -> KScore {
        KScore {
            k,
            inertia,
            silhouette: None,
        }
    }

    fn ring(angles: &[f64]) -> Vec<Vec<f64>> {
        angles
            .iter()
            .map(|a| {
                let r = a.to_radians();
                vec![r.cos(), r.sin()]
            })
            .collect()
    }

    #[test]
    fn range_is_clipped() {
        assert_eq!(candidate_ks(2, 10, 5), vec![2, 3, 4]);
        assert_eq!(candidate_ks(0, 3, 10), vec![2, 3]);
        assert!(candidate_ks(2, 10, 2).is_empty());
        assert!(candidate_ks(6, 4, 10).is_empty());
    }

    #[test]
    fn elbow_finds_the_bend() {
        let scores = vec![score(2, 10.0), score(3, 2.0), score(4, 1.5), score(5, 1.2)];
        assert_eq!(elbow(&scores), Some(3));
        assert_eq!(elbow(&scores[..2]), Some(2));
        assert_eq!(elbow(&[]), None);
    }

    #[test]
    fn picks_three_for_three_groups() {
        let points = ring(&[0.0, 2.0, 4.0, 120.0, 122.0, 124.0, 240.0, 242.0, 244.0]);
        let sel = select_k(&points, 2, 6, 42);
        assert_eq!(sel.silhouette_k, Some(3));
        assert_eq!(sel.selected_k, 3);
        assert_eq!(sel.fit.centroids.len(), 3);
        assert_eq!(sel.scores.len(), 5);
    }

    #[test]
    fn tiny_input_is_one_cluster() {
        let points = ring(&[0.0, 90.0]);
        let sel = select_k(&points, 2, 10, 42);
        assert_eq!(sel.selected_k, 1);
        assert!(sel.scores.is_empty());
        assert_eq!(sel.fit.labels, vec![0, 0]);
    }
}
