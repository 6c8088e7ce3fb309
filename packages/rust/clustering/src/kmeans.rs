//! Seeded k-means with k-means++ initialization.
//!
//! Points are expected to be unit length, so squared Euclidean distance is a
//! monotone function of cosine distance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distance::{centroid, squared_euclidean};

/// Independent initializations per fit; the lowest-inertia run wins.
const RESTARTS: u64 = 4;
const MAX_ITERATIONS: usize = 100;

/// Result of one k-means fit.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Fit `k` clusters. `k` is clamped to `[1, n]`; empty input gives an empty fit.
pub fn kmeans(points: &[Vec<f64>], k: usize, seed: u64) -> KMeansFit {
    let n = points.len();
    if n == 0 {
        return KMeansFit {
            labels: Vec::new(),
            centroids: Vec::new(),
            inertia: 0.0,
        };
    }
    let k = k.clamp(1, n);

    let mut best: Option<KMeansFit> = None;
    for restart in 0..RESTARTS {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(restart));
        let fit = lloyd(points, plus_plus_init(points, k, &mut rng));
        if best.as_ref().is_none_or(|b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }
    best.unwrap_or_else(|| lloyd(points, points[..k].to_vec()))
}

/// k-means++: each next centroid is drawn with probability proportional to
/// its squared distance from the nearest chosen centroid.
fn plus_plus_init(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut chosen = vec![rng.gen_range(0..n)];

    while chosen.len() < k {
        let distances: Vec<f64> = points
            .iter()
            .map(|p| {
                chosen
                    .iter()
                    .map(|&c| squared_euclidean(p, &points[c]))
                    .fold(f64::MAX, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        let next = if total <= 0.0 {
            // Every remaining point coincides with a centroid.
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        } else {
            let threshold = rng.r#gen::<f64>() * total;
            let mut cumsum = 0.0;
            let mut pick = n - 1;
            for (i, d) in distances.iter().enumerate() {
                cumsum += d;
                if cumsum >= threshold && *d > 0.0 {
                    pick = i;
                    break;
                }
            }
            pick
        };
        chosen.push(next);
    }

    chosen.into_iter().map(|i| points[i].clone()).collect()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::MAX);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_euclidean(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> KMeansFit {
    let k = centroids.len();
    let dim = points[0].len();
    let mut labels = vec![usize::MAX; points.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let (c, _) = nearest(p, &centroids);
            if labels[i] != c {
                labels[i] = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for c in 0..k {
            if labels.iter().any(|&l| l == c) {
                centroids[c] = centroid(
                    points.iter().zip(&labels).filter(|(_, l)| **l == c).map(|(p, _)| p),
                    dim,
                );
            }
        }

        // Re-seed empty clusters with the point farthest from its centroid.
        for c in 0..k {
            if labels.iter().any(|&l| l == c) {
                continue;
            }
            let farthest = points
                .iter()
                .enumerate()
                .map(|(i, p)| (i, squared_euclidean(p, &centroids[labels[i]])))
                .fold((0, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
            centroids[c] = points[farthest.0].clone();
            labels[farthest.0] = c;
        }
    }

    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, &l)| squared_euclidean(p, &centroids[l]))
        .sum();
    KMeansFit {
        labels,
        centroids,
        inertia,
    }
}
