//! Cluster quality scores.
//!
//! Both scores ignore noise points and are `None` when fewer than two
//! clusters remain.

use std::collections::BTreeMap;

use ecotax_shared::NOISE_CLUSTER_ID;

use crate::distance::{centroid, cosine_distance, squared_euclidean};

/// Group point indices by label, skipping noise.
fn groups(labels: &[i64]) -> BTreeMap<i64, Vec<usize>> {
    let mut out: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        if label != NOISE_CLUSTER_ID {
            out.entry(label).or_default().push(i);
        }
    }
    out
}

/// Mean silhouette coefficient under cosine distance.
///
/// Requires `2 <= clusters <= n - 1` over the non-noise points. Points in a
/// singleton cluster score 0.
pub fn silhouette(points: &[Vec<f64>], labels: &[i64]) -> Option<f64> {
    let groups = groups(labels);
    let n: usize = groups.values().map(Vec::len).sum();
    if groups.len() < 2 || groups.len() >= n {
        return None;
    }

    let mut total = 0.0;
    for (label, members) in &groups {
        for &i in members {
            if members.len() == 1 {
                continue;
            }
            let a = members
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| cosine_distance(&points[i], &points[j]))
                .sum::<f64>()
                / (members.len() - 1) as f64;
            let b = groups
                .iter()
                .filter(|(other, _)| *other != label)
                .map(|(_, others)| {
                    others
                        .iter()
                        .map(|&j| cosine_distance(&points[i], &points[j]))
                        .sum::<f64>()
                        / others.len() as f64
                })
                .fold(f64::MAX, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                total += (b - a) / denom;
            }
        }
    }
    Some(total / n as f64)
}

/// Davies–Bouldin index under Euclidean distance (lower is better).
///
/// Centroid pairs at zero distance are skipped.
pub fn davies_bouldin(points: &[Vec<f64>], labels: &[i64]) -> Option<f64> {
    let groups = groups(labels);
    if groups.len() < 2 {
        return None;
    }
    let dim = points.first().map_or(0, Vec::len);

    let stats: Vec<(Vec<f64>, f64)> = groups
        .values()
        .map(|members| {
            let c = centroid(members.iter().map(|&i| &points[i]), dim);
            let scatter = members
                .iter()
                .map(|&i| squared_euclidean(&points[i], &c).sqrt())
                .sum::<f64>()
                / members.len() as f64;
            (c, scatter)
        })
        .collect();

    let mut total = 0.0;
    for (i, (ci, si)) in stats.iter().enumerate() {
        let worst = stats
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .filter_map(|(_, (cj, sj))| {
                let d = squared_euclidean(ci, cj).sqrt();
                (d > 0.0).then(|| (si + sj) / d)
            })
            .fold(0.0, f64::max);
        total += worst;
    }
    Some(total / stats.len() as f64)
}

/// Sum of squared distances from each non-noise point to its cluster centroid.
pub fn inertia(points: &[Vec<f64>], labels: &[i64]) -> f64 {
    let dim = points.first().map_or(0, Vec::len);
    groups(labels)
        .values()
        .map(|members| {
            let c = centroid(members.iter().map(|&i| &points[i]), dim);
            members
                .iter()
                .map(|&i| squared_euclidean(&points[i], &c))
                .sum::<f64>()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tight_groups() -> (Vec<Vec<f64>>, Vec<i64>) {
        let points = vec![
            vec![1.0, 0.0],
            vec![0.995, 0.0998],
            vec![0.0, 1.0],
            vec![0.0998, 0.995],
        ];
        (points, vec![0, 0, 1, 1])
    }

    #[test]
    fn well_separated_groups_score_high() {
        let (points, labels) = two_tight_groups();
        let s = silhouette(&points, &labels).unwrap();
        assert!(s > 0.9, "silhouette {s}");
        let db = davies_bouldin(&points, &labels).unwrap();
        assert!(db < 0.2, "davies-bouldin {db}");
    }

    #[test]
    fn undefined_with_fewer_than_two_clusters() {
        let (points, _) = two_tight_groups();
        assert!(silhouette(&points, &[0, 0, 0, 0]).is_none());
        assert!(davies_bouldin(&points, &[0, 0, 0, 0]).is_none());
        let noisy = [0, NOISE_CLUSTER_ID, NOISE_CLUSTER_ID, NOISE_CLUSTER_ID];
        assert!(silhouette(&points, &noisy).is_none());
    }

    #[test]
    fn every_point_its_own_cluster_is_undefined() {
        let (points, _) = two_tight_groups();
        assert!(silhouette(&points, &[0, 1, 2, 3]).is_none());
    }

    #[test]
    fn noise_is_ignored() {
        let (mut points, mut labels) = two_tight_groups();
        points.push(vec![-1.0, 0.0]);
        labels.push(NOISE_CLUSTER_ID);
        let with_noise = silhouette(&points, &labels).unwrap();
        let (points, labels) = two_tight_groups();
        assert!((with_noise - silhouette(&points, &labels).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn inertia_of_identical_members_is_zero() {
        let points = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(inertia(&points, &[0, 0, 1]), 0.0);
        assert!(inertia(&points, &[0, 0, 0]) > 0.0);
    }
}
