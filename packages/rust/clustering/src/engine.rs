//! Clustering Engine: categorize, cluster per category, score, persist.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use ecotax_embeddings::VectorStore;
use ecotax_shared::{
    CategoryMetrics, CategoryRule, Cluster, ClusterAssignment, ClusterMember, ClusterSummary,
    ClusteringConfig, ClusteringMethod, ClusteringMetrics, ClustersDocument, EcotaxError,
    EmbeddingRecord, NOISE_CLUSTER_ID, Result, merge_counter, write_json,
};
use ecotax_storage::MetadataStore;

use crate::category::Categorizer;
use crate::dbscan::dbscan;
use crate::distance::normalize;
use crate::kmeans::kmeans;
use crate::metrics::{davies_bouldin, silhouette};
use crate::selection::select_k;

/// File written under the visualization directory.
const SUMMARY_ARTIFACT: &str = "cluster_summary.json";

/// Method and parameters for one category after overrides.
#[derive(Debug, Clone)]
struct EffectiveParams {
    method: ClusteringMethod,
    eps: f64,
    min_samples: usize,
    k_start: usize,
    k_end: usize,
    k: Option<usize>,
}

/// Local labels plus the metrics of one category run.
struct CategoryRun {
    labels: Vec<i64>,
    metrics: CategoryMetrics,
}

/// Groups title embeddings into occupation clusters.
pub struct ClusteringEngine {
    config: ClusteringConfig,
    store: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl ClusteringEngine {
    pub fn new(
        config: ClusteringConfig,
        store: Arc<dyn VectorStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            store,
            metadata,
        }
    }

    /// Cluster every embedding of the configured chunk type and write the
    /// result to `output`.
    #[instrument(skip_all, fields(chunk_type = %self.config.chunk_type, method = %self.config.method))]
    pub async fn run(&self, output: &Path) -> Result<ClustersDocument> {
        let start = Instant::now();
        let categorizer = Categorizer::new(&self.config.categories, &self.config.default_category)?;

        let mut records = self.store.list_embeddings(&self.config.chunk_type).await?;
        if records.is_empty() {
            return Err(EcotaxError::NoEmbeddingsAvailable {
                chunk_type: self.config.chunk_type.clone(),
            });
        }
        records.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        let points: Vec<Vec<f64>> = records.iter().map(|r| normalize(&r.embedding)).collect();

        let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            let text = if record.text.trim().is_empty() {
                &record.chunk_id
            } else {
                &record.text
            };
            by_category
                .entry(categorizer.categorize(text).to_string())
                .or_default()
                .push(i);
        }
        debug!(categories = by_category.len(), points = records.len(), "categorized titles");

        let mut clusters = BTreeMap::new();
        let mut category_breakdown = BTreeMap::new();
        let mut global_labels = vec![NOISE_CLUSTER_ID; records.len()];
        let mut next_id = 1i64;

        for (category, indices) in &by_category {
            let params = self.params_for(category);
            let subset: Vec<Vec<f64>> = indices.iter().map(|&i| points[i].clone()).collect();
            let run = self.cluster_category(&subset, &params)?;

            let mut local_ids: Vec<i64> = run
                .labels
                .iter()
                .copied()
                .filter(|&l| l != NOISE_CLUSTER_ID)
                .collect();
            local_ids.sort_unstable();
            local_ids.dedup();
            let remap: BTreeMap<i64, i64> = local_ids
                .into_iter()
                .map(|local| {
                    let id = next_id;
                    next_id += 1;
                    (local, id)
                })
                .collect();

            let mut groups: BTreeMap<i64, Vec<&EmbeddingRecord>> = BTreeMap::new();
            for (pos, &i) in indices.iter().enumerate() {
                let id = remap
                    .get(&run.labels[pos])
                    .copied()
                    .unwrap_or(NOISE_CLUSTER_ID);
                global_labels[i] = id;
                groups.entry(id).or_default().push(&records[i]);
            }

            for (id, members) in groups {
                let cluster =
                    build_cluster(category, id, params.method, &members, run.metrics.silhouette);
                clusters.insert(cluster.cluster_key.clone(), cluster);
            }

            debug!(
                category = %category,
                method = %params.method,
                clusters = run.metrics.cluster_count,
                noise = run.metrics.noise_count,
                "clustered category"
            );
            category_breakdown.insert(category.clone(), run.metrics);
        }

        let mut metrics = ClusteringMetrics {
            total_points: records.len(),
            cluster_count: category_breakdown.values().map(|m| m.cluster_count).sum(),
            noise_count: category_breakdown.values().map(|m| m.noise_count).sum(),
            silhouette: silhouette(&points, &global_labels),
            davies_bouldin: davies_bouldin(&points, &global_labels),
            persisted_assignments: 0,
            persistence_error: None,
            category_breakdown,
        };

        self.persist(&clusters, &mut metrics).await;

        let summary = summarize(&clusters);
        let document = ClustersDocument {
            method: self.config.method,
            chunk_type: self.config.chunk_type.clone(),
            metrics,
            clusters,
            summary,
            generated_at: Utc::now(),
        };

        if let Some(dir) = &self.config.viz_dir {
            let artifact = json!({
                "method": document.method,
                "metrics": document.metrics,
                "summary": document.summary,
            });
            if let Err(e) = write_json(&dir.join(SUMMARY_ARTIFACT), &artifact) {
                warn!(dir = %dir.display(), error = %e, "failed to write cluster summary artifact");
            }
        }

        write_json(output, &document)?;
        info!(
            points = document.metrics.total_points,
            clusters = document.metrics.cluster_count,
            noise = document.metrics.noise_count,
            persisted = document.metrics.persisted_assignments,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "clustering complete"
        );
        Ok(document)
    }

    fn params_for(&self, category: &str) -> EffectiveParams {
        let rule = self
            .config
            .categories
            .iter()
            .find(|r| r.name == category)
            .cloned()
            .unwrap_or_else(|| CategoryRule {
                name: category.to_string(),
                ..Default::default()
            });
        EffectiveParams {
            method: rule.method.unwrap_or(self.config.method),
            eps: rule.eps.unwrap_or(self.config.eps),
            min_samples: rule.min_samples.unwrap_or(self.config.min_samples),
            k_start: rule.k_start.unwrap_or(self.config.k_start),
            k_end: rule.k_end.unwrap_or(self.config.k_end),
            k: rule.k.or(self.config.k),
        }
    }

    fn cluster_category(
        &self,
        points: &[Vec<f64>],
        params: &EffectiveParams,
    ) -> Result<CategoryRun> {
        let mut metrics = CategoryMetrics {
            method: params.method,
            points: points.len(),
            cluster_count: 0,
            noise_count: 0,
            silhouette: None,
            davies_bouldin: None,
            inertia: None,
            eps: None,
            min_samples: None,
            selected_k: None,
            silhouette_k: None,
            elbow_k: None,
            k_scores: Vec::new(),
        };

        let labels: Vec<i64> = match params.method {
            ClusteringMethod::Density => {
                metrics.eps = Some(params.eps);
                metrics.min_samples = Some(params.min_samples);
                dbscan(points, params.eps, params.min_samples)?
            }
            ClusteringMethod::Centroid => {
                let fit = match params.k {
                    Some(k) => {
                        let fit = kmeans(points, k, self.config.seed);
                        metrics.selected_k = Some(fit.centroids.len());
                        fit
                    }
                    None => {
                        let selection =
                            select_k(points, params.k_start, params.k_end, self.config.seed);
                        metrics.selected_k = Some(selection.selected_k);
                        metrics.silhouette_k = selection.silhouette_k;
                        metrics.elbow_k = selection.elbow_k;
                        metrics.k_scores = selection.scores;
                        selection.fit
                    }
                };
                metrics.inertia = Some(fit.inertia);
                fit.labels.iter().map(|&l| l as i64).collect()
            }
        };

        let mut distinct: Vec<i64> = labels
            .iter()
            .copied()
            .filter(|&l| l != NOISE_CLUSTER_ID)
            .collect();
        distinct.sort_unstable();
        distinct.dedup();
        metrics.cluster_count = distinct.len();
        metrics.noise_count = labels.iter().filter(|&&l| l == NOISE_CLUSTER_ID).count();
        metrics.silhouette = silhouette(points, &labels);
        metrics.davies_bouldin = davies_bouldin(points, &labels);

        Ok(CategoryRun { labels, metrics })
    }

    /// Mirror non-noise memberships; the first failure ends the step.
    async fn persist(&self, clusters: &BTreeMap<String, Cluster>, metrics: &mut ClusteringMetrics) {
        // Assignments from an earlier run are replaced, not merged.
        let mut seen: BTreeSet<&'static str> = BTreeSet::new();
        let methods: Vec<ClusteringMethod> = std::iter::once(self.config.method)
            .chain(metrics.category_breakdown.values().map(|m| m.method))
            .filter(|m| seen.insert(m.as_str()))
            .collect();
        for method in methods {
            match self.metadata.clear_cluster_assignments(method).await {
                Ok(removed) => debug!(%method, removed, "cleared previous cluster assignments"),
                Err(e) => {
                    warn!(%method, error = %e, "clearing previous cluster assignments failed");
                    metrics.persistence_error = Some(e.to_string());
                    return;
                }
            }
        }

        for cluster in clusters.values().filter(|c| !c.is_noise()) {
            for member in &cluster.members {
                if member.normalized_title.is_empty() {
                    continue;
                }
                let assignment = ClusterAssignment {
                    normalized_title: member.normalized_title.clone(),
                    cluster_id: cluster.cluster_id,
                    method: cluster.method,
                    quality_score: metrics.silhouette,
                    metadata: json!({
                        "category": cluster.category,
                        "cluster_key": cluster.cluster_key,
                    }),
                };
                if let Err(e) = self.metadata.upsert_cluster_assignment(&assignment).await {
                    warn!(
                        title = %member.normalized_title,
                        error = %e,
                        "cluster assignment persistence failed, skipping the rest"
                    );
                    metrics.persistence_error = Some(e.to_string());
                    return;
                }
                metrics.persisted_assignments += 1;
            }
        }
    }
}

fn build_cluster(
    category: &str,
    cluster_id: i64,
    method: ClusteringMethod,
    records: &[&EmbeddingRecord],
    quality: Option<f64>,
) -> Cluster {
    let mut members: Vec<ClusterMember> = records
        .iter()
        .map(|r| ClusterMember {
            normalized_title: r.chunk_id.clone(),
            title: r.text.clone(),
            frequency: r.frequency(),
        })
        .collect();
    members.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.normalized_title.cmp(&b.normalized_title))
    });

    let mut sources = BTreeMap::new();
    for record in records {
        merge_counter(&mut sources, &record.sources());
    }

    let cluster_key = if cluster_id == NOISE_CLUSTER_ID {
        format!("{category}:noise")
    } else {
        format!("{category}:{cluster_id}")
    };

    Cluster {
        cluster_key,
        cluster_id,
        category: category.to_string(),
        method,
        representative_title: members
            .iter()
            .map(|m| m.title.as_str())
            .find(|t| !t.trim().is_empty())
            .map(str::to_string),
        frequency: members.iter().map(|m| m.frequency).sum(),
        sources,
        quality,
        members,
    }
}

/// Non-noise clusters, largest first.
fn summarize(clusters: &BTreeMap<String, Cluster>) -> Vec<ClusterSummary> {
    let mut summary: Vec<ClusterSummary> = clusters
        .values()
        .filter(|c| !c.is_noise())
        .map(|c| ClusterSummary {
            cluster_key: c.cluster_key.clone(),
            category: c.category.clone(),
            size: c.members.len(),
            frequency: c.frequency,
            representative_title: c.representative_title.clone(),
        })
        .collect();
    summary.sort_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then_with(|| b.frequency.cmp(&a.frequency))
            .then_with(|| a.cluster_key.cmp(&b.cluster_key))
    });
    summary
}
