//! Core domain types and stage documents for the occupation taxonomy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EcotaxError;

/// A multiset of string values (source tags, companies, locations).
pub type Counter = BTreeMap<String, u64>;

/// Maximum raw example blobs retained per aggregated title.
pub const MAX_TITLE_EXAMPLES: usize = 10;

/// Maximum representative titles retained per progression edge.
pub const MAX_EDGE_EXAMPLES: usize = 5;

/// Cluster id reserved for points no dense region claimed.
pub const NOISE_CLUSTER_ID: i64 = -1;

// ---------------------------------------------------------------------------
// RawPosting / AggregatedTitle
// ---------------------------------------------------------------------------

/// One input record after field extraction and title normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPosting {
    /// Title exactly as it appeared in the source (trimmed).
    pub title: String,
    /// Dedup key produced by the normalization service.
    pub normalized_title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Source tag (record `source` field, else the file stem).
    pub source: String,
    /// The full raw record, kept as an example blob.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Frequency-weighted entry for one normalized title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTitle {
    pub normalized_title: String,
    /// First raw spelling observed for this key.
    pub canonical_title: String,
    pub frequency: u64,
    #[serde(default)]
    pub sources: Counter,
    #[serde(default)]
    pub companies: Counter,
    #[serde(default)]
    pub locations: Counter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub examples: Vec<serde_json::Value>,
}

impl AggregatedTitle {
    /// Start a new aggregate from its first posting.
    pub fn from_posting(posting: &RawPosting) -> Self {
        let mut agg = Self {
            normalized_title: posting.normalized_title.clone(),
            canonical_title: posting.title.clone(),
            frequency: 0,
            sources: Counter::new(),
            companies: Counter::new(),
            locations: Counter::new(),
            first_seen: None,
            last_seen: None,
            examples: Vec::new(),
        };
        agg.record(posting);
        agg
    }

    /// Fold one more posting with the same normalized title into this entry.
    pub fn record(&mut self, posting: &RawPosting) {
        self.frequency += 1;
        *self.sources.entry(posting.source.clone()).or_default() += 1;
        if let Some(company) = &posting.company {
            *self.companies.entry(company.clone()).or_default() += 1;
        }
        if let Some(location) = &posting.location {
            *self.locations.entry(location.clone()).or_default() += 1;
        }
        self.observe_timestamps(posting.posted_at, posting.posted_at);
        if self.examples.len() < MAX_TITLE_EXAMPLES {
            self.examples
                .push(serde_json::Value::Object(posting.metadata.clone()));
        }
    }

    /// Merge another aggregate for the same key (e.g. a previous run's entry).
    ///
    /// The receiver keeps its canonical title; counters and frequencies are
    /// summed and examples are unioned up to [`MAX_TITLE_EXAMPLES`].
    pub fn merge(&mut self, other: &AggregatedTitle) {
        self.frequency += other.frequency;
        merge_counter(&mut self.sources, &other.sources);
        merge_counter(&mut self.companies, &other.companies);
        merge_counter(&mut self.locations, &other.locations);
        self.observe_timestamps(other.first_seen, other.last_seen);
        for example in &other.examples {
            if self.examples.len() >= MAX_TITLE_EXAMPLES {
                break;
            }
            if !self.examples.contains(example) {
                self.examples.push(example.clone());
            }
        }
    }

    fn observe_timestamps(&mut self, earliest: Option<DateTime<Utc>>, latest: Option<DateTime<Utc>>) {
        if let Some(ts) = earliest {
            self.first_seen = Some(self.first_seen.map_or(ts, |cur| cur.min(ts)));
        }
        if let Some(ts) = latest {
            self.last_seen = Some(self.last_seen.map_or(ts, |cur| cur.max(ts)));
        }
    }
}

/// Add every count in `other` into `target`.
pub fn merge_counter(target: &mut Counter, other: &Counter) {
    for (key, count) in other {
        *target.entry(key.clone()).or_default() += count;
    }
}

// ---------------------------------------------------------------------------
// Data Loader document
// ---------------------------------------------------------------------------

/// Counters describing one Data Loader run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderMetrics {
    pub sources_requested: usize,
    pub records_read: u64,
    pub records_accepted: u64,
    pub invalid_titles: u64,
    pub unparseable_timestamps: u64,
    pub malformed_records: u64,
    pub malformed_sources: u64,
    pub filtered_source: u64,
    #[serde(default)]
    pub skipped_sources: Vec<String>,
    pub truncated: bool,
    pub merged_previous: bool,
    pub previous_titles: usize,
    pub unique_titles: usize,
    pub dropped_low_frequency: usize,
}

/// Summary statistics over the persisted title frequencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub count: usize,
    pub total_frequency: u64,
    pub mean_frequency: f64,
    pub median_frequency: f64,
    pub p95_frequency: f64,
    pub min_frequency: u64,
    pub max_frequency: u64,
}

/// `normalized_titles.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTitlesDocument {
    pub titles: BTreeMap<String, AggregatedTitle>,
    pub metrics: LoaderMetrics,
    pub generated_at: DateTime<Utc>,
    pub quality: QualityStats,
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// One embeddable chunk with its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// The normalized title.
    pub chunk_id: String,
    /// Logical namespace, e.g. `job_title`.
    pub chunk_type: String,
    /// The canonical title that was embedded.
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl EmbeddingRecord {
    /// Frequency carried in the record metadata (1 when absent).
    pub fn frequency(&self) -> u64 {
        self.metadata
            .get("frequency")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1)
    }

    /// Source counts carried in the record metadata.
    pub fn sources(&self) -> Counter {
        self.metadata
            .get("sources")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Embedding Generator stage output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingReport {
    pub chunk_type: String,
    pub total_titles: usize,
    pub new_embeddings: usize,
    pub skipped: usize,
    pub expected_dimension: usize,
    pub batches: usize,
    /// Already-embedded records whose frequency/source metadata changed.
    #[serde(default)]
    pub refreshed_metadata: usize,
    pub metadata_failures: usize,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

/// Clustering algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMethod {
    /// Fixed-radius density clustering with noise.
    Density,
    /// Centroid clustering with model selection over k.
    Centroid,
}

impl ClusteringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Density => "density",
            Self::Centroid => "centroid",
        }
    }
}

impl fmt::Display for ClusteringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusteringMethod {
    type Err = EcotaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "density" | "dbscan" => Ok(Self::Density),
            "centroid" | "kmeans" => Ok(Self::Centroid),
            other => Err(EcotaxError::config(format!(
                "unknown clustering method '{other}': expected 'density' or 'centroid'"
            ))),
        }
    }
}

/// A title reference inside a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub normalized_title: String,
    pub title: String,
    pub frequency: u64,
}

/// One occupation group (or a category's noise group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// `{category}:{cluster_id}`, or `{category}:noise`.
    pub cluster_key: String,
    pub cluster_id: i64,
    pub category: String,
    pub method: ClusteringMethod,
    pub members: Vec<ClusterMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representative_title: Option<String>,
    pub frequency: u64,
    #[serde(default)]
    pub sources: Counter,
    /// Silhouette of the owning category run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

impl Cluster {
    pub fn is_noise(&self) -> bool {
        self.cluster_id == NOISE_CLUSTER_ID
    }
}

/// Quality of one k during centroid model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KScore {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: Option<f64>,
}

/// Per-category clustering metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub method: ClusteringMethod,
    pub points: usize,
    pub cluster_count: usize,
    pub noise_count: usize,
    pub silhouette: Option<f64>,
    pub davies_bouldin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inertia: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silhouette_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elbow_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub k_scores: Vec<KScore>,
}

/// Overall clustering metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringMetrics {
    pub total_points: usize,
    pub cluster_count: usize,
    pub noise_count: usize,
    pub silhouette: Option<f64>,
    pub davies_bouldin: Option<f64>,
    pub persisted_assignments: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
    pub category_breakdown: BTreeMap<String, CategoryMetrics>,
}

/// Compact per-cluster row for `summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_key: String,
    pub category: String,
    pub size: usize,
    pub frequency: u64,
    pub representative_title: Option<String>,
}

/// `clusters.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustersDocument {
    pub method: ClusteringMethod,
    pub chunk_type: String,
    pub metrics: ClusteringMetrics,
    pub clusters: BTreeMap<String, Cluster>,
    pub summary: Vec<ClusterSummary>,
    pub generated_at: DateTime<Utc>,
}

/// A row mirrored into the relational store for each clustered title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub normalized_title: String,
    pub cluster_id: i64,
    pub method: ClusteringMethod,
    pub quality_score: Option<f64>,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Career progression
// ---------------------------------------------------------------------------

/// A directed seniority transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionEdge {
    pub from_level: String,
    pub to_level: String,
    /// `min(1, evidence_count / 10)`.
    pub confidence: f64,
    pub evidence_count: u64,
    /// Share of all observed transitions.
    pub probability: f64,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// An `(from, to)` level pair without scores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRef {
    pub from_level: String,
    pub to_level: String,
}

impl EdgeRef {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_level: from.into(),
            to_level: to.into(),
        }
    }
}

/// Per-level detection summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: String,
    pub rank: usize,
    pub title_count: u64,
    pub cluster_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressionStatistics {
    pub clusters_analyzed: usize,
    pub clusters_with_progression: usize,
    pub titles_with_level: u64,
    pub titles_without_level: u64,
    pub total_transitions: u64,
    pub edges_kept: usize,
    pub edges_dropped: usize,
    pub persisted_edges: usize,
}

/// Observed edges compared against the canonical ladders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressionValidation {
    pub expected_edges: usize,
    pub matched_expected: usize,
    pub coverage: f64,
    pub missing_expected: Vec<EdgeRef>,
    pub unexpected: Vec<EdgeRef>,
    pub low_confidence: Vec<EdgeRef>,
    pub low_confidence_threshold: f64,
}

/// `progressions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionDocument {
    pub levels: Vec<LevelSummary>,
    pub tracks: BTreeMap<String, u64>,
    pub progressions: Vec<ProgressionEdge>,
    pub track_progressions: BTreeMap<String, Vec<ProgressionEdge>>,
    pub statistics: ProgressionStatistics,
    pub validation: ProgressionValidation,
    pub min_confidence: f64,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Occupations
// ---------------------------------------------------------------------------

/// An observed title mapped onto an occupation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub alias: String,
    pub confidence: f64,
    pub frequency: u64,
}

/// Years of experience; `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OccupationMetadata {
    pub sources: Counter,
    pub representative_title: Option<String>,
    pub confidence_summary: ConfidenceSummary,
}

/// A canonical occupation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occupation {
    pub occupation_id: String,
    pub display_name: String,
    pub aliases: Vec<Alias>,
    pub cluster_id: i64,
    pub cluster_key: String,
    pub frequency: u64,
    pub progressions: Vec<ProgressionEdge>,
    pub skill_requirements: Vec<String>,
    pub experience_range: ExperienceRange,
    pub review_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
    pub metadata: OccupationMetadata,
}

/// An occupation queued for manual verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub occupation_id: String,
    pub cluster_key: String,
    pub display_name: String,
    pub reason: String,
    pub frequency: u64,
    pub confidence_summary: ConfidenceSummary,
}

/// `eco_occupations.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupationsDocument {
    pub category: String,
    pub occupations: Vec<Occupation>,
    pub review_queue: Vec<ReviewItem>,
    pub skipped_noise_clusters: usize,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(title: &str, source: &str, posted_at: Option<&str>) -> RawPosting {
        RawPosting {
            title: title.into(),
            normalized_title: title.to_lowercase(),
            company: Some("Acme".into()),
            location: None,
            posted_at: posted_at.map(|s| s.parse().expect("timestamp")),
            source: source.into(),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn record_accumulates_counters_and_bounds() {
        let mut agg = AggregatedTitle::from_posting(&posting(
            "Dev",
            "linkedin",
            Some("2024-03-01T00:00:00Z"),
        ));
        agg.record(&posting("dev", "gupy", Some("2024-01-01T00:00:00Z")));
        agg.record(&posting("DEV", "gupy", None));

        assert_eq!(agg.frequency, 3);
        assert_eq!(agg.canonical_title, "Dev");
        assert_eq!(agg.sources["gupy"], 2);
        assert_eq!(agg.companies["Acme"], 3);
        assert_eq!(agg.first_seen.unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(agg.last_seen.unwrap().to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn examples_are_capped() {
        let mut agg = AggregatedTitle::from_posting(&posting("Dev", "a", None));
        for _ in 0..20 {
            agg.record(&posting("Dev", "a", None));
        }
        assert_eq!(agg.frequency, 21);
        assert_eq!(agg.examples.len(), MAX_TITLE_EXAMPLES);
    }

    #[test]
    fn merge_sums_and_keeps_receiver_canonical() {
        let mut a = AggregatedTitle::from_posting(&posting("Dev A", "x", None));
        let b = AggregatedTitle::from_posting(&posting("Dev B", "y", Some("2023-05-05T00:00:00Z")));
        a.merge(&b);
        assert_eq!(a.frequency, 2);
        assert_eq!(a.canonical_title, "Dev A");
        assert_eq!(a.sources.len(), 2);
        assert!(a.first_seen.is_some());
    }

    #[test]
    fn clustering_method_parses_aliases() {
        assert_eq!("dbscan".parse::<ClusteringMethod>().unwrap(), ClusteringMethod::Density);
        assert_eq!("Centroid".parse::<ClusteringMethod>().unwrap(), ClusteringMethod::Centroid);
        assert!("spectral".parse::<ClusteringMethod>().is_err());
    }

    #[test]
    fn embedding_record_metadata_accessors() {
        let record = EmbeddingRecord {
            chunk_id: "dev".into(),
            chunk_type: "job_title".into(),
            text: "Dev".into(),
            embedding: vec![0.0; 3],
            metadata: serde_json::json!({"frequency": 7, "sources": {"gupy": 7}}),
        };
        assert_eq!(record.frequency(), 7);
        assert_eq!(record.sources()["gupy"], 7);
    }
}
