//! Shared types, error model, and configuration for ecotax.
//!
//! This crate is the foundation depended on by all other ecotax crates.
//! It provides:
//! - [`EcotaxError`] - the unified error type
//! - Domain types and stage documents ([`AggregatedTitle`], [`Cluster`],
//!   [`ProgressionEdge`], [`Occupation`], ...)
//! - Configuration ([`AppConfig`], runtime stage configs, config loading)
//! - JSON document I/O ([`write_json`], [`read_json`])

pub mod config;
pub mod error;
pub mod io;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CategoryRule, ClusteringConfig, ClusteringSection, DefaultsConfig,
    EmbeddingConfig, EmbeddingsSection, LoaderConfig, MappingConfig, MonitoringSection,
    ProgressionConfig, ProgressionSection, StorageSection, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{EcotaxError, Result};
pub use io::{file_sha256, read_json, write_json};
pub use types::{
    AggregatedTitle, Alias, CategoryMetrics, Cluster, ClusterAssignment, ClusterMember,
    ClusterSummary, ClusteringMethod, ClusteringMetrics, ClustersDocument, ConfidenceSummary,
    Counter, EdgeRef, EmbeddingRecord, EmbeddingReport, ExperienceRange, KScore, LevelSummary,
    LoaderMetrics, MAX_EDGE_EXAMPLES, MAX_TITLE_EXAMPLES, NOISE_CLUSTER_ID,
    NormalizedTitlesDocument, Occupation, OccupationMetadata, OccupationsDocument,
    ProgressionDocument, ProgressionEdge, ProgressionStatistics, ProgressionValidation,
    QualityStats, RawPosting, ReviewItem, merge_counter,
};
