//! Occupation clustering over title embeddings.
//!
//! Titles are first bucketed by [`Categorizer`], then each category is
//! clustered on its own with either fixed-radius density clustering or
//! seeded k-means with model selection over k. [`ClusteringEngine`] ties the
//! steps together and persists memberships.

mod category;
mod dbscan;
mod distance;
mod engine;
mod kmeans;
mod metrics;
mod selection;

pub use category::Categorizer;
pub use dbscan::dbscan;
pub use distance::{cosine_distance, normalize};
pub use engine::ClusteringEngine;
pub use kmeans::{KMeansFit, kmeans};
pub use metrics::{davies_bouldin, inertia, silhouette};
pub use selection::{KSelection, candidate_ks, elbow, select_k};
