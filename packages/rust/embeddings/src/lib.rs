//! Embedding generation for deduplicated titles.
//!
//! This crate provides:
//! - [`EmbeddingService`] with HTTP and hashing implementations
//! - [`VectorStore`] with JSON-file and in-memory implementations
//! - [`EmbeddingGenerator`] - batch embedding with contract checks

mod generator;
mod service;
mod store;

pub use generator::EmbeddingGenerator;
pub use service::{EmbeddingService, HashEmbeddingService, HttpEmbeddingService, service_from_config};
pub use store::{InMemoryVectorStore, JsonVectorStore, VectorStore};
