//! Embedding Generator: canonical titles to vectors, batch by batch.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use ecotax_shared::{
    AggregatedTitle, EcotaxError, EmbeddingConfig, EmbeddingRecord, EmbeddingReport,
    NormalizedTitlesDocument, Result, read_json,
};
use ecotax_storage::MetadataStore;

use crate::service::EmbeddingService;
use crate::store::VectorStore;

/// Embeds deduplicated titles and upserts them into a vector store.
pub struct EmbeddingGenerator {
    config: EmbeddingConfig,
    service: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl EmbeddingGenerator {
    pub fn new(
        config: EmbeddingConfig,
        service: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            service,
            store,
            metadata,
        }
    }

    /// Embed every title in the Data Loader output at `titles_path`.
    #[instrument(skip_all, fields(chunk_type = %self.config.chunk_type, batch_size = self.config.batch_size))]
    pub async fn generate(&self, titles_path: &Path) -> Result<EmbeddingReport> {
        let start = Instant::now();
        if self.config.batch_size == 0 {
            return Err(EcotaxError::validation("batch_size must be positive"));
        }
        if self.config.expected_dim == 0 {
            return Err(EcotaxError::validation("expected_dim must be positive"));
        }

        let document: NormalizedTitlesDocument = read_json(titles_path)?;
        let total_titles = document.titles.len();

        let existing: HashSet<String> = if self.config.incremental && !self.config.overwrite {
            self.store
                .list_ids(&self.config.chunk_type)
                .await?
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };

        let (pending, already): (Vec<&AggregatedTitle>, Vec<&AggregatedTitle>) = document
            .titles
            .values()
            .partition(|t| !existing.contains(&t.normalized_title));
        let skipped = already.len();
        debug!(pending = pending.len(), skipped, "resolved titles to embed");

        let refreshed = if already.is_empty() {
            Vec::new()
        } else {
            self.refresh_metadata(&already).await?
        };

        let mut report = EmbeddingReport {
            chunk_type: self.config.chunk_type.clone(),
            total_titles,
            new_embeddings: 0,
            skipped,
            expected_dimension: self.config.expected_dim,
            batches: 0,
            refreshed_metadata: refreshed.len(),
            metadata_failures: 0,
            generated_at: Utc::now(),
        };
        self.mirror(&refreshed, &mut report).await;

        for (batch, chunk) in pending.chunks(self.config.batch_size).enumerate() {
            let records = self.embed_batch(batch, chunk).await?;
            self.store.upsert(&records).await?;
            report.new_embeddings += records.len();
            report.batches += 1;
            self.mirror(&records, &mut report).await;
        }

        info!(
            total_titles = report.total_titles,
            new_embeddings = report.new_embeddings,
            skipped = report.skipped,
            batches = report.batches,
            metadata_failures = report.metadata_failures,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "embedding generation complete"
        );
        Ok(report)
    }

    /// One service call for the whole batch, then count and dimension checks.
    async fn embed_batch(
        &self,
        batch: usize,
        titles: &[&AggregatedTitle],
    ) -> Result<Vec<EmbeddingRecord>> {
        let texts: Vec<String> = titles.iter().map(|t| t.canonical_title.clone()).collect();
        let vectors = self.service.embed(&texts).await?;

        if vectors.len() != texts.len() {
            return Err(EcotaxError::EmbeddingCountMismatch {
                batch,
                expected: texts.len(),
                actual: vectors.len(),
            });
        }

        let offending: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| v.len() != self.config.expected_dim)
            .map(|(i, _)| i)
            .collect();
        if !offending.is_empty() {
            return Err(EcotaxError::EmbeddingDimensionMismatch {
                batch,
                expected: self.config.expected_dim,
                offending,
            });
        }

        Ok(titles
            .iter()
            .zip(vectors)
            .map(|(title, embedding)| EmbeddingRecord {
                chunk_id: title.normalized_title.clone(),
                chunk_type: self.config.chunk_type.clone(),
                text: title.canonical_title.clone(),
                embedding,
                metadata: record_metadata(title),
            })
            .collect())
    }

    /// Best-effort copy of stored records into the metadata store.
    async fn mirror(&self, records: &[EmbeddingRecord], report: &mut EmbeddingReport) {
        for record in records {
            if let Err(e) = self.metadata.upsert_title_embedding(record).await {
                warn!(chunk_id = %record.chunk_id, error = %e, "metadata mirror failed");
                report.metadata_failures += 1;
            }
        }
    }

    /// Rewrite stored metadata for skipped titles whose counts moved and
    /// return the rewritten records.
    async fn refresh_metadata(
        &self,
        titles: &[&AggregatedTitle],
    ) -> Result<Vec<EmbeddingRecord>> {
        let stored = self.store.list_embeddings(&self.config.chunk_type).await?;
        let wanted: std::collections::HashMap<&str, &AggregatedTitle> = titles
            .iter()
            .map(|t| (t.normalized_title.as_str(), *t))
            .collect();

        let refreshed: Vec<EmbeddingRecord> = stored
            .into_iter()
            .filter_map(|mut record| {
                let title = wanted.get(record.chunk_id.as_str())?;
                let metadata = record_metadata(title);
                if record.metadata == metadata {
                    return None;
                }
                record.metadata = metadata;
                Some(record)
            })
            .collect();

        if !refreshed.is_empty() {
            self.store.upsert(&refreshed).await?;
            debug!(count = refreshed.len(), "refreshed embedding metadata");
        }
        Ok(refreshed)
    }
}

fn record_metadata(title: &AggregatedTitle) -> serde_json::Value {
    json!({
        "frequency": title.frequency,
        "sources": title.sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::HashEmbeddingService;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;
    use ecotax_shared::{
        ClusterAssignment, ClusteringMethod, LoaderMetrics, ProgressionEdge, QualityStats,
        write_json,
    };
    use ecotax_storage::{NoopMetadataStore, Storage};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const DIM: usize = 16;

    fn titles_file(titles: &[(&str, u64)]) -> PathBuf {
        let mut map = BTreeMap::new();
        for (title, frequency) in titles {
            let key = title.to_lowercase();
            map.insert(
                key.clone(),
                AggregatedTitle {
                    normalized_title: key,
                    canonical_title: (*title).to_string(),
                    frequency: *frequency,
                    sources: [("gupy".to_string(), *frequency)].into_iter().collect(),
                    companies: BTreeMap::new(),
                    locations: BTreeMap::new(),
                    first_seen: None,
                    last_seen: None,
                    examples: Vec::new(),
                },
            );
        }
        let doc = NormalizedTitlesDocument {
            titles: map,
            metrics: LoaderMetrics::default(),
            generated_at: Utc::now(),
            quality: QualityStats::default(),
        };
        let path = std::env::temp_dir()
            .join(format!("ecotax_embed_{}", Uuid::now_v7()))
            .join("normalized_titles.json");
        write_json(&path, &doc).unwrap();
        path
    }

    fn config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            chunk_type: "job_title".into(),
            overwrite: false,
            incremental: true,
            expected_dim: DIM,
        }
    }

    /// Counts calls and delegates to the hashing service.
    struct CountingService {
        calls: AtomicUsize,
        inner: HashEmbeddingService,
    }

    #[async_trait]
    impl EmbeddingService for CountingService {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    /// Returns vectors of the wrong shape.
    struct BrokenService {
        drop_one: bool,
    }

    #[async_trait]
    impl EmbeddingService for BrokenService {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.drop_one {
                return Ok(vec![vec![0.0; DIM]; texts.len() - 1]);
            }
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| vec![0.0; if i == 1 { DIM + 1 } else { DIM }])
                .collect())
        }
    }

    struct FailingMetadata;

    #[async_trait]
    impl MetadataStore for FailingMetadata {
        async fn upsert_title_embedding(&self, _record: &EmbeddingRecord) -> Result<()> {
            Err(EcotaxError::Storage("unreachable".into()))
        }
        async fn upsert_cluster_assignment(&self, _a: &ClusterAssignment) -> Result<()> {
            Err(EcotaxError::Storage("unreachable".into()))
        }
        async fn clear_cluster_assignments(&self, _m: ClusteringMethod) -> Result<u64> {
            Err(EcotaxError::Storage("unreachable".into()))
        }
        async fn upsert_progression_edge(&self, _e: &ProgressionEdge) -> Result<()> {
            Err(EcotaxError::Storage("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn batches_call_service_once_each() {
        let path = titles_file(&[("Dev A", 1), ("Dev B", 1), ("Dev C", 1), ("Dev D", 1), ("Dev E", 1)]);
        let service = Arc::new(CountingService {
            calls: AtomicUsize::new(0),
            inner: HashEmbeddingService::new(DIM),
        });
        let store = Arc::new(InMemoryVectorStore::new());
        let generator = EmbeddingGenerator::new(
            config(2),
            service.clone(),
            store.clone(),
            Arc::new(NoopMetadataStore),
        );

        let report = generator.generate(&path).await.expect("generate");
        assert_eq!(report.total_titles, 5);
        assert_eq!(report.new_embeddings, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);

        let records = store.list_embeddings("job_title").await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.embedding.len() == DIM));
        assert_eq!(records[0].text, "Dev A");
        assert_eq!(records[0].frequency(), 1);
    }

    #[tokio::test]
    async fn incremental_skips_and_overwrite_reembeds() {
        let path = titles_file(&[("Dev", 2), ("QA", 1)]);
        let store = Arc::new(InMemoryVectorStore::new());
        let service = Arc::new(HashEmbeddingService::new(DIM));
        let run = |cfg: EmbeddingConfig| {
            EmbeddingGenerator::new(cfg, service.clone(), store.clone(), Arc::new(NoopMetadataStore))
        };

        run(config(8)).generate(&path).await.unwrap();
        let again = run(config(8)).generate(&path).await.unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.new_embeddings, 0);
        assert_eq!(again.refreshed_metadata, 0);

        let mut overwrite = config(8);
        overwrite.overwrite = true;
        let forced = run(overwrite).generate(&path).await.unwrap();
        assert_eq!(forced.new_embeddings, 2);
        assert_eq!(forced.skipped, 0);
    }

    #[tokio::test]
    async fn skipped_titles_get_fresh_metadata() {
        let db_path = std::env::temp_dir().join(format!("ecotax_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db_path).await.unwrap());
        let store = Arc::new(InMemoryVectorStore::new());
        let service = Arc::new(HashEmbeddingService::new(DIM));
        let generator = EmbeddingGenerator::new(config(8), service, store.clone(), storage.clone());

        generator.generate(&titles_file(&[("Dev", 1)])).await.unwrap();
        let report = generator.generate(&titles_file(&[("Dev", 4)])).await.unwrap();
        assert_eq!(report.refreshed_metadata, 1);
        assert_eq!(report.metadata_failures, 0);
        assert_eq!(store.list_embeddings("job_title").await.unwrap()[0].frequency(), 4);

        let mirrored = storage
            .get_title_metadata("job_title", "dev")
            .await
            .unwrap()
            .expect("mirrored");
        assert_eq!(mirrored["frequency"], 4);
        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn count_mismatch_is_fatal() {
        let path = titles_file(&[("Dev", 1), ("QA", 1)]);
        let generator = EmbeddingGenerator::new(
            config(8),
            Arc::new(BrokenService { drop_one: true }),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(NoopMetadataStore),
        );
        let err = generator.generate(&path).await.unwrap_err();
        assert!(matches!(
            err,
            EcotaxError::EmbeddingCountMismatch { batch: 0, expected: 2, actual: 1 }
        ));
    }

    #[tokio::test]
    async fn dimension_mismatch_names_offending_indices() {
        let path = titles_file(&[("A", 1), ("B", 1), ("C", 1)]);
        let store = Arc::new(InMemoryVectorStore::new());
        let generator = EmbeddingGenerator::new(
            config(8),
            Arc::new(BrokenService { drop_one: false }),
            store.clone(),
            Arc::new(NoopMetadataStore),
        );
        match generator.generate(&path).await.unwrap_err() {
            EcotaxError::EmbeddingDimensionMismatch { batch, expected, offending } => {
                assert_eq!(batch, 0);
                assert_eq!(expected, DIM);
                assert_eq!(offending, vec![1]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn metadata_failures_are_not_fatal() {
        let path = titles_file(&[("Dev", 1), ("QA", 1)]);
        let store = Arc::new(InMemoryVectorStore::new());
        let generator = EmbeddingGenerator::new(
            config(1),
            Arc::new(HashEmbeddingService::new(DIM)),
            store.clone(),
            Arc::new(FailingMetadata),
        );
        let report = generator.generate(&path).await.expect("still succeeds");
        assert_eq!(report.metadata_failures, 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn embeddings_mirror_into_relational_store() {
        let path = titles_file(&[("Dev", 3)]);
        let db = std::env::temp_dir().join(format!("ecotax_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db).await.unwrap());
        let generator = EmbeddingGenerator::new(
            config(4),
            Arc::new(HashEmbeddingService::new(DIM)),
            Arc::new(InMemoryVectorStore::new()),
            storage.clone(),
        );
        let report = generator.generate(&path).await.unwrap();
        assert_eq!(report.metadata_failures, 0);
        assert_eq!(storage.count_title_embeddings("job_title").await.unwrap(), 1);
    }
}
