//! libSQL relational metadata store (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database that mirrors title
//! embeddings, cluster assignments and progression edges for downstream
//! graph queries. Pipeline stages only talk to it through the
//! [`MetadataStore`] trait, and every write from a stage is best-effort.
//!
//! **Access rules:**
//! - Pipeline: read-write via [`Storage::open`]
//! - Inspection tools: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use ecotax_shared::{
    ClusterAssignment, ClusteringMethod, EcotaxError, EmbeddingRecord, ProgressionEdge, Result,
};
use libsql::{Connection, Database, params};

// ---------------------------------------------------------------------------
// MetadataStore interface
// ---------------------------------------------------------------------------

/// Relational metadata store with upsert operations for every mirrored entity.
///
/// Callers treat failures as non-fatal: they log and keep going.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert_title_embedding(&self, record: &EmbeddingRecord) -> Result<()>;

    async fn upsert_cluster_assignment(&self, assignment: &ClusterAssignment) -> Result<()>;

    /// Drop every assignment recorded for `method`, ahead of a fresh run.
    async fn clear_cluster_assignments(&self, method: ClusteringMethod) -> Result<u64>;

    async fn upsert_progression_edge(&self, edge: &ProgressionEdge) -> Result<()>;
}

/// Store that accepts and discards every write. Used when storage is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetadataStore;

#[async_trait]
impl MetadataStore for NoopMetadataStore {
    async fn upsert_title_embedding(&self, _record: &EmbeddingRecord) -> Result<()> {
        Ok(())
    }

    async fn upsert_cluster_assignment(&self, _assignment: &ClusterAssignment) -> Result<()> {
        Ok(())
    }

    async fn clear_cluster_assignments(&self, _method: ClusteringMethod) -> Result<u64> {
        Ok(0)
    }

    async fn upsert_progression_edge(&self, _edge: &ProgressionEdge) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EcotaxError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EcotaxError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| EcotaxError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EcotaxError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| EcotaxError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        EcotaxError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(EcotaxError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-back queries
    // -----------------------------------------------------------------------

    /// Number of mirrored embeddings for a chunk type.
    pub async fn count_title_embeddings(&self, chunk_type: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM title_embeddings WHERE chunk_type = ?1",
                params![chunk_type],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Dimension recorded for one mirrored embedding.
    pub async fn get_embedding_dimension(
        &self,
        chunk_type: &str,
        normalized_title: &str,
    ) -> Result<Option<usize>> {
        let mut rows = self
            .conn
            .query(
                "SELECT dimension FROM title_embeddings
                 WHERE chunk_type = ?1 AND normalized_title = ?2",
                params![chunk_type, normalized_title],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<i64>(0).map_err(storage_err)? as usize)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Metadata recorded for one mirrored embedding.
    pub async fn get_title_metadata(
        &self,
        chunk_type: &str,
        normalized_title: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT metadata_json FROM title_embeddings
                 WHERE chunk_type = ?1 AND normalized_title = ?2",
                params![chunk_type, normalized_title],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let raw: String = row.get(0).map_err(storage_err)?;
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| EcotaxError::Storage(format!("decode metadata failed: {e}")))
            }
            None => Ok(None),
        }
    }

    /// Get the assignment of one title under a clustering method.
    pub async fn get_cluster_assignment(
        &self,
        normalized_title: &str,
        method: ClusteringMethod,
    ) -> Result<Option<ClusterAssignment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT normalized_title, cluster_id, method, quality_score, metadata_json
                 FROM cluster_assignments WHERE normalized_title = ?1 AND method = ?2",
                params![normalized_title, method.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_assignment(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List every assignment for a method, ordered by cluster then title.
    pub async fn list_cluster_assignments(
        &self,
        method: ClusteringMethod,
    ) -> Result<Vec<ClusterAssignment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT normalized_title, cluster_id, method, quality_score, metadata_json
                 FROM cluster_assignments WHERE method = ?1
                 ORDER BY cluster_id, normalized_title",
                params![method.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_assignment(&row)?);
        }
        Ok(results)
    }

    /// List every stored progression edge, strongest first.
    pub async fn list_progression_edges(&self) -> Result<Vec<ProgressionEdge>> {
        let mut rows = self
            .conn
            .query(
                "SELECT from_level, to_level, confidence, evidence_count, probability, examples_json
                 FROM progression_edges
                 ORDER BY confidence DESC, evidence_count DESC, from_level, to_level",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let examples_json: String = row.get(5).map_err(storage_err)?;
            results.push(ProgressionEdge {
                from_level: row.get::<String>(0).map_err(storage_err)?,
                to_level: row.get::<String>(1).map_err(storage_err)?,
                confidence: row.get::<f64>(2).map_err(storage_err)?,
                evidence_count: row.get::<i64>(3).map_err(storage_err)? as u64,
                probability: row.get::<f64>(4).map_err(storage_err)?,
                examples: serde_json::from_str(&examples_json)
                    .map_err(|e| EcotaxError::Storage(format!("decode examples failed: {e}")))?,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl MetadataStore for Storage {
    async fn upsert_title_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let embedding_json = to_json(&record.embedding)?;
        let metadata_json = to_json(&record.metadata)?;
        self.conn
            .execute(
                "INSERT INTO title_embeddings
                   (normalized_title, chunk_type, text, dimension, embedding_json, metadata_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(chunk_type, normalized_title) DO UPDATE SET
                   text = excluded.text,
                   dimension = excluded.dimension,
                   embedding_json = excluded.embedding_json,
                   metadata_json = excluded.metadata_json,
                   updated_at = excluded.updated_at",
                params![
                    record.chunk_id.as_str(),
                    record.chunk_type.as_str(),
                    record.text.as_str(),
                    record.embedding.len() as i64,
                    embedding_json,
                    metadata_json,
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn upsert_cluster_assignment(&self, assignment: &ClusterAssignment) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let metadata_json = to_json(&assignment.metadata)?;
        self.conn
            .execute(
                "INSERT INTO cluster_assignments
                   (normalized_title, cluster_id, method, quality_score, metadata_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(normalized_title, method) DO UPDATE SET
                   cluster_id = excluded.cluster_id,
                   quality_score = excluded.quality_score,
                   metadata_json = excluded.metadata_json,
                   updated_at = excluded.updated_at",
                params![
                    assignment.normalized_title.as_str(),
                    assignment.cluster_id,
                    assignment.method.as_str(),
                    assignment.quality_score,
                    metadata_json,
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn clear_cluster_assignments(&self, method: ClusteringMethod) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM cluster_assignments WHERE method = ?1",
                params![method.as_str()],
            )
            .await
            .map_err(storage_err)
    }

    async fn upsert_progression_edge(&self, edge: &ProgressionEdge) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let examples_json = to_json(&edge.examples)?;
        self.conn
            .execute(
                "INSERT INTO progression_edges
                   (from_level, to_level, confidence, evidence_count, probability, examples_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(from_level, to_level) DO UPDATE SET
                   confidence = excluded.confidence,
                   evidence_count = excluded.evidence_count,
                   probability = excluded.probability,
                   examples_json = excluded.examples_json,
                   updated_at = excluded.updated_at",
                params![
                    edge.from_level.as_str(),
                    edge.to_level.as_str(),
                    edge.confidence,
                    edge.evidence_count as i64,
                    edge.probability,
                    examples_json,
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(e: libsql::Error) -> EcotaxError {
    EcotaxError::Storage(e.to_string())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| EcotaxError::Storage(format!("encode failed: {e}")))
}

/// Convert a database row to a [`ClusterAssignment`].
fn row_to_assignment(row: &libsql::Row) -> Result<ClusterAssignment> {
    let method: String = row.get(2).map_err(storage_err)?;
    let metadata = row
        .get::<String>(4)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(ClusterAssignment {
        normalized_title: row.get::<String>(0).map_err(storage_err)?,
        cluster_id: row.get::<i64>(1).map_err(storage_err)?,
        method: method.parse()?,
        quality_score: row.get::<f64>(3).ok(),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ecotax_test_{}.db", Uuid::now_v7()))
    }

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        Storage::open(&temp_db()).await.expect("open test db")
    }

    fn assignment(title: &str, cluster_id: i64) -> ClusterAssignment {
        ClusterAssignment {
            normalized_title: title.into(),
            cluster_id,
            method: ClusteringMethod::Density,
            quality_score: Some(0.42),
            metadata: json!({"category": "backend"}),
        }
    }

    fn edge(from: &str, to: &str, count: u64) -> ProgressionEdge {
        ProgressionEdge {
            from_level: from.into(),
            to_level: to.into(),
            confidence: (count as f64 / 10.0).min(1.0),
            evidence_count: count,
            probability: 0.5,
            examples: vec!["Desenvolvedor Java".into()],
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db();
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn title_embedding_upsert_replaces_row() {
        let storage = test_storage().await;
        let mut record = EmbeddingRecord {
            chunk_id: "desenvolvedor java".into(),
            chunk_type: "job_title".into(),
            text: "Desenvolvedor Java".into(),
            embedding: vec![0.1, 0.2, 0.3],
            metadata: json!({"frequency": 3}),
        };
        storage.upsert_title_embedding(&record).await.expect("insert");

        record.embedding = vec![0.0; 4];
        storage.upsert_title_embedding(&record).await.expect("update");

        assert_eq!(storage.count_title_embeddings("job_title").await.unwrap(), 1);
        assert_eq!(
            storage
                .get_embedding_dimension("job_title", "desenvolvedor java")
                .await
                .unwrap(),
            Some(4)
        );
        assert_eq!(storage.count_title_embeddings("skill").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cluster_assignment_unique_per_method() {
        let storage = test_storage().await;
        storage
            .upsert_cluster_assignment(&assignment("dev java", 1))
            .await
            .expect("insert");
        storage
            .upsert_cluster_assignment(&assignment("dev java", 3))
            .await
            .expect("reassign");
        let mut centroid = assignment("dev java", 7);
        centroid.method = ClusteringMethod::Centroid;
        storage.upsert_cluster_assignment(&centroid).await.expect("other method");

        let found = storage
            .get_cluster_assignment("dev java", ClusteringMethod::Density)
            .await
            .unwrap()
            .expect("present");
        assert_eq!(found.cluster_id, 3);
        assert_eq!(found.quality_score, Some(0.42));
        assert_eq!(found.metadata["category"], "backend");

        assert_eq!(
            storage
                .list_cluster_assignments(ClusteringMethod::Centroid)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(storage
            .get_cluster_assignment("missing", ClusteringMethod::Density)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn clearing_one_method_keeps_the_other() {
        let storage = test_storage().await;
        storage.upsert_cluster_assignment(&assignment("dev java", 1)).await.unwrap();
        storage.upsert_cluster_assignment(&assignment("dev go", 1)).await.unwrap();
        let mut centroid = assignment("dev java", 0);
        centroid.method = ClusteringMethod::Centroid;
        storage.upsert_cluster_assignment(&centroid).await.unwrap();

        let removed = storage
            .clear_cluster_assignments(ClusteringMethod::Density)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(storage
            .list_cluster_assignments(ClusteringMethod::Density)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            storage
                .list_cluster_assignments(ClusteringMethod::Centroid)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn title_metadata_is_readable() {
        let storage = test_storage().await;
        let record = EmbeddingRecord {
            chunk_id: "analista de dados".into(),
            chunk_type: "job_title".into(),
            text: "Analista de Dados".into(),
            embedding: vec![0.5, 0.5],
            metadata: json!({"frequency": 2}),
        };
        storage.upsert_title_embedding(&record).await.unwrap();

        let meta = storage
            .get_title_metadata("job_title", "analista de dados")
            .await
            .unwrap()
            .expect("present");
        assert_eq!(meta["frequency"], 2);
        assert!(storage
            .get_title_metadata("job_title", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn progression_edges_ordered_by_confidence() {
        let storage = test_storage().await;
        storage.upsert_progression_edge(&edge("junior", "mid", 2)).await.unwrap();
        storage.upsert_progression_edge(&edge("mid", "senior", 8)).await.unwrap();
        storage.upsert_progression_edge(&edge("junior", "mid", 4)).await.unwrap();

        let edges = storage.list_progression_edges().await.unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].from_level, "mid");
        assert_eq!(edges[1].evidence_count, 4);
        assert_eq!(edges[1].examples, vec!["Desenvolvedor Java".to_string()]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db();
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_progression_edge(&edge("junior", "mid", 1)).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.upsert_cluster_assignment(&assignment("dev", 1)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert_eq!(ro.list_progression_edges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn noop_store_accepts_everything() {
        let store: &dyn MetadataStore = &NoopMetadataStore;
        store.upsert_cluster_assignment(&assignment("x", 1)).await.unwrap();
        assert_eq!(store.clear_cluster_assignments(ClusteringMethod::Density).await.unwrap(), 0);
        store.upsert_progression_edge(&edge("a", "b", 1)).await.unwrap();
    }
}
