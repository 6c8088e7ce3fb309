//! Vector stores keyed by `(chunk_type, chunk_id)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use ecotax_shared::{EcotaxError, EmbeddingRecord, Result, write_json};

type RecordKey = (String, String);

/// Persists embedding records and lists them back per chunk type.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records.
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()>;

    /// Every record of `chunk_type`, ordered by chunk id.
    async fn list_embeddings(&self, chunk_type: &str) -> Result<Vec<EmbeddingRecord>>;

    /// Chunk ids stored under `chunk_type`, ordered.
    async fn list_ids(&self, chunk_type: &str) -> Result<Vec<String>>;
}

fn key(record: &EmbeddingRecord) -> RecordKey {
    (record.chunk_type.clone(), record.chunk_id.clone())
}

fn select<'a>(
    records: &'a BTreeMap<RecordKey, EmbeddingRecord>,
    chunk_type: &'a str,
) -> impl Iterator<Item = &'a EmbeddingRecord> + 'a {
    records
        .iter()
        .filter(move |((ct, _), _)| ct == chunk_type)
        .map(|(_, record)| record)
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store for tests and throwaway runs.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: Mutex<BTreeMap<RecordKey, EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let mut guard = self.records.lock().await;
        for record in records {
            guard.insert(key(record), record.clone());
        }
        Ok(())
    }

    async fn list_embeddings(&self, chunk_type: &str) -> Result<Vec<EmbeddingRecord>> {
        let guard = self.records.lock().await;
        Ok(select(&guard, chunk_type).cloned().collect())
    }

    async fn list_ids(&self, chunk_type: &str) -> Result<Vec<String>> {
        let guard = self.records.lock().await;
        Ok(select(&guard, chunk_type).map(|r| r.chunk_id.clone()).collect())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Default)]
struct VectorStoreFile {
    records: Vec<EmbeddingRecord>,
}

/// Store backed by a single JSON file.
///
/// The file is loaded on first access and rewritten atomically on every
/// upsert.
pub struct JsonVectorStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<RecordKey, EmbeddingRecord>>>,
}

impl JsonVectorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<RecordKey, EmbeddingRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| EcotaxError::VectorStore(format!("{}: {e}", self.path.display())))?;
        let file: VectorStoreFile = serde_json::from_str(&content).map_err(|e| {
            EcotaxError::VectorStore(format!("corrupt vector store {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), records = file.records.len(), "loaded vector store");
        Ok(file.records.into_iter().map(|r| (key(&r), r)).collect())
    }
}

#[async_trait]
impl VectorStore for JsonVectorStore {
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let Some(map) = guard.as_mut() else {
            return Err(EcotaxError::VectorStore("vector store not loaded".into()));
        };
        for record in records {
            map.insert(key(record), record.clone());
        }

        let file = VectorStoreFile {
            records: map.values().cloned().collect(),
        };
        write_json(&self.path, &file)
            .map_err(|e| EcotaxError::VectorStore(format!("write failed: {e}")))
    }

    async fn list_embeddings(&self, chunk_type: &str) -> Result<Vec<EmbeddingRecord>> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard
            .as_ref()
            .map(|map| select(map, chunk_type).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_ids(&self, chunk_type: &str) -> Result<Vec<String>> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard
            .as_ref()
            .map(|map| select(map, chunk_type).map(|r| r.chunk_id.clone()).collect())
            .unwrap_or_default())
    }
}
