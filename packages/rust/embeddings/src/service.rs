//! Embedding services: `embed(texts) -> vectors`.
//!
//! Services return whatever the backend produced; count and dimension
//! contracts are enforced by the generator, not here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use ecotax_normalize::{DefaultTitleNormalizer, TitleNormalizer};
use ecotax_shared::{AppConfig, EcotaxError, Result};

/// User-Agent string for embedding requests.
const USER_AGENT: &str = concat!("ecotax/", env!("CARGO_PKG_VERSION"));

/// Converts texts into vectors, one per input and in input order.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the service selected by `[embeddings].provider`.
pub fn service_from_config(config: &AppConfig) -> Result<Box<dyn EmbeddingService>> {
    let section = &config.embeddings;
    match section.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbeddingService::new(section.expected_dim))),
        "http" => {
            let api_key = std::env::var(&section.api_key_env).map_err(|_| {
                EcotaxError::config(format!(
                    "embeddings API key not found. Set the {} environment variable.",
                    section.api_key_env
                ))
            })?;
            Ok(Box::new(HttpEmbeddingService::new(
                &section.endpoint,
                &section.model,
                &api_key,
                Duration::from_secs(section.timeout_secs),
            )?))
        }
        other => Err(EcotaxError::config(format!(
            "unknown embeddings provider '{other}': expected 'hash' or 'http'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// HTTP (OpenAI-compatible)
// ---------------------------------------------------------------------------

/// Client for OpenAI-compatible `POST {endpoint}/embeddings`.
pub struct HttpEmbeddingService {
    client: Client,
    url: String,
    model: String,
}

impl HttpEmbeddingService {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(EcotaxError::config("embeddings model must not be empty"));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|e| EcotaxError::config(format!("invalid embeddings API key: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EcotaxError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    #[instrument(skip_all, fields(inputs = texts.len(), model = %self.model))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EcotaxError::Network(format!("{}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EcotaxError::Embedding(format!(
                "embeddings request failed ({status}): {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EcotaxError::Embedding(format!("invalid embeddings response: {e}")))?;
        parsed.data.sort_by_key(|entry| entry.index);
        debug!(returned = parsed.data.len(), "received embeddings");

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

// ---------------------------------------------------------------------------
// Hashing (offline, deterministic)
// ---------------------------------------------------------------------------

/// Deterministic offline embeddings.
///
/// Word tokens and character trigrams of the normalized text are hashed into
/// a fixed number of signed buckets and the result is L2-normalized, so
/// titles sharing words and spellings land close in cosine space.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbeddingService {
    dimension: usize,
}

/// Word tokens weigh more than individual trigrams.
const WORD_WEIGHT: f32 = 2.0;
const TRIGRAM_WEIGHT: f32 = 1.0;

impl HashEmbeddingService {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Embed one text.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let normalized = DefaultTitleNormalizer.normalize(text);
        for word in normalized.split(' ').filter(|w| !w.is_empty()) {
            self.add_feature(&mut vector, "w", word, WORD_WEIGHT);
        }
        let padded: Vec<char> = format!(" {normalized} ").chars().collect();
        for window in padded.windows(3) {
            let trigram: String = window.iter().collect();
            self.add_feature(&mut vector, "c", &trigram, TRIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], kind: &str, feature: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(feature.as_bytes());
        let hash = hasher.finalize();

        let bucket = u64::from_le_bytes([
            hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
        ]);
        let index = (bucket % self.dimension as u64) as usize;
        let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingService for HashEmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
