//! Application configuration for ecotax.
//!
//! User config lives at `~/.ecotax/ecotax.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EcotaxError, Result};
use crate::types::ClusteringMethod;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "ecotax.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".ecotax";

// ---------------------------------------------------------------------------
// Config structs (matching ecotax.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsSection,

    #[serde(default)]
    pub clustering: ClusteringSection,

    #[serde(default)]
    pub progression: ProgressionSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub monitoring: MonitoringSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding stage outputs and the checkpoint.
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Titles seen fewer times than this are dropped.
    #[serde(default = "default_min_frequency")]
    pub min_frequency: u64,

    /// Worker pool size for source parsing.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Vector-store namespace for title embeddings.
    #[serde(default = "default_chunk_type")]
    pub chunk_type: String,

    /// Occupation category used in occupation ids.
    #[serde(default = "default_category")]
    pub category: String,

    /// Merge with the previous run's outputs.
    #[serde(default = "default_true")]
    pub incremental: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            min_frequency: default_min_frequency(),
            parallelism: default_parallelism(),
            chunk_type: default_chunk_type(),
            category: default_category(),
            incremental: true,
        }
    }
}

fn default_workdir() -> String {
    "var/taxonomy".into()
}
fn default_min_frequency() -> u64 {
    1
}
fn default_parallelism() -> usize {
    4
}
fn default_chunk_type() -> String {
    "job_title".into()
}
fn default_category() -> String {
    "TECH".into()
}
fn default_true() -> bool {
    true
}

/// `[embeddings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsSection {
    /// `hash` (offline, deterministic) or `http` (OpenAI-compatible endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_expected_dim")]
    pub expected_dim: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// JSON vector store file; `<workdir>/vector_store.json` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store_path: Option<String>,
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            expected_dim: default_expected_dim(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            vector_store_path: None,
        }
    }
}

fn default_provider() -> String {
    "hash".into()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_api_key_env() -> String {
    "ECOTAX_EMBEDDINGS_API_KEY".into()
}
fn default_expected_dim() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[clustering]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringSection {
    #[serde(default = "default_method")]
    pub method: ClusteringMethod,

    #[serde(default = "default_eps")]
    pub eps: f64,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_k_start")]
    pub k_start: usize,

    #[serde(default = "default_k_end")]
    pub k_end: usize,

    /// Fixed k; disables model selection when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_fallback_category")]
    pub default_category: String,

    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryRule>,
}

impl Default for ClusteringSection {
    fn default() -> Self {
        Self {
            method: default_method(),
            eps: default_eps(),
            min_samples: default_min_samples(),
            k_start: default_k_start(),
            k_end: default_k_end(),
            k: None,
            seed: default_seed(),
            default_category: default_fallback_category(),
            categories: default_categories(),
        }
    }
}

fn default_method() -> ClusteringMethod {
    ClusteringMethod::Density
}
fn default_eps() -> f64 {
    0.25
}
fn default_min_samples() -> usize {
    2
}
fn default_k_start() -> usize {
    2
}
fn default_k_end() -> usize {
    10
}
fn default_seed() -> u64 {
    42
}
fn default_fallback_category() -> String {
    "general".into()
}

/// `[[clustering.categories]]` entry: how titles are bucketed and, optionally,
/// clustered differently from the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    /// Regexes tried first (case-insensitive, against the folded title).
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Substrings tried after every category's patterns.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ClusteringMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
}

impl CategoryRule {
    fn simple(name: &str, patterns: &[&str], keywords: &[&str]) -> Self {
        Self {
            name: name.into(),
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            ..Default::default()
        }
    }
}

fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule::simple(
            "fullstack",
            &[r"\bfull[\s-]?stack\b"],
            &["fullstack"],
        ),
        CategoryRule::simple(
            "frontend",
            &[r"\bfront[\s-]?end\b"],
            &["react", "angular", "vue", "javascript", "ui developer"],
        ),
        CategoryRule::simple(
            "backend",
            &[r"\bback[\s-]?end\b"],
            &["java", "python", "node", "golang", ".net", "php", "ruby", "c#"],
        ),
        CategoryRule::simple(
            "mobile",
            &[r"\bmobile\b", r"\b(android|ios)\b"],
            &["flutter", "react native", "kotlin", "swift"],
        ),
        CategoryRule::simple(
            "data",
            &[r"\b(dados|data)\b", r"\bmachine learning\b"],
            &["analytics", "bi ", "cientista", "etl"],
        ),
        CategoryRule::simple(
            "devops",
            &[r"\bdev[\s-]?ops\b", r"\bsre\b"],
            &["cloud", "infraestrutura", "plataforma", "kubernetes"],
        ),
        CategoryRule::simple(
            "qa",
            &[r"\bqa\b", r"\bqualidade\b"],
            &["teste", "tester", "quality"],
        ),
    ]
}

/// `[progression]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionSection {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ProgressionSection {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.1
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Mirror embeddings, assignments and edges into the relational store.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// libSQL database file; `<workdir>/metadata.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: None,
        }
    }
}

/// `[monitoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON-Lines event sink; events are only logged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_path: Option<String>,

    #[serde(default = "default_monitoring_workers")]
    pub workers: usize,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enabled: true,
            events_path: None,
            workers: default_monitoring_workers(),
        }
    }
}

fn default_monitoring_workers() -> usize {
    2
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime Data Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub incremental: bool,
    pub min_frequency: u64,
    /// Empty means every source tag is accepted.
    pub allowed_sources: Vec<String>,
    pub max_records: Option<u64>,
    pub parallelism: usize,
}

impl From<&AppConfig> for LoaderConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            incremental: config.defaults.incremental,
            min_frequency: config.defaults.min_frequency,
            allowed_sources: Vec::new(),
            max_records: None,
            parallelism: config.defaults.parallelism,
        }
    }
}

/// Runtime Embedding Generator configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub batch_size: usize,
    pub chunk_type: String,
    pub overwrite: bool,
    pub incremental: bool,
    pub expected_dim: usize,
}

impl From<&AppConfig> for EmbeddingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.embeddings.batch_size,
            chunk_type: config.defaults.chunk_type.clone(),
            overwrite: false,
            incremental: config.defaults.incremental,
            expected_dim: config.embeddings.expected_dim,
        }
    }
}

/// Runtime Clustering Engine configuration.
#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    pub method: ClusteringMethod,
    pub chunk_type: String,
    pub eps: f64,
    pub min_samples: usize,
    pub k_start: usize,
    pub k_end: usize,
    pub k: Option<usize>,
    pub seed: u64,
    pub default_category: String,
    pub categories: Vec<CategoryRule>,
    /// Directory for summary-statistics artifacts.
    pub viz_dir: Option<PathBuf>,
}

impl From<&AppConfig> for ClusteringConfig {
    fn from(config: &AppConfig) -> Self {
        let c = &config.clustering;
        Self {
            method: c.method,
            chunk_type: config.defaults.chunk_type.clone(),
            eps: c.eps,
            min_samples: c.min_samples,
            k_start: c.k_start,
            k_end: c.k_end,
            k: c.k,
            seed: c.seed,
            default_category: c.default_category.clone(),
            categories: c.categories.clone(),
            viz_dir: None,
        }
    }
}

/// Runtime Career Progression Detector configuration.
#[derive(Debug, Clone)]
pub struct ProgressionConfig {
    pub min_confidence: f64,
}

impl From<&AppConfig> for ProgressionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_confidence: config.progression.min_confidence,
        }
    }
}

/// Runtime Occupation Mapper configuration.
#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub category: String,
}

impl From<&AppConfig> for MappingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            category: config.defaults.category.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.ecotax/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EcotaxError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.ecotax/ecotax.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EcotaxError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EcotaxError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EcotaxError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EcotaxError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EcotaxError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the embeddings API key env var is set when the HTTP provider is used.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if config.embeddings.provider != "http" {
        return Ok(());
    }
    let var_name = &config.embeddings.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(EcotaxError::config(format!(
            "embeddings API key not found. Set the {var_name} environment variable."
        ))),
    }
}
