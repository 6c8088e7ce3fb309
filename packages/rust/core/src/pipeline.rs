//! End-to-end pipeline: sources → titles → embeddings → clusters →
//! progressions → occupations, with a resumable checkpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use ecotax_clustering::ClusteringEngine;
use ecotax_embeddings::{
    EmbeddingGenerator, EmbeddingService, JsonVectorStore, VectorStore, service_from_config,
};
use ecotax_loader::DataLoader;
use ecotax_normalize::{AliasScorer, DefaultTitleNormalizer, TitleNormalizer, StringSimilarityScorer};
use ecotax_shared::{
    AppConfig, ClusteringConfig, EcotaxError, EmbeddingConfig, LoaderConfig, MappingConfig,
    ProgressionConfig, Result, file_sha256, read_json, write_json,
};
use ecotax_storage::{MetadataStore, NoopMetadataStore, Storage};

use crate::mapper::OccupationMapper;
use crate::monitoring::{EventDispatcher, EventStatus, JsonlMonitoringSink, MonitoringSink};
use crate::progression::ProgressionDetector;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    DataLoader,
    Embeddings,
    Clustering,
    Progression,
    Mapping,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Self::DataLoader,
        Self::Embeddings,
        Self::Clustering,
        Self::Progression,
        Self::Mapping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataLoader => "data_loader",
            Self::Embeddings => "embeddings",
            Self::Clustering => "clustering",
            Self::Progression => "progression",
            Self::Mapping => "mapping",
        }
    }

    /// Default output file name under the workdir.
    pub fn output_file(&self) -> &'static str {
        match self {
            Self::DataLoader => "normalized_titles.json",
            Self::Embeddings => "embeddings_report.json",
            Self::Clustering => "clusters.json",
            Self::Progression => "progressions.json",
            Self::Mapping => "eco_occupations.json",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = EcotaxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == key)
            .ok_or_else(|| {
                EcotaxError::config(format!(
                    "unknown stage '{s}': expected one of data_loader, embeddings, clustering, progression, mapping"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// What a completed stage left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub output: PathBuf,
    pub metrics: serde_json::Value,
    /// SHA-256 of the output file.
    pub sha256: String,
    pub completed_at: DateTime<Utc>,
}

/// `{stage_name: StageState}`, rewritten after every successful stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    pub stages: BTreeMap<String, StageState>,
}

impl Checkpoint {
    /// Load a checkpoint; a missing or unreadable file gives an empty one.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match read_json(path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint unreadable, starting fresh");
                Self::default()
            }
        }
    }

    pub fn get(&self, stage: Stage) -> Option<&StageState> {
        self.stages.get(stage.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config, services, progress
// ---------------------------------------------------------------------------

/// Configuration for a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sources: Vec<PathBuf>,
    pub workdir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub skip: BTreeSet<Stage>,
    pub resume_from: Option<Stage>,
    pub monitoring_enabled: bool,
    pub monitoring_workers: usize,
    pub loader: LoaderConfig,
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub progression: ProgressionConfig,
    pub mapping: MappingConfig,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let workdir = PathBuf::from(&config.defaults.workdir);
        Self {
            sources: Vec::new(),
            checkpoint_path: workdir.join("pipeline_checkpoint.json"),
            workdir,
            skip: BTreeSet::new(),
            resume_from: None,
            monitoring_enabled: config.monitoring.enabled,
            monitoring_workers: config.monitoring.workers,
            loader: LoaderConfig::from(config),
            embedding: EmbeddingConfig::from(config),
            clustering: ClusteringConfig::from(config),
            progression: ProgressionConfig::from(config),
            mapping: MappingConfig::from(config),
        }
    }
}

impl PipelineConfig {
    pub fn output_path(&self, stage: Stage) -> PathBuf {
        self.workdir.join(stage.output_file())
    }
}

/// Collaborators injected into the stages.
#[derive(Clone)]
pub struct PipelineServices {
    pub normalizer: Arc<dyn TitleNormalizer>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub vector_store: Arc<dyn VectorStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub scorer: Option<Arc<dyn AliasScorer>>,
    pub monitoring_sink: Option<Arc<dyn MonitoringSink>>,
}

impl PipelineServices {
    /// Build the default collaborators described by `config`, rooted at `workdir`.
    pub async fn from_config(config: &AppConfig, workdir: &Path) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingService> = Arc::from(service_from_config(config)?);

        let vector_store_path = config
            .embeddings
            .vector_store_path
            .as_ref()
            .map_or_else(|| workdir.join("vector_store.json"), PathBuf::from);

        let metadata: Arc<dyn MetadataStore> = if config.storage.enabled {
            let db_path = config
                .storage
                .database_path
                .as_ref()
                .map_or_else(|| workdir.join("metadata.db"), PathBuf::from);
            Arc::new(Storage::open(&db_path).await?)
        } else {
            Arc::new(NoopMetadataStore)
        };

        let monitoring_sink = config
            .monitoring
            .events_path
            .as_ref()
            .map(|p| Arc::new(JsonlMonitoringSink::new(p)) as Arc<dyn MonitoringSink>);

        Ok(Self {
            normalizer: Arc::new(DefaultTitleNormalizer),
            embedder,
            vector_store: Arc::new(JsonVectorStore::new(vector_store_path)),
            metadata,
            scorer: Some(Arc::new(StringSimilarityScorer)),
            monitoring_sink,
        })
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts running.
    fn stage_started(&self, stage: Stage);
    /// Called for stages that are not run.
    fn stage_skipped(&self, stage: Stage, reason: &str);
    /// Called when a stage finishes successfully.
    fn stage_completed(&self, stage: Stage, elapsed: Duration);
    /// Called when the pipeline completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_skipped(&self, _stage: Stage, _reason: &str) {}
    fn stage_completed(&self, _stage: Stage, _elapsed: Duration) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// How a stage ended up in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// Explicitly disabled.
    Skipped,
    /// Before `resume_from`; the checkpointed output is reused.
    Resumed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub output: Option<PathBuf>,
    pub elapsed: Duration,
}

impl Serialize for Stage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub stages: Vec<StageReport>,
    pub checkpoint_path: PathBuf,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| s.outcome)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs the stages in order, checkpointing after each success.
pub struct Pipeline {
    config: PipelineConfig,
    services: PipelineServices,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Self {
        Self { config, services }
    }

    #[instrument(skip_all, fields(workdir = %self.config.workdir.display(), resume_from = ?self.config.resume_from))]
    pub async fn run(&self, progress: &dyn ProgressReporter) -> Result<PipelineReport> {
        let start = Instant::now();
        std::fs::create_dir_all(&self.config.workdir)
            .map_err(|e| EcotaxError::io(&self.config.workdir, e))?;

        let dispatcher = if self.config.monitoring_enabled {
            EventDispatcher::start(
                self.services.monitoring_sink.clone(),
                self.config.monitoring_workers,
            )
        } else {
            EventDispatcher::disabled()
        };
        let run_id = dispatcher.run_id();
        info!(%run_id, sources = self.config.sources.len(), "starting pipeline");

        let mut checkpoint = if self.config.resume_from.is_some() {
            Checkpoint::load_or_default(&self.config.checkpoint_path)
        } else {
            Checkpoint::default()
        };
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            if self.config.resume_from.is_some_and(|r| stage < r) {
                progress.stage_skipped(stage, "resumed");
                dispatcher.emit(stage.as_str(), EventStatus::Skipped, json!({ "reason": "resume" }));
                stages.push(StageReport {
                    stage,
                    outcome: StageOutcome::Resumed,
                    output: checkpoint.get(stage).map(|s| s.output.clone()),
                    elapsed: Duration::ZERO,
                });
                continue;
            }
            if self.config.skip.contains(&stage) {
                progress.stage_skipped(stage, "disabled");
                dispatcher.emit(stage.as_str(), EventStatus::Skipped, json!({ "reason": "disabled" }));
                stages.push(StageReport {
                    stage,
                    outcome: StageOutcome::Skipped,
                    output: None,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            progress.stage_started(stage);
            dispatcher.emit(stage.as_str(), EventStatus::Started, json!({}));
            let stage_start = Instant::now();

            let (output, metrics) = match self.run_stage(stage, &checkpoint).await {
                Ok(done) => done,
                Err(e) => {
                    warn!(stage = %stage, error = %e, "stage failed");
                    dispatcher.emit(
                        stage.as_str(),
                        EventStatus::Failed,
                        json!({ "error": e.to_string() }),
                    );
                    dispatcher.shutdown().await;
                    return Err(e);
                }
            };

            let state = StageState {
                sha256: file_sha256(&output)?,
                output: output.clone(),
                metrics: metrics.clone(),
                completed_at: Utc::now(),
            };
            checkpoint.stages.insert(stage.as_str().to_string(), state);
            write_json(&self.config.checkpoint_path, &checkpoint)?;

            let elapsed = stage_start.elapsed();
            dispatcher.emit(stage.as_str(), EventStatus::Completed, metrics);
            progress.stage_completed(stage, elapsed);
            info!(stage = %stage, elapsed_ms = elapsed.as_millis() as u64, "stage complete");
            stages.push(StageReport {
                stage,
                outcome: StageOutcome::Completed,
                output: Some(output),
                elapsed,
            });
        }

        dispatcher.shutdown().await;
        let report = PipelineReport {
            run_id,
            stages,
            checkpoint_path: self.config.checkpoint_path.clone(),
            elapsed: start.elapsed(),
        };
        progress.done(&report);
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "pipeline complete");
        Ok(report)
    }

    /// Output of `stage` from the checkpoint, else its default location.
    fn resolve_output(&self, stage: Stage, checkpoint: &Checkpoint) -> PathBuf {
        checkpoint
            .get(stage)
            .map(|s| s.output.clone())
            .unwrap_or_else(|| self.config.output_path(stage))
    }

    /// Required input produced by `dependency`.
    fn require(&self, stage: Stage, dependency: Stage, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.resolve_output(dependency, checkpoint);
        if path.exists() {
            Ok(path)
        } else {
            Err(EcotaxError::MissingStageOutput {
                stage: stage.as_str().to_string(),
                path,
            })
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        checkpoint: &Checkpoint,
    ) -> Result<(PathBuf, serde_json::Value)> {
        let output = self.config.output_path(stage);
        let metrics = match stage {
            Stage::DataLoader => {
                if self.config.sources.is_empty() {
                    return Err(EcotaxError::validation("no source files given"));
                }
                let loader =
                    DataLoader::new(self.config.loader.clone(), self.services.normalizer.clone());
                let document = loader.load(&self.config.sources, &output).await?;
                json!({ "metrics": document.metrics, "quality": document.quality })
            }
            Stage::Embeddings => {
                let titles = self.require(stage, Stage::DataLoader, checkpoint)?;
                let generator = EmbeddingGenerator::new(
                    self.config.embedding.clone(),
                    self.services.embedder.clone(),
                    self.services.vector_store.clone(),
                    self.services.metadata.clone(),
                );
                let report = generator.generate(&titles).await?;
                write_json(&output, &report)?;
                to_value(&report)?
            }
            Stage::Clustering => {
                self.require(stage, Stage::Embeddings, checkpoint)?;
                let engine = ClusteringEngine::new(
                    self.config.clustering.clone(),
                    self.services.vector_store.clone(),
                    self.services.metadata.clone(),
                );
                let document = engine.run(&output).await?;
                to_value(&document.metrics)?
            }
            Stage::Progression => {
                let clusters = self.require(stage, Stage::Clustering, checkpoint)?;
                let detector = ProgressionDetector::new(
                    self.config.progression.clone(),
                    self.services.metadata.clone(),
                );
                let document = detector.detect(&clusters, &output).await?;
                to_value(&document.statistics)?
            }
            Stage::Mapping => {
                let clusters = self.require(stage, Stage::Clustering, checkpoint)?;
                let progression = self.resolve_output(Stage::Progression, checkpoint);
                let progression = progression.exists().then_some(progression);
                let mapper =
                    OccupationMapper::new(self.config.mapping.clone(), self.services.scorer.clone());
                let document = mapper
                    .map(&clusters, progression.as_deref(), &output)
                    .await?;
                json!({
                    "occupations": document.occupations.len(),
                    "review_queue": document.review_queue.len(),
                    "skipped_noise_clusters": document.skipped_noise_clusters,
                    "used_progression": progression.is_some(),
                })
            }
        };
        Ok((output, metrics))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| EcotaxError::parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use ecotax_embeddings::{HashEmbeddingService, InMemoryVectorStore};
    use ecotax_shared::{ClustersDocument, OccupationsDocument};

    const DIM: usize = 64;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ecotax_test_{}", Uuid::now_v7()))
    }

    fn write_sources(dir: &Path) -> Vec<PathBuf> {
        std::fs::create_dir_all(dir).unwrap();
        let jsonl = dir.join("gupy.jsonl");
        std::fs::write(
            &jsonl,
            [
                r#"{"title": "Desenvolvedor Backend Júnior", "company": "A"}"#,
                r#"{"title": "Desenvolvedor Backend Pleno", "company": "B"}"#,
                r#"{"title": "Desenvolvedor Backend Sênior", "company": "C"}"#,
                r#"{"title": "Desenvolvedor Backend Sênior", "company": "D"}"#,
                r#"{"title": "Engenheiro de Dados", "company": "E"}"#,
                r#"{"title": "Engenheira de Dados", "company": "F"}"#,
            ]
            .join("\n"),
        )
        .unwrap();
        vec![jsonl]
    }

    fn config(workdir: &Path, sources: Vec<PathBuf>) -> PipelineConfig {
        let mut app = AppConfig::default();
        app.embeddings.expected_dim = DIM;
        app.clustering.eps = 0.6;
        app.clustering.min_samples = 2;
        let mut config = PipelineConfig::from(&app);
        config.workdir = workdir.to_path_buf();
        config.checkpoint_path = workdir.join("checkpoint.json");
        config.sources = sources;
        config.loader.incremental = false;
        config
    }

    fn services() -> PipelineServices {
        PipelineServices {
            normalizer: Arc::new(DefaultTitleNormalizer),
            embedder: Arc::new(HashEmbeddingService::new(DIM)),
            vector_store: Arc::new(InMemoryVectorStore::new()),
            metadata: Arc::new(NoopMetadataStore),
            scorer: Some(Arc::new(StringSimilarityScorer)),
            monitoring_sink: None,
        }
    }

    /// Records callback order.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressReporter for Recorder {
        fn stage_started(&self, stage: Stage) {
            self.0.lock().unwrap().push(format!("start:{stage}"));
        }
        fn stage_skipped(&self, stage: Stage, reason: &str) {
            self.0.lock().unwrap().push(format!("skip:{stage}:{reason}"));
        }
        fn stage_completed(&self, stage: Stage, _elapsed: Duration) {
            self.0.lock().unwrap().push(format!("done:{stage}"));
        }
        fn done(&self, _report: &PipelineReport) {
            self.0.lock().unwrap().push("finished".into());
        }
    }

    #[test]
    fn stage_names_parse() {
        assert_eq!("data-loader".parse::<Stage>().unwrap(), Stage::DataLoader);
        assert_eq!("MAPPING".parse::<Stage>().unwrap(), Stage::Mapping);
        assert!("publish".parse::<Stage>().is_err());
    }

    #[tokio::test]
    async fn full_run_writes_every_output_and_checkpoint() {
        let workdir = temp_dir();
        let sources = write_sources(&workdir.join("in"));
        let pipeline = Pipeline::new(config(&workdir, sources), services());
        let recorder = Recorder::default();
        let report = pipeline.run(&recorder).await.unwrap();

        for stage in Stage::ALL {
            assert_eq!(report.outcome(stage), Some(StageOutcome::Completed));
            assert!(workdir.join(stage.output_file()).exists(), "{stage}");
        }
        let checkpoint: Checkpoint = read_json(&workdir.join("checkpoint.json")).unwrap();
        assert_eq!(checkpoint.stages.len(), 5);
        let mapping = checkpoint.get(Stage::Mapping).unwrap();
        assert_eq!(mapping.sha256.len(), 64);
        assert_eq!(mapping.metrics["used_progression"], true);

        let occupations: OccupationsDocument =
            read_json(&workdir.join("eco_occupations.json")).unwrap();
        assert!(!occupations.occupations.is_empty());
        assert!(
            occupations
                .occupations
                .iter()
                .all(|o| o.occupation_id.starts_with("ECO.BR.SE.TECH."))
        );

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.first().map(String::as_str), Some("start:data_loader"));
        assert_eq!(events.last().map(String::as_str), Some("finished"));
        let _ = std::fs::remove_dir_all(&workdir);
    }

    #[tokio::test]
    async fn skipped_progression_is_optional_for_mapping() {
        let workdir = temp_dir();
        let sources = write_sources(&workdir.join("in"));
        let mut config = config(&workdir, sources);
        config.skip.insert(Stage::Progression);
        let report = Pipeline::new(config, services())
            .run(&SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.outcome(Stage::Progression), Some(StageOutcome::Skipped));
        assert_eq!(report.outcome(Stage::Mapping), Some(StageOutcome::Completed));
        let checkpoint: Checkpoint = read_json(&workdir.join("checkpoint.json")).unwrap();
        assert!(checkpoint.get(Stage::Progression).is_none());
        assert_eq!(
            checkpoint.get(Stage::Mapping).unwrap().metrics["used_progression"],
            false
        );
        let _ = std::fs::remove_dir_all(&workdir);
    }

    #[tokio::test]
    async fn missing_required_output_fails_without_checkpoint() {
        let workdir = temp_dir();
        let mut config = config(&workdir, Vec::new());
        config.resume_from = Some(Stage::Progression);
        let err = Pipeline::new(config, services())
            .run(&SilentProgress)
            .await
            .unwrap_err();
        match err {
            EcotaxError::MissingStageOutput { stage, path } => {
                assert_eq!(stage, "progression");
                assert!(path.ends_with("clusters.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!workdir.join("checkpoint.json").exists());
        let _ = std::fs::remove_dir_all(&workdir);
    }

    #[tokio::test]
    async fn resume_reuses_checkpointed_outputs() {
        let workdir = temp_dir();
        let sources = write_sources(&workdir.join("in"));
        let services = services();
        Pipeline::new(config(&workdir, sources.clone()), services.clone())
            .run(&SilentProgress)
            .await
            .unwrap();
        let before: Checkpoint = read_json(&workdir.join("checkpoint.json")).unwrap();

        let mut resumed = config(&workdir, sources);
        resumed.resume_from = Some(Stage::Progression);
        let recorder = Recorder::default();
        let report = Pipeline::new(resumed, services)
            .run(&recorder)
            .await
            .unwrap();

        assert_eq!(report.outcome(Stage::DataLoader), Some(StageOutcome::Resumed));
        assert_eq!(report.outcome(Stage::Clustering), Some(StageOutcome::Resumed));
        assert_eq!(report.outcome(Stage::Progression), Some(StageOutcome::Completed));
        let after: Checkpoint = read_json(&workdir.join("checkpoint.json")).unwrap();
        assert_eq!(after.get(Stage::Clustering), before.get(Stage::Clustering));
        assert!(
            recorder
                .0
                .lock()
                .unwrap()
                .contains(&"skip:data_loader:resumed".to_string())
        );

        let clusters: ClustersDocument = read_json(&workdir.join("clusters.json")).unwrap();
        assert!(clusters.metrics.cluster_count > 0);
        let _ = std::fs::remove_dir_all(&workdir);
    }

    #[tokio::test]
    async fn failed_stage_emits_event_and_stops() {
        let workdir = temp_dir();
        let events = workdir.join("events.jsonl");
        let mut services = services();
        services.monitoring_sink = Some(Arc::new(JsonlMonitoringSink::new(&events)));
        // One worker keeps the event order on disk.
        let mut config = config(&workdir, Vec::new());
        config.monitoring_workers = 1;
        // No sources: the loader stage fails validation.
        let err = Pipeline::new(config, services)
            .run(&SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, EcotaxError::Validation { .. }));

        let content = std::fs::read_to_string(&events).unwrap();
        let last = content.lines().last().unwrap();
        assert!(last.contains("\"failed\""));
        assert!(last.contains("data_loader"));
        assert!(!workdir.join("checkpoint.json").exists());
        let _ = std::fs::remove_dir_all(&workdir);
    }
}
