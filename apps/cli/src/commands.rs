//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use ecotax_clustering::ClusteringEngine;
use ecotax_core::{
    OccupationMapper, Pipeline, PipelineConfig, PipelineReport, PipelineServices,
    ProgressReporter, ProgressionDetector, Stage, StageOutcome,
};
use ecotax_embeddings::EmbeddingGenerator;
use ecotax_loader::DataLoader;
use ecotax_shared::{
    AppConfig, ClusteringConfig, ClusteringMethod, EmbeddingConfig, LoaderConfig, MappingConfig,
    ProgressionConfig, init_config, load_config, load_config_from, validate_api_key, write_json,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ecotax: build an occupation taxonomy from job postings.
#[derive(Parser)]
#[command(
    name = "ecotax",
    version,
    about = "Turn Brazilian tech job postings into a canonical occupation taxonomy.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.ecotax/ecotax.toml).
    #[arg(long, global = true, env = "ECOTAX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Load posting files into deduplicated, normalized titles.
    Load {
        /// JSON, JSON-Lines or CSV posting files.
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        min_frequency: Option<u64>,

        /// Stop after this many records (in source order).
        #[arg(long)]
        max_records: Option<u64>,

        /// Only accept records with this source tag (repeatable).
        #[arg(long = "allow-source")]
        allow_source: Vec<String>,

        #[arg(long)]
        parallelism: Option<usize>,

        /// Ignore the previous output instead of merging with it.
        #[arg(long)]
        no_incremental: bool,
    },

    /// Embed normalized titles into the vector store.
    Embed {
        /// Data Loader output.
        titles: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        chunk_type: Option<String>,

        /// Re-embed titles that already have a vector.
        #[arg(long)]
        overwrite: bool,

        #[arg(long)]
        no_incremental: bool,

        /// Where to write the embedding report.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cluster title embeddings into occupation groups.
    Cluster {
        /// density or centroid.
        #[arg(long)]
        method: Option<ClusteringMethod>,

        #[arg(long)]
        chunk_type: Option<String>,

        #[arg(long)]
        eps: Option<f64>,

        #[arg(long)]
        min_samples: Option<usize>,

        #[arg(long)]
        k_start: Option<usize>,

        #[arg(long)]
        k_end: Option<usize>,

        /// Fixed k for centroid clustering (skips model selection).
        #[arg(long)]
        k: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for the summary-statistics artifact.
        #[arg(long)]
        viz_dir: Option<PathBuf>,
    },

    /// Detect seniority progressions inside clusters.
    Progression {
        /// Clustering Engine output.
        clusters: PathBuf,

        #[arg(long)]
        min_confidence: Option<f64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Map clusters to canonical occupations.
    Map {
        /// Clustering Engine output.
        clusters: PathBuf,

        /// Career Progression Detector output.
        #[arg(long)]
        progression: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Category segment of occupation ids.
        #[arg(long)]
        category: Option<String>,
    },

    /// Run every stage in order with checkpointing.
    Run {
        /// Posting files for the Data Loader.
        sources: Vec<PathBuf>,

        #[arg(long)]
        workdir: Option<PathBuf>,

        #[arg(long)]
        min_frequency: Option<u64>,

        #[arg(long)]
        dbscan_eps: Option<f64>,

        #[arg(long)]
        dbscan_min_samples: Option<usize>,

        /// Stage to leave out (repeatable).
        #[arg(long)]
        skip: Vec<Stage>,

        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Reuse checkpointed outputs of every stage before this one.
        #[arg(long)]
        resume_from: Option<Stage>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        parallelism: Option<usize>,

        #[arg(long)]
        no_incremental: bool,

        #[arg(long)]
        no_monitoring: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "ecotax=info",
        1 => "ecotax=debug",
        _ => "ecotax=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Load {
            sources,
            output,
            min_frequency,
            max_records,
            allow_source,
            parallelism,
            no_incremental,
        } => {
            let mut loader = LoaderConfig::from(&config);
            if let Some(v) = min_frequency {
                loader.min_frequency = v;
            }
            if let Some(v) = parallelism {
                loader.parallelism = v;
            }
            loader.max_records = max_records;
            loader.allowed_sources = allow_source;
            loader.incremental &= !no_incremental;
            cmd_load(&config, loader, &sources, output).await
        }
        Command::Embed {
            titles,
            batch_size,
            chunk_type,
            overwrite,
            no_incremental,
            output,
        } => {
            let mut embedding = EmbeddingConfig::from(&config);
            if let Some(v) = batch_size {
                embedding.batch_size = v;
            }
            if let Some(v) = chunk_type {
                embedding.chunk_type = v;
            }
            embedding.overwrite = overwrite;
            embedding.incremental &= !no_incremental;
            cmd_embed(&config, embedding, &titles, output).await
        }
        Command::Cluster {
            method,
            chunk_type,
            eps,
            min_samples,
            k_start,
            k_end,
            k,
            output,
            viz_dir,
        } => {
            let mut clustering = ClusteringConfig::from(&config);
            if let Some(v) = method {
                clustering.method = v;
            }
            if let Some(v) = chunk_type {
                clustering.chunk_type = v;
            }
            if let Some(v) = eps {
                clustering.eps = v;
            }
            if let Some(v) = min_samples {
                clustering.min_samples = v;
            }
            if let Some(v) = k_start {
                clustering.k_start = v;
            }
            if let Some(v) = k_end {
                clustering.k_end = v;
            }
            clustering.k = k.or(clustering.k);
            clustering.viz_dir = viz_dir.or(clustering.viz_dir);
            cmd_cluster(&config, clustering, output).await
        }
        Command::Progression {
            clusters,
            min_confidence,
            output,
        } => {
            let mut progression = ProgressionConfig::from(&config);
            if let Some(v) = min_confidence {
                progression.min_confidence = v;
            }
            cmd_progression(&config, progression, &clusters, output).await
        }
        Command::Map {
            clusters,
            progression,
            output,
            category,
        } => {
            let mut mapping = MappingConfig::from(&config);
            if let Some(v) = category {
                mapping.category = v;
            }
            cmd_map(&config, mapping, &clusters, progression.as_deref(), output).await
        }
        Command::Run {
            sources,
            workdir,
            min_frequency,
            dbscan_eps,
            dbscan_min_samples,
            skip,
            checkpoint,
            resume_from,
            category,
            parallelism,
            no_incremental,
            no_monitoring,
        } => {
            let mut pipeline = PipelineConfig::from(&config);
            if let Some(dir) = workdir {
                pipeline.checkpoint_path = dir.join("pipeline_checkpoint.json");
                pipeline.workdir = dir;
            }
            if let Some(path) = checkpoint {
                pipeline.checkpoint_path = path;
            }
            if let Some(v) = min_frequency {
                pipeline.loader.min_frequency = v;
            }
            if let Some(v) = parallelism {
                pipeline.loader.parallelism = v;
            }
            if let Some(v) = dbscan_eps {
                pipeline.clustering.eps = v;
            }
            if let Some(v) = dbscan_min_samples {
                pipeline.clustering.min_samples = v;
            }
            if let Some(v) = category {
                pipeline.mapping.category = v;
            }
            if no_incremental {
                pipeline.loader.incremental = false;
                pipeline.embedding.incremental = false;
            }
            pipeline.monitoring_enabled &= !no_monitoring;
            pipeline.sources = sources;
            pipeline.skip = skip.into_iter().collect();
            pipeline.resume_from = resume_from;
            cmd_run(&config, pipeline).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn workdir(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.defaults.workdir)
}

fn output_or_default(config: &AppConfig, output: Option<PathBuf>, stage: Stage) -> PathBuf {
    output.unwrap_or_else(|| workdir(config).join(stage.output_file()))
}

async fn cmd_load(
    config: &AppConfig,
    loader: LoaderConfig,
    sources: &[PathBuf],
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output_or_default(config, output, Stage::DataLoader);
    let services = PipelineServices::from_config(config, &workdir(config)).await?;
    info!(sources = sources.len(), output = %output.display(), "loading postings");

    let document = DataLoader::new(loader, services.normalizer)
        .load(sources, &output)
        .await?;

    println!();
    println!("  Titles loaded");
    println!("  Records read:   {}", document.metrics.records_read);
    println!("  Accepted:       {}", document.metrics.records_accepted);
    println!("  Unique titles:  {}", document.metrics.unique_titles);
    println!("  Skipped files:  {}", document.metrics.skipped_sources.len());
    println!("  Output:         {}", output.display());
    println!();
    Ok(())
}

async fn cmd_embed(
    config: &AppConfig,
    embedding: EmbeddingConfig,
    titles: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    validate_api_key(config)?;
    let output = output_or_default(config, output, Stage::Embeddings);
    let services = PipelineServices::from_config(config, &workdir(config)).await?;

    let report = EmbeddingGenerator::new(
        embedding,
        services.embedder,
        services.vector_store,
        services.metadata,
    )
    .generate(titles)
    .await?;
    write_json(&output, &report)?;

    println!();
    println!("  Embeddings generated");
    println!("  Titles:     {}", report.total_titles);
    println!("  New:        {}", report.new_embeddings);
    println!("  Skipped:    {}", report.skipped);
    println!("  Dimension:  {}", report.expected_dimension);
    println!("  Report:     {}", output.display());
    println!();
    Ok(())
}

async fn cmd_cluster(
    config: &AppConfig,
    clustering: ClusteringConfig,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output_or_default(config, output, Stage::Clustering);
    let services = PipelineServices::from_config(config, &workdir(config)).await?;

    let document = ClusteringEngine::new(clustering, services.vector_store, services.metadata)
        .run(&output)
        .await?;

    let fmt_score = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |s| format!("{s:.3}"));
    println!();
    println!("  Clustering complete ({})", document.method);
    println!("  Points:          {}", document.metrics.total_points);
    println!("  Clusters:        {}", document.metrics.cluster_count);
    println!("  Noise:           {}", document.metrics.noise_count);
    println!("  Silhouette:      {}", fmt_score(document.metrics.silhouette));
    println!("  Davies-Bouldin:  {}", fmt_score(document.metrics.davies_bouldin));
    println!("  Output:          {}", output.display());
    println!();
    Ok(())
}

async fn cmd_progression(
    config: &AppConfig,
    progression: ProgressionConfig,
    clusters: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output_or_default(config, output, Stage::Progression);
    let services = PipelineServices::from_config(config, &workdir(config)).await?;

    let document = ProgressionDetector::new(progression, services.metadata)
        .detect(clusters, &output)
        .await?;

    println!();
    println!("  Progressions detected");
    for edge in &document.progressions {
        println!(
            "  {:>16} -> {:<16} confidence {:.2} ({} transitions)",
            edge.from_level, edge.to_level, edge.confidence, edge.evidence_count
        );
    }
    println!("  Coverage:  {:.0}%", document.validation.coverage * 100.0);
    println!("  Output:    {}", output.display());
    println!();
    Ok(())
}

async fn cmd_map(
    config: &AppConfig,
    mapping: MappingConfig,
    clusters: &Path,
    progression: Option<&Path>,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output_or_default(config, output, Stage::Mapping);
    let services = PipelineServices::from_config(config, &workdir(config)).await?;

    let document = OccupationMapper::new(mapping, services.scorer)
        .map(clusters, progression, &output)
        .await?;

    println!();
    println!("  Occupations mapped");
    println!("  Occupations:   {}", document.occupations.len());
    println!("  Needs review:  {}", document.review_queue.len());
    println!("  Output:        {}", output.display());
    println!();
    Ok(())
}

async fn cmd_run(config: &AppConfig, pipeline: PipelineConfig) -> Result<()> {
    if !pipeline.skip.contains(&Stage::Embeddings)
        && pipeline.resume_from.is_none_or(|r| r <= Stage::Embeddings)
    {
        validate_api_key(config)?;
    }
    let services = PipelineServices::from_config(config, &pipeline.workdir).await?;

    info!(
        sources = pipeline.sources.len(),
        workdir = %pipeline.workdir.display(),
        "running pipeline"
    );

    let reporter = CliProgress::new();
    let report = Pipeline::new(pipeline, services).run(&reporter).await?;

    println!();
    println!("  Pipeline complete (run {})", report.run_id);
    for stage in &report.stages {
        let outcome = match stage.outcome {
            StageOutcome::Completed => format!("done in {:.1}s", stage.elapsed.as_secs_f64()),
            StageOutcome::Skipped => "skipped".to_string(),
            StageOutcome::Resumed => "reused from checkpoint".to_string(),
        };
        println!("  {:<12} {outcome}", stage.stage.as_str());
    }
    println!("  Checkpoint:  {}", report.checkpoint_path.display());
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!("Running {stage}"));
    }

    fn stage_skipped(&self, stage: Stage, reason: &str) {
        self.spinner.println(format!("  - {stage} ({reason})"));
    }

    fn stage_completed(&self, stage: Stage, elapsed: Duration) {
        self.spinner
            .println(format!("  ✓ {stage} ({:.1}s)", elapsed.as_secs_f64()));
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "ecotax",
            "run",
            "a.jsonl",
            "b.csv",
            "--skip",
            "progression",
            "--resume-from",
            "clustering",
            "--dbscan-eps",
            "0.3",
            "--no-monitoring",
        ]);
        match cli.command {
            Command::Run {
                sources,
                skip,
                resume_from,
                dbscan_eps,
                no_monitoring,
                ..
            } => {
                assert_eq!(sources.len(), 2);
                assert_eq!(skip, vec![Stage::Progression]);
                assert_eq!(resume_from, Some(Stage::Clustering));
                assert_eq!(dbscan_eps, Some(0.3));
                assert!(no_monitoring);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cluster_method_parses() {
        let cli = Cli::parse_from(["ecotax", "cluster", "--method", "centroid", "--k-start", "3"]);
        match cli.command {
            Command::Cluster { method, k_start, .. } => {
                assert_eq!(method, Some(ClusteringMethod::Centroid));
                assert_eq!(k_start, Some(3));
            }
            _ => panic!("expected cluster"),
        }
    }
}
