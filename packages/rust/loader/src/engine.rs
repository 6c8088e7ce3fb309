//! Data Loader engine.
//!
//! Reads posting files through a bounded worker pool, normalizes and
//! deduplicates titles into frequency-weighted aggregates, merges with the
//! previous run's output, and writes `normalized_titles.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use ecotax_normalize::TitleNormalizer;
use ecotax_shared::{
    AggregatedTitle, LoaderConfig, LoaderMetrics, NormalizedTitlesDocument, QualityStats,
    RawPosting, Result, read_json, write_json,
};

use crate::formats::{FormatRegistry, ParsedSource, SourceFormat};
use crate::record::{self, Timestamp};

// ---------------------------------------------------------------------------
// Source reading
// ---------------------------------------------------------------------------

/// What happened when one source file was read.
#[derive(Debug)]
enum SourceRead {
    Parsed(ParsedSource),
    /// Missing or unreadable file.
    Unreadable(String),
    /// Readable, but not a valid document in its format.
    Malformed(String),
}

async fn read_source(path: PathBuf, format: Arc<dyn SourceFormat>) -> SourceRead {
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => return SourceRead::Unreadable(e.to_string()),
    };
    match format.parse(&content) {
        Ok(parsed) => {
            debug!(
                path = %path.display(),
                format = format.name(),
                records = parsed.records.len(),
                malformed = parsed.malformed,
                "parsed source"
            );
            SourceRead::Parsed(parsed)
        }
        Err(e) => SourceRead::Malformed(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// DataLoader
// ---------------------------------------------------------------------------

/// Ingests posting files into deduplicated [`AggregatedTitle`]s.
pub struct DataLoader {
    config: LoaderConfig,
    normalizer: Arc<dyn TitleNormalizer>,
    registry: FormatRegistry,
}

impl DataLoader {
    pub fn new(config: LoaderConfig, normalizer: Arc<dyn TitleNormalizer>) -> Self {
        Self {
            config,
            normalizer,
            registry: FormatRegistry::new(),
        }
    }

    /// Load `sources`, merge with the document at `output` when incremental,
    /// and write the result to `output`.
    ///
    /// Fails only on an unsupported source extension or when the output
    /// cannot be written; every data-quality problem is counted instead.
    #[instrument(skip_all, fields(sources = sources.len(), output = %output.display()))]
    pub async fn load(&self, sources: &[PathBuf], output: &Path) -> Result<NormalizedTitlesDocument> {
        let start = Instant::now();

        // Resolve every format up front so a bad extension aborts before any work.
        let mut resolved = Vec::with_capacity(sources.len());
        for path in sources {
            resolved.push((path.clone(), self.registry.detect(path)?));
        }

        let reads = self.read_all(resolved).await;

        let mut metrics = LoaderMetrics {
            sources_requested: sources.len(),
            ..Default::default()
        };
        let mut titles: BTreeMap<String, AggregatedTitle> = BTreeMap::new();

        'sources: for (path, read) in reads {
            let parsed = match read {
                SourceRead::Parsed(parsed) => parsed,
                SourceRead::Unreadable(reason) => {
                    warn!(path = %path.display(), %reason, "source unreadable, skipping");
                    metrics.skipped_sources.push(path.display().to_string());
                    continue;
                }
                SourceRead::Malformed(reason) => {
                    warn!(path = %path.display(), %reason, "source malformed, skipping");
                    metrics.malformed_sources += 1;
                    metrics.skipped_sources.push(path.display().to_string());
                    continue;
                }
            };

            metrics.malformed_records += parsed.malformed;
            let default_source = source_tag_from_path(&path);

            for raw in parsed.records {
                if let Some(cap) = self.config.max_records {
                    if metrics.records_read >= cap {
                        metrics.truncated = true;
                        break 'sources;
                    }
                }
                metrics.records_read += 1;

                if let Some(posting) = self.to_posting(raw, &default_source, &mut metrics) {
                    metrics.records_accepted += 1;
                    match titles.get_mut(&posting.normalized_title) {
                        Some(agg) => agg.record(&posting),
                        None => {
                            titles.insert(
                                posting.normalized_title.clone(),
                                AggregatedTitle::from_posting(&posting),
                            );
                        }
                    }
                }
            }
        }

        if self.config.incremental {
            titles = self.merge_previous(output, titles, &mut metrics);
        }

        let before = titles.len();
        let min_frequency = self.config.min_frequency;
        titles.retain(|_, agg| agg.frequency >= min_frequency);
        metrics.dropped_low_frequency = before - titles.len();
        metrics.unique_titles = titles.len();

        let quality = quality_stats(titles.values().map(|t| t.frequency));
        let document = NormalizedTitlesDocument {
            titles,
            metrics,
            generated_at: Utc::now(),
            quality,
        };
        write_json(output, &document)?;

        info!(
            records_read = document.metrics.records_read,
            records_accepted = document.metrics.records_accepted,
            unique_titles = document.metrics.unique_titles,
            dropped_low_frequency = document.metrics.dropped_low_frequency,
            merged_previous = document.metrics.merged_previous,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "data loading complete"
        );

        Ok(document)
    }

    /// Read every source, in parallel when allowed. Results keep source order.
    async fn read_all(
        &self,
        resolved: Vec<(PathBuf, Arc<dyn SourceFormat>)>,
    ) -> Vec<(PathBuf, SourceRead)> {
        let parallelism = self.config.parallelism.max(1);
        let mut reads = Vec::with_capacity(resolved.len());

        if parallelism == 1 || resolved.len() < 2 {
            for (path, format) in resolved {
                let read = read_source(path.clone(), format).await;
                reads.push((path, read));
            }
            return reads;
        }

        debug!(workers = parallelism, "reading sources through worker pool");
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut handles = Vec::with_capacity(resolved.len());

        for (path, format) in resolved {
            let sem = semaphore.clone();
            let task_path = path.clone();
            handles.push((
                path,
                tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire().await else {
                        return SourceRead::Unreadable("worker pool closed".into());
                    };
                    read_source(task_path, format).await
                }),
            ));
        }

        for (path, handle) in handles {
            let read = match handle.await {
                Ok(read) => read,
                Err(e) => SourceRead::Unreadable(format!("reader task failed: {e}")),
            };
            reads.push((path, read));
        }
        reads
    }

    /// Turn one raw record into a posting, or count why it was rejected.
    fn to_posting(
        &self,
        raw: serde_json::Map<String, serde_json::Value>,
        default_source: &str,
        metrics: &mut LoaderMetrics,
    ) -> Option<RawPosting> {
        let Some(title) = record::first_text(&raw, record::TITLE_FIELDS) else {
            metrics.invalid_titles += 1;
            return None;
        };
        let normalized_title = self.normalizer.normalize(&title);
        if normalized_title.is_empty() {
            metrics.invalid_titles += 1;
            return None;
        }

        let source = record::first_text(&raw, &[record::SOURCE_FIELD])
            .unwrap_or_else(|| default_source.to_string());
        if !self.config.allowed_sources.is_empty()
            && !self.config.allowed_sources.iter().any(|s| s == &source)
        {
            metrics.filtered_source += 1;
            return None;
        }

        let posted_at = match record::posted_at(&raw) {
            Timestamp::Parsed(ts) => Some(ts),
            Timestamp::Absent => None,
            Timestamp::Unparseable => {
                metrics.unparseable_timestamps += 1;
                None
            }
        };

        Some(RawPosting {
            company: record::first_text(&raw, record::COMPANY_FIELDS),
            location: record::first_text(&raw, record::LOCATION_FIELDS),
            title,
            normalized_title,
            posted_at,
            source,
            metadata: raw,
        })
    }

    /// Fold the previous output into this run's aggregates.
    ///
    /// Previous entries come first so their canonical titles and examples win.
    fn merge_previous(
        &self,
        output: &Path,
        current: BTreeMap<String, AggregatedTitle>,
        metrics: &mut LoaderMetrics,
    ) -> BTreeMap<String, AggregatedTitle> {
        if !output.exists() {
            debug!(path = %output.display(), "no previous output, starting fresh");
            return current;
        }

        let previous: NormalizedTitlesDocument = match read_json(output) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    path = %output.display(),
                    error = %e,
                    "previous output unreadable, continuing without incremental merge"
                );
                return current;
            }
        };

        metrics.merged_previous = true;
        metrics.previous_titles = previous.titles.len();

        let mut merged = previous.titles;
        for (key, agg) in current {
            match merged.get_mut(&key) {
                Some(existing) => existing.merge(&agg),
                None => {
                    merged.insert(key, agg);
                }
            }
        }
        info!(previous_titles = metrics.previous_titles, "merged previous output");
        merged
    }
}

/// Source tag used when a record has no `source` field: the file stem.
fn source_tag_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

// ---------------------------------------------------------------------------
// Quality statistics
// ---------------------------------------------------------------------------

fn quality_stats(frequencies: impl Iterator<Item = u64>) -> QualityStats {
    let mut values: Vec<u64> = frequencies.collect();
    if values.is_empty() {
        return QualityStats::default();
    }
    values.sort_unstable();

    let count = values.len();
    let total: u64 = values.iter().sum();
    QualityStats {
        count,
        total_frequency: total,
        mean_frequency: total as f64 / count as f64,
        median_frequency: percentile(&values, 0.5),
        p95_frequency: percentile(&values, 0.95),
        min_frequency: values[0],
        max_frequency: values[count - 1],
    }
}

/// Linear-interpolated percentile over sorted values.
fn percentile(sorted: &[u64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    sorted[lower] as f64 * (1.0 - weight) + sorted[upper] as f64 * weight
}
