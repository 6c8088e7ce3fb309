//! Career Progression Detector: seniority transitions inferred from clusters.
//!
//! Every member title of a cluster is matched against a ladder of seniority
//! levels. Distinct levels found in one cluster, sorted by rank, contribute
//! one transition per consecutive pair.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use ecotax_normalize::fold_lower;
use ecotax_shared::{
    Cluster, ClustersDocument, EcotaxError, EdgeRef, LevelSummary, MAX_EDGE_EXAMPLES,
    ProgressionConfig, ProgressionDocument, ProgressionEdge, ProgressionStatistics,
    ProgressionValidation, Result, read_json, write_json,
};
use ecotax_storage::MetadataStore;

/// Transitions needed for full confidence.
const FULL_CONFIDENCE_EVIDENCE: f64 = 10.0;

/// Floor for the "low confidence" validation bucket.
const LOW_CONFIDENCE_FLOOR: f64 = 0.3;

/// Track name used when no track keyword matches.
pub const GENERAL_TRACK: &str = "general";

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// Canonical seniority levels, in ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SeniorityLevel {
    Intern,
    Junior,
    JuniorMid,
    Mid,
    Senior,
    SeniorTechnical,
    TechLead,
    Principal,
    Coordinator,
    Manager,
}

impl SeniorityLevel {
    pub const ALL: [SeniorityLevel; 10] = [
        Self::Intern,
        Self::Junior,
        Self::JuniorMid,
        Self::Mid,
        Self::Senior,
        Self::SeniorTechnical,
        Self::TechLead,
        Self::Principal,
        Self::Coordinator,
        Self::Manager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intern => "intern",
            Self::Junior => "junior",
            Self::JuniorMid => "junior-mid",
            Self::Mid => "mid",
            Self::Senior => "senior",
            Self::SeniorTechnical => "senior-technical",
            Self::TechLead => "tech-lead",
            Self::Principal => "principal",
            Self::Coordinator => "coordinator",
            Self::Manager => "manager",
        }
    }

    /// Position on the canonical ladder.
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

/// Detection order: compound levels, then leadership, then the plain ladder.
static LEVEL_PATTERNS: LazyLock<Vec<(SeniorityLevel, Regex)>> = LazyLock::new(|| {
    use SeniorityLevel::*;
    [
        (
            JuniorMid,
            r"\b(junior|jr)\s*[/\-]\s*(pleno|pl)\b|\b(pleno|pl)\s*[/\-]\s*(junior|jr)\b",
        ),
        (
            SeniorTechnical,
            r"\bespecialista\b|\bspecialist\b|\b(senior|sr)\s*[/\-]\s*(tecnico|especialista)\b",
        ),
        (
            TechLead,
            r"\btech[\s\-]?lead\b|\blider\s+tecnic[oa]\b|\bteam\s+lead\b|\blider\s+de\s+(equipe|time)\b",
        ),
        (Manager, r"\b(gerente|manager|head|diretor|diretora)\b"),
        (Coordinator, r"\b(coordenador|coordenadora|coordinator)\b"),
        (Principal, r"\b(principal|staff)\b"),
        (Intern, r"\b(estagiario|estagiaria|estagio|intern|trainee|aprendiz)\b"),
        (Senior, r"\b(senior|sr)\b"),
        (Mid, r"\b(pleno|mid|mid[\s\-]level)\b"),
        (Junior, r"\b(junior|jr)\b"),
    ]
    .into_iter()
    .map(|(level, pattern)| (level, Regex::new(pattern).expect("valid level regex")))
    .collect()
});

/// Track keyword patterns, in tie-break order.
static TRACK_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("frontend", r"\bfront[\s\-]?end\b|\b(react|angular|vue)\b"),
        ("backend", r"\bback[\s\-]?end\b|\b(java|python|golang|php|node|ruby)\b"),
        ("mobile", r"\bmobile\b|\b(android|ios|flutter)\b"),
        ("data", r"\b(dados|data|analytics)\b|\bmachine\s+learning\b"),
        ("devops", r"\bdev[\s\-]?ops\b|\b(sre|cloud|infraestrutura)\b"),
        ("qa", r"\b(qa|qualidade|teste|testes|tester)\b"),
    ]
    .into_iter()
    .map(|(track, pattern)| (track, Regex::new(pattern).expect("valid track regex")))
    .collect()
});

/// Edges of the known progression ladders.
fn expected_edges() -> BTreeSet<EdgeRef> {
    use SeniorityLevel::*;
    let ladders: [&[SeniorityLevel]; 4] = [
        &[Intern, Junior, Mid, Senior, TechLead, Principal],
        &[Junior, JuniorMid, Mid, Senior, SeniorTechnical, Principal],
        &[Senior, Coordinator, Manager],
        &[TechLead, Manager],
    ];
    ladders
        .iter()
        .flat_map(|ladder| {
            ladder
                .windows(2)
                .map(|w| EdgeRef::new(w[0].as_str(), w[1].as_str()))
        })
        .collect()
}

/// First matching level for a title, if any.
pub fn detect_level(title: &str) -> Option<SeniorityLevel> {
    let folded = fold_lower(title);
    LEVEL_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&folded))
        .map(|(level, _)| *level)
}

/// All tracks a title mentions.
fn detect_tracks(title: &str) -> Vec<&'static str> {
    let folded = fold_lower(title);
    TRACK_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(&folded))
        .map(|(track, _)| *track)
        .collect()
}

/// Most-mentioned track across the member titles; ties go to the earlier track.
fn dominant_track(cluster: &Cluster) -> &'static str {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for member in &cluster.members {
        for track in detect_tracks(&member.title) {
            *counts.entry(track).or_default() += 1;
        }
    }
    TRACK_PATTERNS
        .iter()
        .map(|(track, _)| *track)
        .filter_map(|track| counts.get(track).map(|&c| (track, c)))
        .fold(None, |best: Option<(&'static str, usize)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map_or(GENERAL_TRACK, |(track, _)| track)
}

// ---------------------------------------------------------------------------
// Edge accumulation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EdgeCounts {
    counts: BTreeMap<(SeniorityLevel, SeniorityLevel), (u64, Vec<String>)>,
    total: u64,
}

impl EdgeCounts {
    fn add(&mut self, from: SeniorityLevel, to: SeniorityLevel, example: Option<&str>) {
        let entry = self.counts.entry((from, to)).or_default();
        entry.0 += 1;
        self.total += 1;
        if let Some(example) = example {
            if entry.1.len() < MAX_EDGE_EXAMPLES && !entry.1.iter().any(|e| e == example) {
                entry.1.push(example.to_string());
            }
        }
    }

    /// Scored edges split into `(kept, dropped_count)`.
    fn finish(self, min_confidence: f64) -> (Vec<ProgressionEdge>, usize) {
        let total = self.total.max(1) as f64;
        let (mut kept, dropped): (Vec<_>, Vec<_>) = self
            .counts
            .into_iter()
            .map(|((from, to), (count, examples))| ProgressionEdge {
                from_level: from.as_str().to_string(),
                to_level: to.as_str().to_string(),
                confidence: (count as f64 / FULL_CONFIDENCE_EVIDENCE).min(1.0),
                evidence_count: count,
                probability: count as f64 / total,
                examples,
            })
            .partition(|e| e.confidence >= min_confidence);
        sort_edges(&mut kept);
        (kept, dropped.len())
    }
}

fn sort_edges(edges: &mut [ProgressionEdge]) {
    edges.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.evidence_count.cmp(&a.evidence_count))
            .then_with(|| a.from_level.cmp(&b.from_level))
            .then_with(|| a.to_level.cmp(&b.to_level))
    });
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Turns cluster membership into a seniority-transition graph.
pub struct ProgressionDetector {
    config: ProgressionConfig,
    metadata: Arc<dyn MetadataStore>,
}

impl ProgressionDetector {
    pub fn new(config: ProgressionConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { config, metadata }
    }

    /// Read clusters from `clusters_path`, detect edges, persist them and write
    /// the document to `output`.
    #[instrument(skip_all, fields(min_confidence = self.config.min_confidence))]
    pub async fn detect(&self, clusters_path: &Path, output: &Path) -> Result<ProgressionDocument> {
        let start = Instant::now();
        let clusters: ClustersDocument = read_json(clusters_path)?;
        let mut document = self.analyze(&clusters)?;

        for edge in &document.progressions {
            match self.metadata.upsert_progression_edge(edge).await {
                Ok(()) => document.statistics.persisted_edges += 1,
                Err(e) => warn!(
                    from = %edge.from_level,
                    to = %edge.to_level,
                    error = %e,
                    "progression edge persistence failed"
                ),
            }
        }

        write_json(output, &document)?;
        info!(
            clusters = document.statistics.clusters_analyzed,
            edges = document.progressions.len(),
            persisted = document.statistics.persisted_edges,
            coverage = document.validation.coverage,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "progression detection complete"
        );
        Ok(document)
    }

    /// Pure edge detection over an in-memory clustering result.
    pub fn analyze(&self, clusters: &ClustersDocument) -> Result<ProgressionDocument> {
        let min_confidence = self.config.min_confidence;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(EcotaxError::validation(format!(
                "min_confidence must be within [0, 1], got {min_confidence}"
            )));
        }

        let mut statistics = ProgressionStatistics::default();
        let mut level_titles: BTreeMap<SeniorityLevel, u64> = BTreeMap::new();
        let mut level_clusters: BTreeMap<SeniorityLevel, u64> = BTreeMap::new();
        let mut tracks: BTreeMap<String, u64> = BTreeMap::new();
        let mut global = EdgeCounts::default();
        let mut per_track: BTreeMap<&'static str, EdgeCounts> = BTreeMap::new();

        for cluster in clusters.clusters.values().filter(|c| !c.is_noise()) {
            statistics.clusters_analyzed += 1;

            let mut levels = BTreeSet::new();
            for member in &cluster.members {
                let title = if member.title.is_empty() {
                    &member.normalized_title
                } else {
                    &member.title
                };
                match detect_level(title) {
                    Some(level) => {
                        statistics.titles_with_level += 1;
                        *level_titles.entry(level).or_default() += 1;
                        levels.insert(level);
                    }
                    None => statistics.titles_without_level += 1,
                }
            }
            for level in &levels {
                *level_clusters.entry(*level).or_default() += 1;
            }

            let track = dominant_track(cluster);
            *tracks.entry(track.to_string()).or_default() += 1;

            if levels.len() < 2 {
                continue;
            }
            statistics.clusters_with_progression += 1;

            // BTreeSet iterates in rank order.
            let sorted: Vec<SeniorityLevel> = levels.into_iter().collect();
            let example = cluster.representative_title.as_deref();
            for pair in sorted.windows(2) {
                global.add(pair[0], pair[1], example);
                per_track
                    .entry(track)
                    .or_default()
                    .add(pair[0], pair[1], example);
            }
            debug!(cluster = %cluster.cluster_key, track, levels = sorted.len(), "cluster contributes transitions");
        }

        statistics.total_transitions = global.total;
        let (progressions, dropped) = global.finish(min_confidence);
        statistics.edges_kept = progressions.len();
        statistics.edges_dropped = dropped;

        let track_progressions = per_track
            .into_iter()
            .map(|(track, counts)| (track.to_string(), counts.finish(min_confidence).0))
            .filter(|(_, edges)| !edges.is_empty())
            .collect();

        let levels = SeniorityLevel::ALL
            .iter()
            .map(|level| LevelSummary {
                level: level.as_str().to_string(),
                rank: level.rank(),
                title_count: level_titles.get(level).copied().unwrap_or(0),
                cluster_count: level_clusters.get(level).copied().unwrap_or(0),
            })
            .collect();

        let validation = validate(&progressions, min_confidence);

        Ok(ProgressionDocument {
            levels,
            tracks,
            progressions,
            track_progressions,
            statistics,
            validation,
            min_confidence,
            generated_at: Utc::now(),
        })
    }
}

/// Compare kept edges against the known ladders.
fn validate(edges: &[ProgressionEdge], min_confidence: f64) -> ProgressionValidation {
    let expected = expected_edges();
    let threshold = min_confidence.max(LOW_CONFIDENCE_FLOOR);

    let observed: BTreeSet<EdgeRef> = edges
        .iter()
        .map(|e| EdgeRef::new(&e.from_level, &e.to_level))
        .collect();
    let matched = observed.intersection(&expected).count();

    ProgressionValidation {
        expected_edges: expected.len(),
        matched_expected: matched,
        coverage: if expected.is_empty() {
            0.0
        } else {
            matched as f64 / expected.len() as f64
        },
        missing_expected: expected.difference(&observed).cloned().collect(),
        unexpected: observed.difference(&expected).cloned().collect(),
        low_confidence: edges
            .iter()
            .filter(|e| e.confidence < threshold)
            .map(|e| EdgeRef::new(&e.from_level, &e.to_level))
            .collect(),
        low_confidence_threshold: threshold,
    }
}
