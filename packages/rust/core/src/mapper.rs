//! Occupation Mapper: clusters to canonical occupation records.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use tracing::{info, instrument, warn};

use ecotax_normalize::{AliasScorer, fold_lower};
use ecotax_shared::{
    Alias, Cluster, ClustersDocument, ConfidenceSummary, ExperienceRange, MappingConfig,
    Occupation, OccupationMetadata, OccupationsDocument, ProgressionDocument, ProgressionEdge,
    Result, ReviewItem, read_json, write_json,
};

const ID_PREFIX: &str = "ECO.BR.SE";
const UNKNOWN_SEGMENT: &str = "UNK";
const UNNAMED_OCCUPATION: &str = "Unnamed occupation";

/// Alias confidence used when no scorer is configured.
const DEFAULT_ALIAS_CONFIDENCE: f64 = 0.5;

const LOW_FREQUENCY: u64 = 5;
const LOW_ALIAS_CONFIDENCE: f64 = 0.45;

/// Skill indicators and the skill they count as, matched against the folded
/// alias text. Terms up to [`SHORT_TERM_LEN`] bytes must stand alone as a word.
const SKILL_VOCABULARY: &[(&str, &str)] = &[
    ("frontend", "frontend"),
    ("front-end", "frontend"),
    ("front end", "frontend"),
    ("react", "react"),
    ("angular", "angular"),
    ("vue", "vue"),
    ("javascript", "javascript"),
    ("typescript", "typescript"),
    ("backend", "backend"),
    ("back-end", "backend"),
    ("back end", "backend"),
    ("java", "java"),
    ("python", "python"),
    ("node", "node"),
    ("nodejs", "node"),
    ("golang", "golang"),
    (".net", ".net"),
    ("php", "php"),
    ("ruby", "ruby"),
    ("full stack", "full stack"),
    ("fullstack", "full stack"),
    ("full-stack", "full stack"),
    ("mobile", "mobile"),
    ("android", "android"),
    ("ios", "ios"),
    ("flutter", "flutter"),
    ("kotlin", "kotlin"),
    ("swift", "swift"),
    ("dados", "dados"),
    ("data", "data"),
    ("sql", "sql"),
    ("power bi", "power bi"),
    ("machine learning", "machine learning"),
    ("devops", "devops"),
    ("cloud", "cloud"),
    ("aws", "aws"),
    ("azure", "azure"),
    ("kubernetes", "kubernetes"),
    ("docker", "docker"),
    ("qa", "qa"),
    ("teste", "teste"),
    ("testes", "teste"),
    ("automacao", "automacao"),
    ("selenium", "selenium"),
];

const SHORT_TERM_LEN: usize = 4;

/// Seniority keywords with their years-of-experience band (`None` = open).
static EXPERIENCE_BANDS: LazyLock<Vec<(Regex, Option<u32>, Option<u32>)>> = LazyLock::new(|| {
    [
        (r"\b(estagiari[oa]|estagio|intern|trainee)\b", Some(0), Some(1)),
        (r"\b(junior|jr)\b", Some(0), Some(3)),
        (r"\b(pleno|mid)\b", Some(2), Some(5)),
        (r"\b(senior|sr)\b", Some(5), Some(9)),
        (
            r"\b(lead|lider|principal|staff|coordenador[a]?|coordinator|gerente|manager|head)\b",
            Some(7),
            None,
        ),
    ]
    .into_iter()
    .map(|(pattern, min, max)| {
        (Regex::new(pattern).expect("valid experience regex"), min, max)
    })
    .collect()
});

/// Uppercase ASCII alphanumerics joined by single underscores.
fn sanitize_segment(raw: &str) -> String {
    let folded = fold_lower(raw);
    let mut out = String::with_capacity(folded.len());
    for ch in folded.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        UNKNOWN_SEGMENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `ECO.BR.SE.{CATEGORY}.{CLUSTER}`, a pure function of its inputs.
pub fn occupation_id(category: &str, cluster_key: &str) -> String {
    format!(
        "{ID_PREFIX}.{}.{}",
        sanitize_segment(category),
        sanitize_segment(cluster_key)
    )
}

fn title_case(term: &str) -> String {
    term.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_term(text: &str, term: &str) -> bool {
    if term.len() > SHORT_TERM_LEN {
        return text.contains(term);
    }
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Sorted, deduplicated, title-cased skills found in `text`.
fn infer_skills(text: &str) -> Vec<String> {
    SKILL_VOCABULARY
        .iter()
        .filter(|(term, _)| contains_term(text, term))
        .map(|(_, skill)| title_case(skill))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Envelope of every matched band; unbounded when nothing matches.
fn infer_experience(text: &str) -> ExperienceRange {
    let matched: Vec<_> = EXPERIENCE_BANDS
        .iter()
        .filter(|(re, _, _)| re.is_match(text))
        .collect();
    if matched.is_empty() {
        return ExperienceRange::default();
    }
    let min = matched
        .iter()
        .map(|(_, min, _)| *min)
        .try_fold(u32::MAX, |acc, m| m.map(|m| acc.min(m)));
    let max = matched
        .iter()
        .map(|(_, _, max)| *max)
        .try_fold(0, |acc, m| m.map(|m| acc.max(m)));
    ExperienceRange { min, max }
}

fn summarize_confidence(aliases: &[Alias]) -> ConfidenceSummary {
    if aliases.is_empty() {
        return ConfidenceSummary::default();
    }
    let values = aliases.iter().map(|a| a.confidence);
    ConfidenceSummary {
        mean: Some(values.clone().sum::<f64>() / aliases.len() as f64),
        min: Some(values.clone().fold(f64::INFINITY, f64::min)),
        max: Some(values.fold(f64::NEG_INFINITY, f64::max)),
    }
}

/// Maps clusters onto occupation records and a manual review queue.
pub struct OccupationMapper {
    config: MappingConfig,
    scorer: Option<Arc<dyn AliasScorer>>,
}

impl OccupationMapper {
    pub fn new(config: MappingConfig, scorer: Option<Arc<dyn AliasScorer>>) -> Self {
        Self { config, scorer }
    }

    /// Read clusters (and optional progression output), map, and write the
    /// occupations document to `output`.
    #[instrument(skip_all, fields(category = %self.config.category))]
    pub async fn map(
        &self,
        clusters_path: &Path,
        progression_path: Option<&Path>,
        output: &Path,
    ) -> Result<OccupationsDocument> {
        let start = Instant::now();
        let clusters: ClustersDocument = read_json(clusters_path)?;
        let progression: Option<ProgressionDocument> = match progression_path {
            Some(path) if path.exists() => Some(read_json(path)?),
            Some(path) => {
                warn!(path = %path.display(), "progression output not found, mapping without edges");
                None
            }
            None => None,
        };

        let document = self.build(&clusters, progression.as_ref());
        write_json(output, &document)?;
        info!(
            occupations = document.occupations.len(),
            review = document.review_queue.len(),
            skipped_noise = document.skipped_noise_clusters,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "occupation mapping complete"
        );
        Ok(document)
    }

    pub fn build(
        &self,
        clusters: &ClustersDocument,
        progression: Option<&ProgressionDocument>,
    ) -> OccupationsDocument {
        let edges: &[ProgressionEdge] = progression.map_or(&[], |p| p.progressions.as_slice());
        let mut occupations = Vec::new();
        let mut review_queue = Vec::new();
        let mut skipped_noise_clusters = 0;

        for cluster in clusters.clusters.values() {
            if cluster.is_noise() {
                skipped_noise_clusters += 1;
                continue;
            }
            let occupation = self.map_cluster(cluster, edges);
            if let Some(reason) = &occupation.review_reason {
                review_queue.push(ReviewItem {
                    occupation_id: occupation.occupation_id.clone(),
                    cluster_key: occupation.cluster_key.clone(),
                    display_name: occupation.display_name.clone(),
                    reason: reason.clone(),
                    frequency: occupation.frequency,
                    confidence_summary: occupation.metadata.confidence_summary,
                });
            }
            occupations.push(occupation);
        }

        OccupationsDocument {
            category: self.config.category.clone(),
            occupations,
            review_queue,
            skipped_noise_clusters,
            generated_at: Utc::now(),
        }
    }

    fn alias_confidence(&self, alias: &str, canonical: &str) -> f64 {
        self.scorer
            .as_ref()
            .map_or(DEFAULT_ALIAS_CONFIDENCE, |s| s.score(alias, canonical))
            .clamp(0.0, 1.0)
    }

    fn map_cluster(&self, cluster: &Cluster, edges: &[ProgressionEdge]) -> Occupation {
        let representative = cluster
            .representative_title
            .as_deref()
            .filter(|t| !t.trim().is_empty());
        let display_name = representative
            .or_else(|| {
                cluster
                    .members
                    .iter()
                    .map(|m| m.title.as_str())
                    .find(|t| !t.trim().is_empty())
            })
            .unwrap_or(UNNAMED_OCCUPATION)
            .to_string();

        let mut aliases: Vec<Alias> = cluster
            .members
            .iter()
            .map(|m| {
                let alias = if m.title.is_empty() {
                    m.normalized_title.clone()
                } else {
                    m.title.clone()
                };
                Alias {
                    confidence: self.alias_confidence(&alias, &display_name),
                    frequency: m.frequency,
                    alias,
                }
            })
            .collect();
        aliases.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.frequency.cmp(&a.frequency))
                .then_with(|| a.alias.cmp(&b.alias))
        });

        let mut text: Vec<&str> = aliases.iter().map(|a| a.alias.as_str()).collect();
        text.extend(representative);
        let text = fold_lower(&text.join(" "));

        let titles: BTreeSet<&str> = cluster
            .members
            .iter()
            .map(|m| m.title.as_str())
            .chain(representative)
            .collect();
        let progressions = edges
            .iter()
            .filter(|e| e.examples.iter().any(|x| titles.contains(x.as_str())))
            .cloned()
            .collect();

        let confidence_summary = summarize_confidence(&aliases);
        let mut reasons = Vec::new();
        if cluster.frequency < LOW_FREQUENCY {
            reasons.push("low frequency");
        }
        if confidence_summary.min.is_some_and(|m| m < LOW_ALIAS_CONFIDENCE) {
            reasons.push("low alias confidence");
        }
        if representative.is_none() {
            reasons.push("missing representative title");
        }

        Occupation {
            occupation_id: occupation_id(&self.config.category, &cluster.cluster_key),
            display_name,
            cluster_id: cluster.cluster_id,
            cluster_key: cluster.cluster_key.clone(),
            frequency: cluster.frequency,
            progressions,
            skill_requirements: infer_skills(&text),
            experience_range: infer_experience(&text),
            review_required: !reasons.is_empty(),
            review_reason: (!reasons.is_empty()).then(|| reasons.join(", ")),
            metadata: OccupationMetadata {
                sources: cluster.sources.clone(),
                representative_title: representative.map(str::to_string),
                confidence_summary,
            },
            aliases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ecotax_normalize::StringSimilarityScorer;
    use ecotax_shared::{ClusterMember, ClusteringMethod, ClusteringMetrics, NOISE_CLUSTER_ID};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ecotax_test_{}_{name}", uuid::Uuid::now_v7()))
    }

    fn cluster(key: &str, id: i64, members: &[(&str, u64)], representative: Option<&str>) -> Cluster {
        Cluster {
            cluster_key: key.into(),
            cluster_id: id,
            category: key.split(':').next().unwrap_or_default().into(),
            method: ClusteringMethod::Density,
            members: members
                .iter()
                .map(|(t, f)| ClusterMember {
                    normalized_title: fold_lower(t),
                    title: (*t).into(),
                    frequency: *f,
                })
                .collect(),
            representative_title: representative.map(Into::into),
            frequency: members.iter().map(|(_, f)| f).sum(),
            sources: BTreeMap::from([("gupy".to_string(), 1)]),
            quality: None,
        }
    }

    fn document(clusters: Vec<Cluster>) -> ClustersDocument {
        ClustersDocument {
            method: ClusteringMethod::Density,
            chunk_type: "job_title".into(),
            metrics: ClusteringMetrics {
                total_points: 0,
                cluster_count: 0,
                noise_count: 0,
                silhouette: None,
                davies_bouldin: None,
                persisted_assignments: 0,
                persistence_error: None,
                category_breakdown: BTreeMap::new(),
            },
            clusters: clusters.into_iter().map(|c| (c.cluster_key.clone(), c)).collect(),
            summary: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    fn mapper(scorer: Option<Arc<dyn AliasScorer>>) -> OccupationMapper {
        OccupationMapper::new(
            MappingConfig {
                category: "TECH".into(),
            },
            scorer,
        )
    }

    /// Returns fixed scores keyed by alias.
    struct FixedScorer(BTreeMap<&'static str, f64>);

    impl AliasScorer for FixedScorer {
        fn score(&self, alias: &str, _canonical: &str) -> f64 {
            self.0.get(alias).copied().unwrap_or(1.0)
        }
    }

    #[test]
    fn ids_are_sanitized_and_stable() {
        assert_eq!(occupation_id("TECH", "backend:3"), "ECO.BR.SE.TECH.BACKEND_3");
        assert_eq!(occupation_id("tech", "dados & análise:12"), "ECO.BR.SE.TECH.DADOS_ANALISE_12");
        assert_eq!(occupation_id("TECH", "::"), "ECO.BR.SE.TECH.UNK");
        assert_eq!(occupation_id("", "x:1"), "ECO.BR.SE.UNK.X_1");
    }

    #[test]
    fn low_frequency_and_low_alias_confidence_need_review() {
        let scorer = FixedScorer(BTreeMap::from([
            ("Dev Backend", 0.2),
            ("Desenvolvedor Backend", 0.6),
        ]));
        let doc = document(vec![cluster(
            "backend:1",
            1,
            &[("Desenvolvedor Backend", 2), ("Dev Backend", 1)],
            Some("Desenvolvedor Backend"),
        )]);
        let result = mapper(Some(Arc::new(scorer))).build(&doc, None);

        let occupation = &result.occupations[0];
        assert_eq!(occupation.frequency, 3);
        assert!(occupation.review_required);
        let reason = occupation.review_reason.as_deref().unwrap();
        assert!(reason.contains("low frequency"));
        assert!(reason.contains("low alias confidence"));
        assert_eq!(occupation.aliases[0].alias, "Desenvolvedor Backend");
        assert_eq!(occupation.metadata.confidence_summary.min, Some(0.2));
        assert_eq!(result.review_queue.len(), 1);
        assert_eq!(result.review_queue[0].reason, reason);
    }

    #[test]
    fn healthy_cluster_is_not_queued() {
        let doc = document(vec![cluster(
            "frontend:2",
            2,
            &[("Desenvolvedor Frontend React", 8), ("Desenvolvedora Frontend React", 4)],
            Some("Desenvolvedor Frontend React"),
        )]);
        let result = mapper(Some(Arc::new(StringSimilarityScorer))).build(&doc, None);
        let occupation = &result.occupations[0];
        assert!(!occupation.review_required, "{:?}", occupation.review_reason);
        assert!(result.review_queue.is_empty());
        assert!(occupation.skill_requirements.contains(&"Frontend".to_string()));
        assert!(occupation.skill_requirements.contains(&"React".to_string()));
        for alias in &occupation.aliases {
            assert!((0.0..=1.0).contains(&alias.confidence));
        }
    }

    #[test]
    fn display_name_fallbacks() {
        let doc = document(vec![
            cluster("qa:1", 1, &[("", 3), ("Analista de Testes", 5)], None),
            cluster("qa:2", 2, &[], None),
        ]);
        let result = mapper(None).build(&doc, None);
        assert_eq!(result.occupations[0].display_name, "Analista de Testes");
        assert_eq!(result.occupations[1].display_name, UNNAMED_OCCUPATION);
        let reason = result.occupations[0].review_reason.as_deref().unwrap();
        assert!(reason.contains("missing representative title"));
        // No scorer: every alias gets the default confidence.
        assert!(result.occupations[0].aliases.iter().all(|a| a.confidence == 0.5));
    }

    #[test]
    fn experience_envelope() {
        assert_eq!(infer_experience("desenvolvedor"), ExperienceRange::default());
        assert_eq!(
            infer_experience("desenvolvedor junior desenvolvedor pleno"),
            ExperienceRange { min: Some(0), max: Some(5) }
        );
        assert_eq!(
            infer_experience("analista senior tech lead"),
            ExperienceRange { min: Some(5), max: None }
        );
    }

    #[test]
    fn skills_are_deduplicated_and_title_cased() {
        let skills = infer_skills("engenheiro de machine learning python python");
        assert_eq!(skills, vec!["Machine Learning", "Python"]);
    }

    #[test]
    fn skills_come_out_sorted() {
        assert_eq!(
            infer_skills("desenvolvedor python react aws"),
            vec!["Aws", "Python", "React"]
        );
    }

    #[test]
    fn spelling_variants_count_as_one_skill() {
        let skills = infer_skills("dev front-end frontend back-end fullstack full stack");
        assert_eq!(skills, vec!["Backend", "Frontend", "Full Stack"]);
    }

    #[test]
    fn short_terms_need_word_boundaries() {
        assert!(infer_skills("analista de negocios").is_empty());
        assert_eq!(infer_skills("desenvolvedor javascript"), vec!["Javascript"]);
        assert_eq!(infer_skills("desenvolvedor ios / java"), vec!["Ios", "Java"]);
    }

    #[test]
    fn noise_is_skipped_and_edges_attached() {
        let doc = document(vec![
            cluster("data:1", 1, &[("Cientista de Dados Júnior", 5), ("Cientista de Dados Pleno", 5)], Some("Cientista de Dados Júnior")),
            cluster("data:noise", NOISE_CLUSTER_ID, &[("Analista", 1)], Some("Analista")),
        ]);
        let edge = ProgressionEdge {
            from_level: "junior".into(),
            to_level: "mid".into(),
            confidence: 0.1,
            evidence_count: 1,
            probability: 1.0,
            examples: vec!["Cientista de Dados Júnior".into()],
        };
        let unrelated = ProgressionEdge {
            examples: vec!["Outro Título".into()],
            ..edge.clone()
        };
        let progression = ProgressionDocument {
            levels: Vec::new(),
            tracks: BTreeMap::new(),
            progressions: vec![edge.clone(), unrelated],
            track_progressions: BTreeMap::new(),
            statistics: Default::default(),
            validation: Default::default(),
            min_confidence: 0.1,
            generated_at: Utc::now(),
        };
        let result = mapper(None).build(&doc, Some(&progression));
        assert_eq!(result.skipped_noise_clusters, 1);
        assert_eq!(result.occupations.len(), 1);
        assert_eq!(result.occupations[0].progressions, vec![edge]);
        assert_eq!(result.occupations[0].experience_range, ExperienceRange { min: Some(0), max: Some(5) });
    }

    #[tokio::test]
    async fn map_is_deterministic_and_tolerates_missing_progression() {
        let clusters_path = temp_path("clusters.json");
        write_json(
            &clusters_path,
            &document(vec![cluster("backend:1", 1, &[("Dev Java", 9)], Some("Dev Java"))]),
        )
        .unwrap();
        let m = mapper(Some(Arc::new(StringSimilarityScorer)));
        let missing = temp_path("progressions.json");
        let a = m.map(&clusters_path, Some(&missing), &temp_path("a.json")).await.unwrap();
        let b = m.map(&clusters_path, None, &temp_path("b.json")).await.unwrap();
        assert_eq!(a.occupations, b.occupations);
        assert_eq!(a.occupations[0].occupation_id, "ECO.BR.SE.TECH.BACKEND_1");
    }
}
