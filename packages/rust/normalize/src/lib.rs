//! Title normalization and alias-confidence scoring.
//!
//! Two collaborator interfaces live here:
//! - [`TitleNormalizer`] turns a raw posting title into its dedup key.
//! - [`AliasScorer`] rates how well an observed title matches a canonical one.
//!
//! Both ship with a default implementation used by the pipeline.

mod cleanup;
mod scorer;

use tracing::trace;

pub use cleanup::fold_diacritics;
pub use scorer::StringSimilarityScorer;

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Normalization service: `normalize(text) -> key`.
pub trait TitleNormalizer: Send + Sync {
    /// Produce the dedup key for a raw title. An empty result means the title
    /// carried no usable text.
    fn normalize(&self, title: &str) -> String;
}

/// Lowercase, diacritic-folded, punctuation-stripped, whitespace-collapsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTitleNormalizer;

impl TitleNormalizer for DefaultTitleNormalizer {
    fn normalize(&self, title: &str) -> String {
        let normalized = cleanup::run_pipeline(title);
        trace!(raw = title, normalized = %normalized, "normalized title");
        normalized
    }
}

/// Lowercase and fold diacritics without touching punctuation.
///
/// Used for keyword and pattern matching where `front-end` must stay intact.
pub fn fold_lower(text: &str) -> String {
    fold_diacritics(&text.to_lowercase())
}

// ---------------------------------------------------------------------------
// Alias scorer
// ---------------------------------------------------------------------------

/// Alias-confidence scorer: `score(alias, canonical) -> [0, 1]`.
pub trait AliasScorer: Send + Sync {
    fn score(&self, alias: &str, canonical: &str) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spelling_variants_share_a_key() {
        let n = DefaultTitleNormalizer;
        let a = n.normalize("Engenheiro de Software");
        let b = n.normalize("engenheiro de software");
        let c = n.normalize("Engenheiro De Software ");
        assert_eq!(a, "engenheiro de software");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn accents_fold_into_the_same_key() {
        let n = DefaultTitleNormalizer;
        assert_eq!(n.normalize("Analista Sênior"), n.normalize("analista senior"));
    }

    #[test]
    fn composed_and_decomposed_spellings_share_a_key() {
        let n = DefaultTitleNormalizer;
        let composed = n.normalize("Analista S\u{00ea}nior");
        let decomposed = n.normalize("Analista Se\u{0302}nior");
        assert_eq!(composed, "analista senior");
        assert_eq!(composed, decomposed);
        assert_eq!(fold_lower("Desenvolvedor Ju\u{0301}nior"), "desenvolvedor junior");
    }

    #[test]
    fn punctuation_only_title_is_empty() {
        assert_eq!(DefaultTitleNormalizer.normalize(" -- / -- "), "");
    }

    #[test]
    fn fold_lower_keeps_hyphens() {
        assert_eq!(fold_lower("Front-End Júnior"), "front-end junior");
    }
}
