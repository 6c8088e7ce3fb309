//! String-similarity alias scorer.

use strsim::{jaro_winkler, sorensen_dice};

use crate::{AliasScorer, DefaultTitleNormalizer, TitleNormalizer};

/// Mean of Jaro-Winkler and character-bigram Sørensen-Dice similarity over
/// the normalized forms of both titles.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSimilarityScorer;

impl AliasScorer for StringSimilarityScorer {
    fn score(&self, alias: &str, canonical: &str) -> f64 {
        let a = DefaultTitleNormalizer.normalize(alias);
        let b = DefaultTitleNormalizer.normalize(canonical);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        ((jaro_winkler(&a, &b) + sorensen_dice(&a, &b)) / 2.0).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_after_normalization_scores_one() {
        let s = StringSimilarityScorer;
        assert_eq!(s.score("Desenvolvedor Júnior", "desenvolvedor junior"), 1.0);
    }

    #[test]
    fn unrelated_titles_score_low() {
        let s = StringSimilarityScorer;
        let score = s.score("Motorista", "Engenheiro de Dados");
        assert!(score < 0.3, "score was {score}");
    }

    #[test]
    fn related_titles_score_between() {
        let s = StringSimilarityScorer;
        let score = s.score("Desenvolvedor Java Pleno", "Desenvolvedor Java");
        assert!(score > 0.5 && score < 1.0, "score was {score}");
    }

    #[test]
    fn gendered_variant_outranks_unrelated_title() {
        let s = StringSimilarityScorer;
        let variant = s.score("Desenvolvedora Frontend React", "Desenvolvedor Frontend React");
        let unrelated = s.score("Analista de Suporte", "Desenvolvedor Frontend React");
        assert!(variant > 0.9, "variant scored {variant}");
        assert!(unrelated < variant);
    }

    #[test]
    fn empty_input_scores_zero() {
        assert_eq!(StringSimilarityScorer.score("", "Dev"), 0.0);
    }
}
