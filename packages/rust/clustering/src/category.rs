//! Title bucketing into categories.

use ecotax_normalize::fold_lower;
use ecotax_shared::{CategoryRule, EcotaxError, Result};
use regex::{Regex, RegexBuilder};

struct CompiledRule {
    name: String,
    patterns: Vec<Regex>,
    keywords: Vec<String>,
}

/// Assigns each title a category name.
///
/// Every category's patterns are tried before any keyword, so a pattern hit
/// in a later category beats a keyword hit in an earlier one.
pub struct Categorizer {
    rules: Vec<CompiledRule>,
    default: String,
}

impl Categorizer {
    pub fn new(rules: &[CategoryRule], default: impl Into<String>) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let patterns = rule
                    .patterns
                    .iter()
                    .map(|p| {
                        RegexBuilder::new(p).case_insensitive(true).build().map_err(|e| {
                            EcotaxError::config(format!(
                                "invalid pattern {p:?} for category {:?}: {e}",
                                rule.name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let keywords = rule
                    .keywords
                    .iter()
                    .map(|k| fold_lower(k))
                    .filter(|k| !k.trim().is_empty())
                    .collect();
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    patterns,
                    keywords,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            default: default.into(),
        })
    }

    pub fn categorize(&self, text: &str) -> &str {
        let folded = fold_lower(text);
        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.patterns.iter().any(|p| p.is_match(&folded)))
        {
            return &rule.name;
        }
        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| folded.contains(k.as_str())))
        {
            return &rule.name;
        }
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecotax_shared::AppConfig;

    fn defaults() -> Categorizer {
        let config = AppConfig::default();
        Categorizer::new(
            &config.clustering.categories,
            config.clustering.default_category,
        )
        .unwrap()
    }

    #[test]
    fn patterns_match_folded_text() {
        let c = defaults();
        assert_eq!(c.categorize("Desenvolvedor Front-End Pleno"), "frontend");
        assert_eq!(c.categorize("Engenheira de DADOS"), "data");
        assert_eq!(c.categorize("Analista de Qualidade"), "qa");
    }

    #[test]
    fn pattern_beats_earlier_keyword() {
        // "java" is a backend keyword, but "mobile" is a pattern.
        let c = defaults();
        assert_eq!(c.categorize("Desenvolvedor Java Mobile"), "mobile");
    }

    #[test]
    fn keywords_then_default() {
        let c = defaults();
        assert_eq!(c.categorize("Desenvolvedor React"), "frontend");
        assert_eq!(c.categorize("Engenheiro Kubernetes"), "devops");
        assert_eq!(c.categorize("Gerente de Projetos"), "general");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let rule = CategoryRule {
            name: "broken".into(),
            patterns: vec!["(unclosed".into()],
            ..Default::default()
        };
        let err = Categorizer::new(&[rule], "general").err().unwrap();
        assert!(matches!(err, EcotaxError::Config { .. }));
    }
}
