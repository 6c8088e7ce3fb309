//! Title cleanup pipeline.
//!
//! Each pass is a function `&str -> String` applied in sequence. Together they
//! turn a raw posting title into its dedup key.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Run the full cleanup pipeline on a raw title.
pub(crate) fn run_pipeline(title: &str) -> String {
    let mut result = title.to_lowercase();

    result = fold_diacritics(&result);
    result = strip_gender_markers(&result);
    result = replace_punctuation(&result);
    result = collapse_whitespace(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Fold diacritics
// ---------------------------------------------------------------------------

/// Strip accents: decompose (NFD), drop combining marks, recompose (NFC).
///
/// Precomposed (`ê`) and decomposed (`e` + U+0302) spellings fold to the same
/// text.
pub fn fold_diacritics(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 2: Gender markers
// ---------------------------------------------------------------------------

/// Drop inclusive-language suffixes such as `desenvolvedor(a)` or `analista (o/a)`.
fn strip_gender_markers(title: &str) -> String {
    static GENDER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\(\s*(?:a|o|as|os|o/a|a/o)\s*\)").expect("valid regex")
    });

    GENDER_RE.replace_all(title, " ").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Punctuation
// ---------------------------------------------------------------------------

/// Turn punctuation into spaces, keeping `+ # . /` which carry meaning in
/// technology names (`c++`, `c#`, `.net`, `ui/ux`).
fn replace_punctuation(title: &str) -> String {
    static PUNCT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\w\s+#./]").expect("valid regex"));

    let replaced = PUNCT_RE.replace_all(title, " ");
    replaced
        .split_whitespace()
        .map(|token| token.trim_matches('/').trim_end_matches('.'))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of whitespace into single spaces and trim the ends.
fn collapse_whitespace(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_diacritics_portuguese() {
        assert_eq!(fold_diacritics("Júnior Sênior Técnico Ação"), "Junior Senior Tecnico Acao");
    }

    #[test]
    fn fold_diacritics_decomposed_input() {
        assert_eq!(fold_diacritics("Se\u{0302}nior Ac\u{0327}a\u{0303}o"), "Senior Acao");
        assert_eq!(fold_diacritics("Espan\u{0303}ol"), fold_diacritics("Español"));
    }

    #[test]
    fn gender_markers_removed() {
        assert_eq!(strip_gender_markers("desenvolvedor(a) java"), "desenvolvedor  java");
        assert!(!strip_gender_markers("analista (o/a)").contains("o/a"));
    }

    #[test]
    fn punctuation_keeps_tech_symbols() {
        assert_eq!(replace_punctuation("dev c++ / c# - .net"), "dev c++ c# .net");
        assert_eq!(replace_punctuation("analista ui/ux"), "analista ui/ux");
        assert_eq!(replace_punctuation("dev - back-end (remoto)"), "dev back end remoto");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(collapse_whitespace("  a \t b\n c  "), "a b c");
    }

    #[test]
    fn pipeline_end_to_end() {
        assert_eq!(run_pipeline("  Desenvolvedor(a) Back-End Sênior "), "desenvolvedor back end senior");
    }
}
