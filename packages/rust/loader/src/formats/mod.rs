//! Source format trait and built-in parsers for posting files.
//!
//! Each format turns one file's text into raw JSON-object records. Bad
//! individual records are counted, not fatal; a file that cannot be parsed at
//! all is reported as an error and the engine skips it.

mod csv;
mod json;
mod jsonl;

use std::path::Path;
use std::sync::Arc;

use ecotax_shared::{EcotaxError, Result};
use serde_json::{Map, Value};

pub use self::csv::CsvFormat;
pub use self::json::JsonFormat;
pub use self::jsonl::JsonLinesFormat;

/// A raw record as read from a source file.
pub type RawRecord = Map<String, Value>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Records parsed out of one source file.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub records: Vec<RawRecord>,
    /// Entries that were present but not usable as records.
    pub malformed: u64,
}

/// Trait for one on-disk posting format.
pub trait SourceFormat: Send + Sync {
    /// Lowercase file extensions (without dot) this format handles.
    fn extensions(&self) -> &[&'static str];

    /// Parse a whole file's content.
    fn parse(&self, content: &str) -> Result<ParsedSource>;

    /// Human-readable format name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered formats, matched by file extension.
pub struct FormatRegistry {
    formats: Vec<Arc<dyn SourceFormat>>,
}

impl FormatRegistry {
    /// Create a registry with JSON, JSON-Lines and CSV.
    pub fn new() -> Self {
        Self {
            formats: vec![
                Arc::new(JsonFormat),
                Arc::new(JsonLinesFormat),
                Arc::new(CsvFormat),
            ],
        }
    }

    /// Pick the format for `path` by extension.
    pub fn detect(&self, path: &Path) -> Result<Arc<dyn SourceFormat>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        self.formats
            .iter()
            .find(|f| f.extensions().contains(&extension.as_str()))
            .cloned()
            .ok_or_else(|| EcotaxError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            })
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_extension() {
        let registry = FormatRegistry::new();
        assert_eq!(registry.detect(Path::new("a/vagas.json")).unwrap().name(), "json");
        assert_eq!(registry.detect(Path::new("vagas.JSONL")).unwrap().name(), "jsonl");
        assert_eq!(registry.detect(Path::new("vagas.ndjson")).unwrap().name(), "jsonl");
        assert_eq!(registry.detect(Path::new("vagas.csv")).unwrap().name(), "csv");
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let registry = FormatRegistry::new();
        let err = registry.detect(Path::new("vagas.xlsx")).err().expect("error");
        match err {
            EcotaxError::UnsupportedFormat { extension, .. } => assert_eq!(extension, "xlsx"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.detect(Path::new("no_extension")).is_err());
    }
}
