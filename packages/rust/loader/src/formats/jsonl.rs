//! JSON-Lines sources: one record per line.

use ecotax_shared::Result;
use serde_json::Value;
use tracing::debug;

use super::{ParsedSource, SourceFormat};

pub struct JsonLinesFormat;

impl SourceFormat for JsonLinesFormat {
    fn extensions(&self) -> &[&'static str] {
        &["jsonl", "ndjson"]
    }

    fn parse(&self, content: &str) -> Result<ParsedSource> {
        let mut parsed = ParsedSource::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(record)) => parsed.records.push(record),
                Ok(_) => parsed.malformed += 1,
                Err(e) => {
                    debug!(line = line_no + 1, error = %e, "malformed JSON line");
                    parsed.malformed += 1;
                }
            }
        }
        Ok(parsed)
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
