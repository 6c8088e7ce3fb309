//! Whole-document JSON sources.

use ecotax_shared::{EcotaxError, Result};
use serde_json::Value;

use super::{ParsedSource, SourceFormat};

/// Keys under which a wrapping object may carry its record array.
const WRAPPER_KEYS: &[&str] = &["records", "items", "data", "postings"];

/// A top-level array of records, an object wrapping one, or a single record.
pub struct JsonFormat;

impl SourceFormat for JsonFormat {
    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn parse(&self, content: &str) -> Result<ParsedSource> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| EcotaxError::parse(format!("invalid JSON document: {e}")))?;

        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => {
                match WRAPPER_KEYS
                    .iter()
                    .find(|key| matches!(obj.get(**key), Some(Value::Array(_))))
                {
                    Some(key) => match obj.remove(*key) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    },
                    None => vec![Value::Object(obj)],
                }
            }
            _ => {
                return Err(EcotaxError::parse(
                    "JSON source must be an array or an object",
                ));
            }
        };

        let mut parsed = ParsedSource::default();
        for item in items {
            match item {
                Value::Object(record) => parsed.records.push(record),
                _ => parsed.malformed += 1,
            }
        }
        Ok(parsed)
    }

    fn name(&self) -> &str {
        "json"
    }
}
