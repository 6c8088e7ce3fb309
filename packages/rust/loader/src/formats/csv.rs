//! CSV sources with a header row.

use ecotax_shared::{EcotaxError, Result};
use serde_json::Value;
use tracing::debug;

use super::{ParsedSource, RawRecord, SourceFormat};

pub struct CsvFormat;

impl SourceFormat for CsvFormat {
    fn extensions(&self) -> &[&'static str] {
        &["csv"]
    }

    fn parse(&self, content: &str) -> Result<ParsedSource> {
        let mut reader = ::csv::ReaderBuilder::new()
            .flexible(true)
            .trim(::csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| EcotaxError::parse(format!("invalid CSV header: {e}")))?
            .clone();

        let mut parsed = ParsedSource::default();
        for (row_no, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    debug!(row = row_no + 1, error = %e, "malformed CSV row");
                    parsed.malformed += 1;
                    continue;
                }
            };

            let mut record = RawRecord::new();
            for (header, cell) in headers.iter().zip(row.iter()) {
                if !cell.is_empty() {
                    record.insert(header.to_string(), Value::String(cell.to_string()));
                }
            }
            if record.is_empty() {
                parsed.malformed += 1;
            } else {
                parsed.records.push(record);
            }
        }
        Ok(parsed)
    }

    fn name(&self) -> &str {
        "csv"
    }
}
