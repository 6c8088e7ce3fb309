//! Data Loader: posting ingestion, title deduplication, incremental merge.
//!
//! This crate provides:
//! - [`formats`] - JSON, JSON-Lines and CSV source parsers
//! - [`FormatRegistry`] - picks a parser by file extension
//! - [`DataLoader`] - bounded-parallel ingestion into `normalized_titles.json`

pub mod formats;

mod engine;
mod record;

pub use engine::DataLoader;
pub use formats::{
    CsvFormat, FormatRegistry, JsonFormat, JsonLinesFormat, ParsedSource, RawRecord, SourceFormat,
};
