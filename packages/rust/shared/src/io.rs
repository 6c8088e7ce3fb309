//! JSON stage-document I/O.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EcotaxError, Result};

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
///
/// The document is written to a sibling temp file first, so readers never
/// observe a half-written output.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| EcotaxError::validation(format!("JSON serialization failed: {e}")))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| EcotaxError::io(parent, e))?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| EcotaxError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| EcotaxError::io(path, e))?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Read and deserialize a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| EcotaxError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| EcotaxError::parse(format!("invalid JSON in {}: {e}", path.display())))
}

/// Hex SHA-256 digest of a file's bytes.
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| EcotaxError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
