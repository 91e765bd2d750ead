/// Workflow file loading
///
/// Reads workflow definitions from YAML files. A directory load walks every
/// `.yaml`/`.yml` file below the root and skips documents that fail to parse.

use crate::error::{Error, Result};
use crate::workflow::types::WorkflowDefinition;
use std::path::Path;
use walkdir::WalkDir;

/// Parse a single YAML document into a workflow definition
pub fn parse_yaml(bytes: &[u8]) -> std::result::Result<WorkflowDefinition, serde_yaml::Error> {
    serde_yaml::from_slice(bytes)
}

/// Read and parse one workflow file
pub fn read_file(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::Config(format!(
            "workflow file does not exist: {}",
            path.display()
        )));
    }

    let bytes = std::fs::read(path)?;
    parse_yaml(&bytes).map_err(|source| Error::WorkflowParse {
        path: path.display().to_string(),
        source,
    })
}

/// Read every valid workflow file under `dir`, including subdirectories
///
/// Files that fail to parse are logged and skipped. Files are visited in
/// name order so the resulting list is stable across runs.
pub fn read_all_valid_files_in_dir(dir: impl AsRef<Path>) -> Result<Vec<WorkflowDefinition>> {
    let dir = dir.as_ref();
    tracing::debug!("📂 Scanning workflow directory: {}", dir.display());

    let mut definitions = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            Error::Config(format!("error walking the path {}: {}", dir.display(), e))
        })?;

        if !entry.file_type().is_file() || !is_yaml(entry.path()) {
            continue;
        }

        match read_file(entry.path()) {
            Ok(definition) => {
                tracing::debug!("📄 Loaded workflow '{}' from {}", definition.name, entry.path().display());
                definitions.push(definition);
            }
            Err(Error::WorkflowParse { path, source }) => {
                tracing::warn!("⚠️ Skipping invalid workflow file {}: {}", path, source);
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!("📥 Loaded {} workflow definitions from {}", definitions.len(), dir.display());
    Ok(definitions)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}
