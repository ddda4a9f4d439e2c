use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::resolve::ImportResult;

/// One failed row from a tree save response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub reference_id: String,
    pub status_code: String,
    pub message: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid import file {}: {reason}", path.display())]
    Configuration { path: PathBuf, reason: String },

    #[error("unable to resolve references in {}: {}", file.display(), refs.join(", "))]
    UnresolvableReferences { file: PathBuf, refs: Vec<String> },

    #[error("no RecordType named \"{name}\" found for {sobject}")]
    RecordTypeLookup { sobject: String, name: String },

    #[error("{} record(s) in {} failed to save", failures.len(), file.display())]
    RemoteSave {
        file: PathBuf,
        failures: Vec<RecordFailure>,
    },

    #[error("describe for {sobject}.{field} reports a reference without relationship targets")]
    InconsistentMetadata { sobject: String, field: String },

    #[error("{0}")]
    Transport(String),
}

impl TreeError {
    /// Stable machine-readable kind, for `--json` consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            TreeError::Configuration { .. } => "configuration",
            TreeError::UnresolvableReferences { .. } => "unresolvableReferences",
            TreeError::RecordTypeLookup { .. } => "recordTypeLookup",
            TreeError::RemoteSave { .. } => "remoteSave",
            TreeError::InconsistentMetadata { .. } => "inconsistentMetadata",
            TreeError::Transport(_) => "transport",
        }
    }
}

/// An import failure plus everything created before it, so callers can
/// report partial success instead of losing it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ImportError {
    pub error: TreeError,
    pub results: Vec<ImportResult>,
}

impl ImportError {
    pub fn new(error: TreeError, results: Vec<ImportResult>) -> Self {
        Self { error, results }
    }
}
