use thiserror::Error;

/// Errors surfaced by the simulation core.
///
/// Only `InvalidAction` and the configuration/IO variants ever reach a caller.
/// Knowledge-source and scanner failures are caught at their boundary and
/// replaced by "no hint" / "no seed services".
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid attack action: {0}")]
    InvalidAction(String),

    #[error("Knowledge source '{source_name}' unavailable: {reason}")]
    KnowledgeSourceUnavailable { source_name: String, reason: String },

    #[error("Scan of {target} failed: {reason}")]
    ScanFailed { target: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
