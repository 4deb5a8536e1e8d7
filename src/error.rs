use thiserror::Error;

/// Errors surfaced by the sync workflow.
///
/// `InvalidDirectory` and `MissingSetting` abort a run before any file is
/// touched. The remaining variants are raised per file and only mark the run
/// as failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid directory: {0}")]
    InvalidDirectory(String),

    #[error("missing setting: {0}")]
    MissingSetting(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("preference store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("settings file error: {0}")]
    Settings(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
