use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

const EXTERNAL_STORAGE_TREE_PREFIX: &str = "content://com.android.externalstorage.documents/tree/";

/// Turn a stored directory reference into something readable for the UI.
///
/// Android tree URIs are unwrapped into a pseudo-path, e.g.
/// `content://com.android.externalstorage.documents/tree/primary%3APictures`
/// becomes `/primary/Pictures`. Anything else is returned mostly untouched.
pub fn format_uri(uri: &str) -> String {
    if uri.is_empty() {
        return "Invalid path".to_string();
    }

    let mut formatted = uri
        .replace(EXTERNAL_STORAGE_TREE_PREFIX, "")
        .replace("%3A", "/")
        .replace("%2F", "/");

    if formatted.starts_with("primary") {
        formatted.insert(0, '/');
    }

    formatted
}

/// A directory the user granted for syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRef {
    raw: String,
    path: PathBuf,
}

impl DirectoryRef {
    /// Accepts a plain path or a `file://` URI.
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidDirectory("no directory selected".to_string()));
        }

        let path = if let Some(rest) = trimmed.strip_prefix("file://") {
            PathBuf::from(rest)
        } else if trimmed.contains("://") {
            return Err(SyncError::InvalidDirectory(format!(
                "unsupported directory reference: {}",
                format_uri(trimmed)
            )));
        } else {
            PathBuf::from(trimmed)
        };

        Ok(Self {
            raw: trimmed.to_string(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display(&self) -> String {
        format_uri(&self.raw)
    }
}
