use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::db::{
    PreferenceStore, PREF_API_URL, PREF_DIRECTORY_PATH, PREF_INTERVAL, PREF_TOKEN,
};
use crate::error::{Result, SyncError};
use crate::uri::{format_uri, DirectoryRef};

/// Poll interval used when the stored value is blank, zero or not a number.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;

/// Snapshot of the persisted settings, re-read at the start of every run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub token: String,
    pub interval_minutes: u64,
    pub directory: Option<String>,
    pub sync_enabled: bool,
}

impl SyncConfig {
    pub fn load(store: &PreferenceStore) -> Result<Self> {
        let raw_interval = store.get_string(PREF_INTERVAL)?.unwrap_or_default();
        Ok(Self {
            api_url: store.get_string(PREF_API_URL)?.unwrap_or_default(),
            token: store.get_string(PREF_TOKEN)?.unwrap_or_default(),
            interval_minutes: parse_interval(&raw_interval),
            directory: store.get_string(PREF_DIRECTORY_PATH)?,
            sync_enabled: store.sync_enabled()?,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn directory_ref(&self) -> Result<DirectoryRef> {
        DirectoryRef::parse(self.directory.as_deref().unwrap_or_default())
    }

    /// URL and token must both be present before anything is sent.
    pub fn endpoint(&self) -> Result<Endpoint> {
        if self.api_url.trim().is_empty() {
            return Err(SyncError::MissingSetting(PREF_API_URL));
        }
        if self.token.is_empty() {
            return Err(SyncError::MissingSetting(PREF_TOKEN));
        }
        Ok(Endpoint {
            url: self.api_url.trim().to_string(),
            token: self.token.clone(),
        })
    }
}

/// Upload destination and the bearer token sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub token: String,
}

pub fn parse_interval(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            warn!("Interval of 0 minutes is not allowed, using {} minutes", DEFAULT_INTERVAL_MINUTES);
            DEFAULT_INTERVAL_MINUTES
        }
        Ok(minutes) => minutes,
        Err(_) => {
            if !raw.trim().is_empty() {
                warn!("Unparseable interval {:?}, using {} minutes", raw, DEFAULT_INTERVAL_MINUTES);
            }
            DEFAULT_INTERVAL_MINUTES
        }
    }
}

/// Settings file accepted by `autosync configure`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    pub api_url: String,
    pub token: String,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub sync_enabled: Option<bool>,
}

impl SettingsFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write every field present in the file into `store`.
    pub fn apply(&self, store: &PreferenceStore) -> Result<()> {
        store.save_parameters(&self.api_url, &self.token, &self.interval)?;
        if let Some(directory) = &self.directory {
            store.set_directory(directory)?;
        }
        if let Some(enabled) = self.sync_enabled {
            store.set_sync_enabled(enabled)?;
        }
        info!("Settings applied ({} minute interval)", parse_interval(&self.interval));
        Ok(())
    }
}

/// What the host UI shows on its main screen.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub directory: Option<String>,
    pub last_sync_time: String,
    pub total_upload_number: i64,
    pub sync_enabled: bool,
    pub interval_minutes: u64,
    pub running: bool,
}

impl StatusSnapshot {
    pub fn load(store: &PreferenceStore, running: bool) -> Result<Self> {
        let config = SyncConfig::load(store)?;
        Ok(Self {
            directory: config.directory.as_deref().map(format_uri),
            last_sync_time: store.last_sync_time()?.unwrap_or_else(|| "None".to_string()),
            total_upload_number: store.total_upload_number()?,
            sync_enabled: config.sync_enabled,
            interval_minutes: config.interval_minutes,
            running,
        })
    }
}
