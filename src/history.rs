//! Flat-file persistence for download history and user settings.
//!
//! Both documents are rewritten whole on every mutation. Concurrent workers
//! can interleave read-modify-write cycles and the last writer wins; the
//! history is advisory, so that tradeoff is accepted. Unreadable or corrupt
//! documents silently fall back to defaults.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const HISTORY_FILE: &str = "history.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub title: String,
    pub filename: String,
    pub format: String,
    pub url: String,
    pub date: String,
    pub is_playlist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub auto_cleanup_enabled: bool,
    #[serde(default = "default_cleanup_days")]
    pub cleanup_days: u32,
}

fn default_cleanup_days() -> u32 {
    7
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_cleanup_enabled: false,
            cleanup_days: default_cleanup_days(),
        }
    }
}

/// Fields a settings update may carry; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub auto_cleanup_enabled: Option<bool>,
    pub cleanup_days: Option<u32>,
}

/// History and settings documents rooted in one data directory.
pub struct HistoryStore {
    history_path: PathBuf,
    settings_path: PathBuf,
}

impl HistoryStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            history_path: data_dir.join(HISTORY_FILE),
            settings_path: data_dir.join(SETTINGS_FILE),
        }
    }

    /// Loads the history list; a missing or unparsable file is an empty list.
    pub fn load_history(&self) -> Vec<HistoryEntry> {
        fs::read_to_string(&self.history_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Prepends an entry and truncates to the newest [`HISTORY_CAP`] entries.
    pub fn add_to_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.load_history();
        entries.insert(0, entry);
        entries.truncate(HISTORY_CAP);
        self.write_history(&entries)
    }

    pub fn clear_history(&self) -> Result<()> {
        self.write_history(&[])
    }

    fn write_history(&self, entries: &[HistoryEntry]) -> Result<()> {
        let raw = serde_json::to_string_pretty(entries).context("serializing history")?;
        fs::write(&self.history_path, raw)
            .with_context(|| format!("writing {}", self.history_path.display()))
    }

    /// Loads settings, falling back to defaults on any read or parse failure.
    pub fn load_settings(&self) -> Settings {
        fs::read_to_string(&self.settings_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Merges recognized fields over the stored settings and persists the
    /// result, returning the merged document.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<Settings> {
        let mut settings = self.load_settings();
        if let Some(enabled) = update.auto_cleanup_enabled {
            settings.auto_cleanup_enabled = enabled;
        }
        if let Some(days) = update.cleanup_days {
            settings.cleanup_days = days;
        }
        let raw = serde_json::to_string_pretty(&settings).context("serializing settings")?;
        fs::write(&self.settings_path, raw)
            .with_context(|| format!("writing {}", self.settings_path.display()))?;
        Ok(settings)
    }
}

/// Millisecond timestamp used for history ids and task ids.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
