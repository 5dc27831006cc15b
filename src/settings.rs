use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    inference::{default_modules, ModuleSpec},
    upload::RetryPolicy,
};

pub const SETTINGS_PATH_ENV: &str = "VIEWTRACK_SETTINGS";
pub const DEFAULT_SETTINGS_FILE: &str = "viewtrack.settings.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl UploadSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardSettings {
    pub sample_interval_ms: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 250,
        }
    }
}

impl GuardSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StorageSettings {
    Remote {
        base_url: String,
        bucket: String,
        api_key: String,
    },
    Local {
        path: PathBuf,
    },
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings::Local {
            path: PathBuf::from("viewtrack-objects.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceSettings {
    pub license_key: String,
    pub modules: Vec<ModuleSpec>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            license_key: "dry-run".into(),
            modules: default_modules(),
        }
    }
}

/// Parameters of the simulated host used by the binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DryRunSettings {
    pub media_duration_secs: f64,
    pub event_period_ms: u64,
    pub grant_permission: bool,
}

impl Default for DryRunSettings {
    fn default() -> Self {
        Self {
            media_duration_secs: 5.0,
            event_period_ms: 100,
            grant_permission: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub upload: UploadSettings,
    pub guard: GuardSettings,
    pub storage: StorageSettings,
    pub inference: InferenceSettings,
    pub journal_path: PathBuf,
    pub dry_run: DryRunSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            upload: UploadSettings::default(),
            guard: GuardSettings::default(),
            storage: StorageSettings::default(),
            inference: InferenceSettings::default(),
            journal_path: PathBuf::from("viewtrack-journal.sqlite3"),
            dry_run: DryRunSettings::default(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Path from `VIEWTRACK_SETTINGS`, else `viewtrack.settings.json` in the
    /// working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }

    /// Loads settings from `path`. A missing file is created with the
    /// defaults so it can be edited; an unreadable one falls back to them.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings in {}: {err}; using defaults",
                    path.display()
                );
                AppSettings::default()
            })
        } else {
            let defaults = AppSettings::default();
            if let Err(err) = write_settings(&path, &defaults) {
                warn!("Could not write settings template: {err:#}");
            }
            defaults
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AppSettings {
        self.read().clone()
    }

    pub fn upload(&self) -> UploadSettings {
        self.read().upload.clone()
    }

    pub fn update_upload(&self, settings: UploadSettings) -> Result<()> {
        let mut guard = self.write();
        guard.upload = settings;
        write_settings(&self.path, &guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, AppSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn write_settings(path: &Path, data: &AppSettings) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults_and_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();

        assert_eq!(store.get(), AppSettings::default());
        assert!(path.exists());
        assert_eq!(store.upload().retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{
                "upload": { "max_attempts": 5 },
                "storage": { "kind": "remote", "base_url": "https://proj.supabase.co", "bucket": "tracking", "api_key": "k" }
            }"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).unwrap().get();

        assert_eq!(settings.upload.max_attempts, 5);
        assert_eq!(settings.upload.base_delay_ms, 1000);
        assert_eq!(settings.guard.sample_interval(), Duration::from_millis(250));
        assert!(matches!(settings.storage, StorageSettings::Remote { .. }));
        assert_eq!(settings.inference.modules.len(), 6);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.get(), AppSettings::default());
        assert!(store.reload().is_err());
    }

    #[test]
    fn updates_are_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update_upload(UploadSettings {
                max_attempts: 7,
                base_delay_ms: 50,
            })
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.upload().max_attempts, 7);
        assert_eq!(
            reopened.upload().retry_policy().base_delay,
            Duration::from_millis(50)
        );
    }
}
