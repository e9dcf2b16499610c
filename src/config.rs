//! Repository settings. Loaded from `<data dir>/repository.json` when the
//! file exists; every field carries a default so a missing or partial file
//! still yields a working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RepositoryConfig {
    /// Directory holding the settings file and the store snapshot.
    #[serde(default = "RepositoryConfig::default_data_dir")]
    pub data_dir: PathBuf,
    /// Optional snapshot persistence of the resource store.
    #[serde(default)]
    pub snapshot: SnapshotSettings,
}

impl RepositoryConfig {
    fn default_data_dir() -> PathBuf { PathBuf::from("depot_data") }

    pub fn config_path(&self) -> PathBuf { self.data_dir.join("repository.json") }

    pub fn snapshot_path(&self) -> PathBuf { self.data_dir.join("snapshot.bin") }

    /// Settings for a data directory: `<dir>/repository.json` when readable,
    /// defaults otherwise. The directory argument is authoritative over
    /// whatever `data_dir` the file itself carries.
    pub fn load_or_default(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join("repository.json");
        let mut config = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<RepositoryConfig>(&bytes) {
                Ok(config) => config,
                Err(err) => {
                    warn!(target: "depot::config", path = %path.display(), error = %err, "unreadable settings file, using defaults");
                    RepositoryConfig::default()
                }
            },
            Err(_) => RepositoryConfig::default(),
        };
        config.data_dir = dir;
        config
    }

    pub fn save(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(self.config_path(), bytes)?;
        Ok(())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self { data_dir: Self::default_data_dir(), snapshot: SnapshotSettings::default() }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SnapshotSettings {
    /// Enable periodic snapshotting of the resource store to disk.
    #[serde(default)]
    pub enabled: bool,
    /// Interval in milliseconds between snapshots.
    #[serde(default = "SnapshotSettings::default_interval_ms")]
    pub interval_ms: u64,
    /// Snapshot format: currently only "bincode".
    #[serde(default = "SnapshotSettings::default_format")]
    pub format: String,
}

impl SnapshotSettings {
    fn default_interval_ms() -> u64 { 5_000 }
    fn default_format() -> String { "bincode".to_string() }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self { enabled: false, interval_ms: Self::default_interval_ms(), format: Self::default_format() }
    }
}
