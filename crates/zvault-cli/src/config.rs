//! File- and default-based configuration for the zvault CLI.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by the verify and sync subcommands. Loadable from a
/// TOML or JSON file; command-line flags and environment variables
/// override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Target store bucket.
    pub bucket: String,
    /// Root dataset path.
    pub pool: String,
    /// Store key prefix objects live under.
    pub prefix: String,
    /// Age cutoff for uploads in days; `None` disables the cutoff.
    pub max_age_days: Option<u64>,
    /// The store's multipart chunk threshold in MiB.
    pub chunk_size_mb: u64,
    /// Storage class hint for uploads.
    pub storage_class: String,
    /// Run the snapshot tooling under sudo.
    pub use_sudo: bool,
    /// Abort verification when a remote object has no lineage entry,
    /// instead of counting it as a failure.
    pub strict_unmatched: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            pool: String::new(),
            prefix: String::new(),
            max_age_days: Some(121),
            chunk_size_mb: 256,
            storage_class: "DEEP_ARCHIVE".to_string(),
            use_sudo: true,
            strict_unmatched: false,
        }
    }
}

impl BackupConfig {
    /// Loads a config file, dispatching on the extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: BackupConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: BackupConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
