use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const MIN_CONSOLIDATION_SIZE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_AUTHORITATIVE_SOURCE: &str = "jellywatch";

fn default_media_extensions() -> Vec<String> {
    ["mkv", "mp4", "avi", "mov", "m4v", "webm"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub dry_run: bool,
    pub delete_source: bool,
    pub verify_checksums: bool,
    pub min_consolidation_size_bytes: u64,
    pub media_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub library_roots: Vec<PathBuf>,
    pub authoritative_source: String,
    pub transfer: TransferConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            delete_source: true,
            verify_checksums: false,
            min_consolidation_size_bytes: MIN_CONSOLIDATION_SIZE_BYTES,
            media_extensions: default_media_extensions(),
            exclude_patterns: Vec::new(),
            library_roots: Vec::new(),
            authoritative_source: DEFAULT_AUTHORITATIVE_SOURCE.to_string(),
            transfer: TransferConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// -1 keeps the source owner.
    pub target_uid: i64,
    /// -1 keeps the source group.
    pub target_gid: i64,
    pub preserve_attrs: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            retry_attempts: 3,
            retry_delay_ms: 5_000,
            target_uid: -1,
            target_gid: -1,
            preserve_attrs: true,
        }
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|err| EngineError::io(path, err))?;
        let mut config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<()> {
        self.media_extensions = self
            .media_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.media_extensions.is_empty() {
            return Err(EngineError::Config(
                "media_extensions must name at least one extension".to_string(),
            ));
        }
        if self.transfer.target_uid < -1 || self.transfer.target_gid < -1 {
            return Err(EngineError::Config(
                "target uid/gid must be -1 (preserve) or a valid id".to_string(),
            ));
        }
        if self.authoritative_source.trim().is_empty() {
            return Err(EngineError::Config(
                "authoritative_source must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_media_path(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.media_extensions.iter().any(|known| *known == ext))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::{EngineConfig, MIN_CONSOLIDATION_SIZE_BYTES};

    #[test]
    fn missing_fields_take_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("engine.json");
        fs::write(
            &path,
            r#"{"dry_run": true, "media_extensions": [".MKV", "mp4"], "transfer": {"retry_attempts": 1}}"#,
        )
        .expect("write config");

        let config = EngineConfig::load(&path).expect("load config");
        assert!(config.dry_run);
        assert!(config.delete_source);
        assert_eq!(config.min_consolidation_size_bytes, MIN_CONSOLIDATION_SIZE_BYTES);
        assert_eq!(config.media_extensions, vec!["mkv", "mp4"]);
        assert_eq!(config.transfer.retry_attempts, 1);
        assert_eq!(config.transfer.timeout_secs, 300);
        assert!(config.is_media_path(Path::new("/lib/Her (2013)/Her.MKV")));
        assert!(!config.is_media_path(Path::new("/lib/Her (2013)/Her.nfo")));
    }

    #[test]
    fn rejects_empty_extension_list() {
        let mut config = EngineConfig {
            media_extensions: vec![".".to_string()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
