use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Top-level configuration for the Aperture pipeline.
///
/// Loaded from `~/.aperture/config.toml` by default. Each stage reads its
/// own section; all three must agree on the link endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureConfig {
    pub general: GeneralConfig,
    pub capture: CaptureConfig,
    pub extract: ExtractConfig,
    pub store: StoreConfig,
}

impl ApertureConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ApertureConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and the image file store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.aperture/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Capture stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory of source images to feed through the pipeline.
    pub source_dir: String,
    /// Cycle through the source list forever; false = one pass, then stop.
    pub loop_source: bool,
    /// Pacing sleep after every successful send, in milliseconds.
    pub interval_ms: u64,
    /// Backoff after a failed image read, in milliseconds.
    pub retry_ms: u64,
    /// JPEG quality for the re-encoded wire image (1-100).
    pub jpeg_quality: u8,
    /// Endpoint this stage binds its push socket on.
    pub endpoint: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source_dir: "images".to_string(),
            loop_source: true,
            interval_ms: 200,
            retry_ms: 100,
            jpeg_quality: 90,
            endpoint: "127.0.0.1:6000".to_string(),
        }
    }
}

/// Extraction stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Capture-stage endpoint this stage connects its pull socket to.
    pub pull_endpoint: String,
    /// Endpoint this stage binds its push socket on.
    pub push_endpoint: String,
    /// Keep at most this many keypoints per frame, by response. 0 = unlimited.
    pub max_keypoints: u32,
    /// Corner threshold for the FAST detector.
    pub fast_threshold: u8,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            pull_endpoint: "127.0.0.1:6000".to_string(),
            push_endpoint: "127.0.0.1:6001".to_string(),
            max_keypoints: 0,
            fast_threshold: 20,
        }
    }
}

/// Persistence stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Extraction-stage endpoint this stage connects its pull socket to.
    pub pull_endpoint: String,
    /// Image file store directory, resolved under `data_dir` when relative.
    pub image_dir: String,
    /// SQLite database file, resolved under `data_dir` when relative.
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pull_endpoint: "127.0.0.1:6001".to_string(),
            image_dir: "images".to_string(),
            database: "frames.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ApertureConfig::default();
        assert_eq!(config.general.data_dir, "~/.aperture/data");
        assert_eq!(config.general.log_level, "info");
        assert!(config.capture.loop_source);
        assert_eq!(config.capture.interval_ms, 200);
        assert_eq!(config.capture.jpeg_quality, 90);
        assert_eq!(config.capture.endpoint, "127.0.0.1:6000");
        assert_eq!(config.extract.pull_endpoint, "127.0.0.1:6000");
        assert_eq!(config.extract.push_endpoint, "127.0.0.1:6001");
        assert_eq!(config.extract.max_keypoints, 0);
        assert_eq!(config.store.pull_endpoint, "127.0.0.1:6001");
        assert_eq!(config.store.database, "frames.db");
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/var/lib/aperture"
log_level = "debug"

[capture]
source_dir = "/srv/frames"
loop_source = false
interval_ms = 50
endpoint = "0.0.0.0:7000"

[extract]
max_keypoints = 500
fast_threshold = 12
"#;
        let file = create_temp_config(content);
        let config = ApertureConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/aperture");
        assert_eq!(config.capture.source_dir, "/srv/frames");
        assert!(!config.capture.loop_source);
        assert_eq!(config.capture.interval_ms, 50);
        assert_eq!(config.extract.max_keypoints, 500);
        assert_eq!(config.extract.fast_threshold, 12);
        // Untouched sections keep defaults.
        assert_eq!(config.store.database, "frames.db");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config("[general]\nlog_level = \"warn\"\n");
        let config = ApertureConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.capture.interval_ms, 200);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ApertureConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.aperture/data");
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let file = create_temp_config("this is {{ not toml");
        assert!(ApertureConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = ApertureConfig::default();
        config.capture.interval_ms = 1000;
        config.save(&path).unwrap();

        let reloaded = ApertureConfig::load(&path).unwrap();
        assert_eq!(reloaded.capture.interval_ms, 1000);
        assert_eq!(reloaded.general.log_level, config.general.log_level);
    }
}
