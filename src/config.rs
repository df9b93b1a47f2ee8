use crate::frame::FrameOrder;
use crate::index::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Which comparator decides duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Hash,
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Mean,
    Gradient,
    DoubleGradient,
    Blockhash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    pub algorithm: HashAlgorithm,
    /// Grid edge length; a mean hash of size 16 has 256 bits.
    pub size: u32,
    /// Largest Hamming distance still counted as a duplicate.
    pub max_distance: u32,
    /// Width of the luminance band code appended to the hash. 0, the
    /// default, keeps the bare hash and its keys.
    pub luma_bands: u8,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Mean,
            size: 16,
            max_distance: 0,
            luma_bands: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralConfig {
    /// Canonical edge length both images are resized to.
    pub size: u32,
    /// Side of the square SSIM window. Odd.
    pub window: u32,
    /// Scores at or above this are duplicates.
    pub threshold: f64,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        Self {
            size: 256,
            window: 7,
            threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub extension: String,
    pub jpeg_quality: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            extension: "jpg".to_string(),
            jpeg_quality: 90,
        }
    }
}

pub const STORE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Largest hash grid or canonical SSIM edge accepted.
pub const MAX_GRID_SIZE: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub strategy: Strategy,
    pub hash: HashConfig,
    pub structural: StructuralConfig,
    pub policy: MatchPolicy,
    pub order: FrameOrder,
    pub store: StoreConfig,
    /// Fingerprinting threads; rayon's global pool when unset.
    pub threads: Option<usize>,
    /// Candidates fingerprinted together before admission.
    pub chunk_size: usize,
    /// Upper bound on a batch run.
    pub deadline_secs: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Hash,
            hash: HashConfig::default(),
            structural: StructuralConfig::default(),
            policy: MatchPolicy::FirstMatch,
            order: FrameOrder::Timestamp,
            store: StoreConfig::default(),
            threads: None,
            chunk_size: 64,
            deadline_secs: None,
        }
    }
}

impl DedupConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DedupConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/framecull/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("framecull").join("config.json"))
    }

    /// Load `path`, else the default location if it exists, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(default) if default.is_file() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash.size == 0 || self.hash.size > MAX_GRID_SIZE {
            return Err(ConfigError::Invalid {
                field: "hash.size",
                message: format!("{} is outside 1..={}", self.hash.size, MAX_GRID_SIZE),
            });
        }
        if self.structural.size > MAX_GRID_SIZE {
            return Err(ConfigError::Invalid {
                field: "structural.size",
                message: format!("{} exceeds {}", self.structural.size, MAX_GRID_SIZE),
            });
        }
        if self.hash.luma_bands > 64 {
            return Err(ConfigError::Invalid {
                field: "hash.luma_bands",
                message: format!("{} exceeds 64", self.hash.luma_bands),
            });
        }
        if self.structural.window < 3 || self.structural.window % 2 == 0 {
            return Err(ConfigError::Invalid {
                field: "structural.window",
                message: format!("{} must be odd and at least 3", self.structural.window),
            });
        }
        if self.structural.window > self.structural.size {
            return Err(ConfigError::Invalid {
                field: "structural.window",
                message: format!(
                    "{} is larger than the canonical size {}",
                    self.structural.window, self.structural.size
                ),
            });
        }
        if !(-1.0..=1.0).contains(&self.structural.threshold) {
            return Err(ConfigError::Invalid {
                field: "structural.threshold",
                message: format!("{} is outside [-1, 1]", self.structural.threshold),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "threads",
                message: "must be at least 1".to_string(),
            });
        }
        let extension = self.store.extension.to_lowercase();
        if !STORE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ConfigError::Invalid {
                field: "store.extension",
                message: format!("unsupported extension {:?}", self.store.extension),
            });
        }
        if self.store.jpeg_quality == 0 || self.store.jpeg_quality > 100 {
            return Err(ConfigError::Invalid {
                field: "store.jpeg_quality",
                message: format!("{} is outside 1..=100", self.store.jpeg_quality),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DedupConfig::default();
        assert_eq!(config.strategy, Strategy::Hash);
        assert_eq!(config.hash.size, 16);
        assert_eq!(config.hash.max_distance, 0);
        assert_eq!(config.hash.luma_bands, 0);
        assert_eq!(config.structural.size, 256);
        assert_eq!(config.structural.threshold, 0.95);
        assert_eq!(config.policy, MatchPolicy::FirstMatch);
        assert_eq!(config.store.extension, "jpg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "strategy": "structural",
                "structural": { "threshold": 0.9 },
                "hash": { "algorithm": "double_gradient", "max_distance": 4 },
                "policy": "best_match",
                "order": "lexical",
                "deadline_secs": 30
            }"#,
        )
        .unwrap();

        let config = DedupConfig::load(&path).unwrap();
        assert_eq!(config.strategy, Strategy::Structural);
        assert_eq!(config.structural.threshold, 0.9);
        assert_eq!(config.structural.window, 7);
        assert_eq!(config.hash.algorithm, HashAlgorithm::DoubleGradient);
        assert_eq!(config.hash.max_distance, 4);
        assert_eq!(config.hash.size, 16);
        assert_eq!(config.policy, MatchPolicy::BestMatch);
        assert_eq!(config.order, FrameOrder::Lexical);
        assert_eq!(config.deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ strategy: ").unwrap();
        assert!(matches!(
            DedupConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_resolve_explicit_missing_file_fails() {
        let result = DedupConfig::resolve(Some(Path::new("/no/such/config.json")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DedupConfig::default();
        config.structural.window = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "structural.window", .. })
        ));

        let mut config = DedupConfig::default();
        config.structural.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = DedupConfig::default();
        config.store.extension = "gif".to_string();
        assert!(config.validate().is_err());

        let mut config = DedupConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = DedupConfig::default();
        config.hash.luma_bands = 65;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_caps_grid_sizes() {
        let mut config = DedupConfig::default();
        config.hash.size = MAX_GRID_SIZE;
        config.structural.size = MAX_GRID_SIZE;
        assert!(config.validate().is_ok());

        let mut config = DedupConfig::default();
        config.hash.size = 65536;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "hash.size", .. })
        ));

        let mut config = DedupConfig::default();
        config.structural.size = 65536;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "structural.size", .. })
        ));
    }

    #[test]
    fn test_load_rejects_oversized_grid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{ "structural": { "size": 65536 } }"#).unwrap();
        assert!(matches!(
            DedupConfig::load(&path),
            Err(ConfigError::Invalid { field: "structural.size", .. })
        ));
    }
}
