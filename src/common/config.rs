use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use image::imageops::FilterType;
use crate::common::error::{DetectorError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "configs/fracture-detector.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("users.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_path: default_database_path() }
    }
}

/// How password digests are produced and stored.
///
/// `Sha256` is the unsalted hex digest and stays byte-compatible with
/// existing databases. `SaltedSha256` stores `<salt_hex>$<digest_hex>` in the
/// same column; older unsalted rows keep verifying under it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordScheme {
    #[default]
    Sha256,
    SaltedSha256,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub password_scheme: PasswordScheme,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("fracture_classification_model.onnx")
}

fn default_optimization_level() -> u32 { 3 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            optimization_level: default_optimization_level(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    #[default]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Scores strictly above this map to label index 1.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_labels")]
    pub labels: [String; 2],
    #[serde(default)]
    pub resize_filter: ResizeFilter,
}

fn default_threshold() -> f32 { 0.5 }

fn default_labels() -> [String; 2] {
    ["fractured".to_string(), "not fractured".to_string()]
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            labels: default_labels(),
            resize_filter: ResizeFilter::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Like [`Config::load_from_path`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DetectorError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| DetectorError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(DetectorError::Config("Database path must not be empty".into()));
        }

        if self.model.optimization_level > 3 {
            return Err(DetectorError::Config(format!(
                "Optimization level must be between 0 and 3, got {}",
                self.model.optimization_level
            )));
        }

        let threshold = self.inference.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DetectorError::Config(format!(
                "Threshold must be between 0.0 and 1.0, got {}", threshold
            )));
        }

        if self.inference.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(DetectorError::Config("Labels must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_preserve_observed_behaviour() {
        let config = Config::default();
        assert_eq!(config.storage.database_path, PathBuf::from("users.db"));
        assert_eq!(config.auth.password_scheme, PasswordScheme::Sha256);
        assert_eq!(config.inference.threshold, 0.5);
        assert_eq!(config.inference.labels[0], "fractured");
        assert_eq!(config.inference.labels[1], "not fractured");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [auth]
            password_scheme = "salted_sha256"

            [inference]
            threshold = 0.7
            resize_filter = "triangle"
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.password_scheme, PasswordScheme::SaltedSha256);
        assert_eq!(config.inference.threshold, 0.7);
        assert_eq!(config.inference.resize_filter, ResizeFilter::Triangle);
        assert_eq!(config.inference.labels, default_labels());
        assert_eq!(config.model.optimization_level, 3);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.inference.threshold = 1.5;
        assert!(matches!(config.validate(), Err(DetectorError::Config(_))));
    }

    #[test]
    fn rejects_blank_label() {
        let mut config = Config::default();
        config.inference.labels[1] = "  ".into();
        assert!(matches!(config.validate(), Err(DetectorError::Config(_))));
    }

    #[test]
    fn missing_file_is_an_error_unless_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load_from_path(&path), Err(DetectorError::Config(_))));
        assert!(Config::load_or_default(&path).is_ok());
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[model]\noptimization_level = 9\n").unwrap();
        assert!(matches!(Config::load_from_path(&path), Err(DetectorError::Config(_))));

        std::fs::write(&path, "[storage]\ndatabase_path = \"data/app.db\"\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.storage.database_path, PathBuf::from("data/app.db"));
    }
}
