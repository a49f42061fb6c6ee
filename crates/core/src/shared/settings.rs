use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classification::domain::face_crop::CropFormat;
use crate::detection::domain::detection_options::{DetectionOptions, OptionsError};
use crate::fusion::fusion_engine::{FusionConfig, FusionConfigError};
use crate::shared::constants::{APP_DIR_NAME, DEFAULT_CLASSIFY_TIMEOUT_MS, DEFAULT_CLASSIFY_WORKERS};

pub const DEFAULT_PREDICT_URL: &str = "http://localhost:5000/predict";
pub const DEFAULT_IDENTIFY_URL: &str = "http://localhost:5000/identify-user";
pub const DEFAULT_SUBMISSION_URL: &str = "http://localhost:8080/save-predictions";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no per-user config directory on this platform")]
    NoConfigDir,
    #[error(transparent)]
    Detection(#[from] OptionsError),
    #[error(transparent)]
    Fusion(#[from] FusionConfigError),
    #[error("crop_padding must be in [0, 1], got {0}")]
    CropPadding(f64),
    #[error("timeout_ms must be positive")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    pub predict_url: String,
    /// Identification endpoint; identities stay unknown without it.
    pub identify_url: Option<String>,
    pub timeout_ms: u64,
    pub workers: usize,
    pub crop_format: CropFormat,
    /// Fraction of the box size added on every side of a crop.
    pub crop_padding: f64,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            predict_url: DEFAULT_PREDICT_URL.to_string(),
            identify_url: Some(DEFAULT_IDENTIFY_URL.to_string()),
            timeout_ms: DEFAULT_CLASSIFY_TIMEOUT_MS,
            workers: DEFAULT_CLASSIFY_WORKERS,
            crop_format: CropFormat::Png,
            crop_padding: 0.1,
        }
    }
}

/// Everything a monitoring run can be configured with.
///
/// Missing fields in a settings file take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub detection: DetectionOptions,
    pub classification: ClassificationSettings,
    pub fusion: FusionConfig,
    pub submission_url: Option<String>,
    pub model_dir: Option<PathBuf>,
    /// Base URL models are fetched from when missing locally.
    pub model_download_url: Option<String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            detection: DetectionOptions::default(),
            classification: ClassificationSettings::default(),
            fusion: FusionConfig::default(),
            submission_url: Some(DEFAULT_SUBMISSION_URL.to_string()),
            model_dir: None,
            model_download_url: None,
        }
    }
}

impl MonitorSettings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("settings.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `explicit` if given (it must exist), else the per-user settings file
    /// if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::config_path() {
            Some(path) if path.exists() => {
                log::info!("Using settings from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(write_err)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::config_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.detection.validate()?;
        self.fusion.validate()?;
        let padding = self.classification.crop_padding;
        if !(0.0..=1.0).contains(&padding) {
            return Err(SettingsError::CropPadding(padding));
        }
        if self.classification.timeout_ms == 0 {
            return Err(SettingsError::Timeout);
        }
        Ok(())
    }
}
