use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum OptionsError {
    #[error("min_confidence must be in (0, 1], got {0}")]
    MinConfidence(f64),
    #[error("max_results must be at least 1")]
    MaxResults,
}

/// Which detection sub-models run and how their output is filtered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOptions {
    pub min_confidence: f64,
    pub max_results: usize,
    pub with_landmarks: bool,
    pub with_expressions: bool,
    pub with_age_gender: bool,
    /// Appearance descriptors used to break near-ties when matching regions.
    pub with_descriptors: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_results: 10,
            with_landmarks: true,
            with_expressions: true,
            with_age_gender: true,
            with_descriptors: false,
        }
    }
}

impl DetectionOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(self.min_confidence > 0.0 && self.min_confidence <= 1.0) {
            return Err(OptionsError::MinConfidence(self.min_confidence));
        }
        if self.max_results == 0 {
            return Err(OptionsError::MaxResults);
        }
        Ok(())
    }
}
