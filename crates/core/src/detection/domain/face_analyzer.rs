use std::path::{Path, PathBuf};

use thiserror::Error;

use super::detection_options::DetectionOptions;
use super::face_observation::FaceObservation;
use crate::shared::frame::Frame;

/// Detection cannot run at all; fatal to the pipeline.
#[derive(Error, Debug)]
#[error("failed to load models from {path}: {source}")]
pub struct ModelLoadError {
    pub path: PathBuf,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ModelLoadError {
    pub fn new(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Black-box face inference capability.
///
/// `load_models` runs once before any `analyze` call. `analyze` errors are
/// per-frame failures; callers treat them as "no faces this frame".
pub trait FaceAnalyzer: Send {
    fn load_models(&mut self, dir: &Path) -> Result<(), ModelLoadError>;

    fn analyze(
        &mut self,
        frame: &Frame,
        options: &DetectionOptions,
    ) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>>;
}
