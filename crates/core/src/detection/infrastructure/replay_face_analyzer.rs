use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detection::domain::detection_options::DetectionOptions;
use crate::detection::domain::face_analyzer::{FaceAnalyzer, ModelLoadError};
use crate::detection::domain::face_observation::FaceObservation;
use crate::shared::frame::Frame;

/// Pre-recorded observations keyed by frame index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub frames: BTreeMap<u64, Vec<FaceObservation>>,
    /// Frames on which analysis reports an error.
    #[serde(default)]
    pub failing_frames: BTreeSet<u64>,
}

/// Replays a [`ReplayScript`] instead of running inference.
///
/// Built from a file, the script is read by `load_models`, so a missing or
/// malformed script surfaces as a model load failure.
pub struct ReplayFaceAnalyzer {
    script: Option<ReplayScript>,
    path: Option<PathBuf>,
}

impl ReplayFaceAnalyzer {
    pub fn from_script(script: ReplayScript) -> Self {
        Self {
            script: Some(script),
            path: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            script: None,
            path: Some(path.into()),
        }
    }
}

impl FaceAnalyzer for ReplayFaceAnalyzer {
    fn load_models(&mut self, _dir: &Path) -> Result<(), ModelLoadError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = fs::read_to_string(path).map_err(|e| ModelLoadError::new(path, e))?;
        let script: ReplayScript =
            serde_json::from_str(&json).map_err(|e| ModelLoadError::new(path, e))?;
        log::info!(
            "Loaded replay script {} ({} frames)",
            path.display(),
            script.frames.len()
        );
        self.script = Some(script);
        Ok(())
    }

    fn analyze(
        &mut self,
        frame: &Frame,
        _options: &DetectionOptions,
    ) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>> {
        let script = self.script.as_ref().ok_or("replay script not loaded")?;
        if script.failing_frames.contains(&frame.index()) {
            return Err(format!("scripted failure at frame {}", frame.index()).into());
        }
        Ok(script.frames.get(&frame.index()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::bounding_box::BoundingBox;
    use tempfile::TempDir;

    fn frame(index: u64) -> Frame {
        Frame::new(vec![0u8; 100 * 100 * 3], 100, 100, 3, index)
    }

    fn obs(x: f64) -> FaceObservation {
        FaceObservation::new(BoundingBox::new(x, 20.0, 50.0, 50.0), 0.9)
    }

    #[test]
    fn test_returns_scripted_observations_per_frame() {
        let script = ReplayScript {
            frames: BTreeMap::from([(0, vec![obs(10.0)]), (1, vec![obs(10.0), obs(60.0)])]),
            failing_frames: BTreeSet::new(),
        };
        let mut analyzer = ReplayFaceAnalyzer::from_script(script);
        let opts = DetectionOptions::default();

        assert_eq!(analyzer.analyze(&frame(0), &opts).unwrap().len(), 1);
        assert_eq!(analyzer.analyze(&frame(1), &opts).unwrap().len(), 2);
        assert!(analyzer.analyze(&frame(7), &opts).unwrap().is_empty());
    }

    #[test]
    fn test_failing_frame_returns_error() {
        let script = ReplayScript {
            frames: BTreeMap::new(),
            failing_frames: BTreeSet::from([2]),
        };
        let mut analyzer = ReplayFaceAnalyzer::from_script(script);
        assert!(analyzer
            .analyze(&frame(2), &DetectionOptions::default())
            .is_err());
    }

    #[test]
    fn test_loads_script_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("script.json");
        fs::write(
            &path,
            r#"{"frames": {"3": [{"bbox": {"x": 1.0, "y": 2.0, "width": 30.0, "height": 30.0}, "score": 0.8}]}}"#,
        )
        .unwrap();

        let mut analyzer = ReplayFaceAnalyzer::from_file(&path);
        analyzer.load_models(tmp.path()).unwrap();
        let out = analyzer
            .analyze(&frame(3), &DetectionOptions::default())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox.width, 30.0);
    }

    #[test]
    fn test_missing_script_is_model_load_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.json");
        let mut analyzer = ReplayFaceAnalyzer::from_file(&path);
        let err = analyzer.load_models(tmp.path()).unwrap_err();
        assert_eq!(err.path, path);
    }

    #[test]
    fn test_analyze_before_load_is_error() {
        let mut analyzer = ReplayFaceAnalyzer::from_file("unused.json");
        assert!(analyzer
            .analyze(&frame(0), &DetectionOptions::default())
            .is_err());
    }
}
