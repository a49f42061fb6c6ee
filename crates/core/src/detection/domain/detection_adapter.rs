use std::path::PathBuf;

use super::detection_options::DetectionOptions;
use super::face_analyzer::{FaceAnalyzer, ModelLoadError};
use super::face_observation::{ExpressionScores, FaceObservation};
use crate::shared::frame::Frame;

/// Proof that models are loaded. Only [`DetectionAdapter::prepare`] creates one.
#[derive(Clone, Debug)]
pub struct DetectionSession {
    options: DetectionOptions,
}

impl DetectionSession {
    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }
}

/// Wraps a [`FaceAnalyzer`] behind a one-time readiness barrier and
/// normalises whatever it returns.
pub struct DetectionAdapter {
    analyzer: Box<dyn FaceAnalyzer>,
    model_dir: PathBuf,
    options: DetectionOptions,
    ready: bool,
}

impl DetectionAdapter {
    pub fn new(
        analyzer: Box<dyn FaceAnalyzer>,
        model_dir: impl Into<PathBuf>,
        options: DetectionOptions,
    ) -> Self {
        Self {
            analyzer,
            model_dir: model_dir.into(),
            options,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Loads models on the first call; later calls only mint a new session.
    pub fn prepare(&mut self) -> Result<DetectionSession, ModelLoadError> {
        if !self.ready {
            log::info!("Loading face models from {}", self.model_dir.display());
            self.analyzer.load_models(&self.model_dir)?;
            self.ready = true;
        }
        Ok(DetectionSession {
            options: self.options.clone(),
        })
    }

    /// Never fails: an analyzer error yields no faces for this frame.
    pub fn detect(&mut self, session: &DetectionSession, frame: &Frame) -> Vec<FaceObservation> {
        match self.analyzer.analyze(frame, &session.options) {
            Ok(raw) => normalize(raw, frame.width(), frame.height(), &session.options),
            Err(e) => {
                log::warn!("Detection failed on frame {}: {e}", frame.index());
                Vec::new()
            }
        }
    }
}

/// Drops unusable boxes, clamps to the frame, applies the confidence floor
/// and result cap (highest scores kept), and strips disabled attributes.
pub fn normalize(
    observations: Vec<FaceObservation>,
    frame_w: u32,
    frame_h: u32,
    options: &DetectionOptions,
) -> Vec<FaceObservation> {
    let mut kept: Vec<FaceObservation> = observations
        .into_iter()
        .filter(|o| o.bbox.is_valid() && o.score.is_finite() && o.score >= options.min_confidence)
        .filter_map(|mut o| {
            o.bbox = o.bbox.clamp_to(frame_w, frame_h)?;
            Some(o)
        })
        .collect();

    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(options.max_results);

    for obs in &mut kept {
        if !options.with_landmarks {
            obs.landmarks.clear();
            obs.pose = None;
        }
        if !options.with_expressions {
            obs.expressions = ExpressionScores::new();
        }
        if !options.with_age_gender {
            obs.age = None;
            obs.gender = None;
        }
        if !options.with_descriptors {
            obs.descriptor = None;
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_observation::{
        Expression, Gender, GenderEstimate, HeadPose,
    };
    use crate::shared::bounding_box::BoundingBox;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubAnalyzer {
        loads: Arc<AtomicUsize>,
        fail_load: bool,
        result: Option<Vec<FaceObservation>>,
    }

    impl FaceAnalyzer for StubAnalyzer {
        fn load_models(&mut self, dir: &Path) -> Result<(), ModelLoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(ModelLoadError::new(dir, "missing weights"));
            }
            Ok(())
        }

        fn analyze(
            &mut self,
            _frame: &Frame,
            _options: &DetectionOptions,
        ) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>> {
            self.result.clone().ok_or_else(|| "inference error".into())
        }
    }

    fn adapter(result: Option<Vec<FaceObservation>>, fail_load: bool) -> (DetectionAdapter, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let analyzer = StubAnalyzer {
            loads: loads.clone(),
            fail_load,
            result,
        };
        (
            DetectionAdapter::new(Box::new(analyzer), "models", DetectionOptions::default()),
            loads,
        )
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 200 * 100 * 3], 200, 100, 3, 0)
    }

    fn full_observation(x: f64, score: f64) -> FaceObservation {
        let mut obs = FaceObservation::new(BoundingBox::new(x, 10.0, 40.0, 40.0), score)
            .with_expressions(ExpressionScores::from_pairs([(Expression::Happy, 0.9)]))
            .with_descriptor(vec![1.0, 0.0]);
        obs.landmarks = vec![(x + 10.0, 20.0); 5];
        obs.age = Some(21.0);
        obs.gender = Some(GenderEstimate {
            gender: Gender::Female,
            probability: 0.8,
        });
        obs.pose = Some(HeadPose {
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
        });
        obs
    }

    #[test]
    fn test_prepare_loads_once() {
        let (mut adapter, loads) = adapter(Some(vec![]), false);
        assert!(!adapter.is_ready());
        adapter.prepare().unwrap();
        adapter.prepare().unwrap();
        assert!(adapter.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prepare_failure_is_model_load_error() {
        let (mut adapter, _) = adapter(Some(vec![]), true);
        let err = adapter.prepare().unwrap_err();
        assert_eq!(err.path, PathBuf::from("models"));
        assert!(!adapter.is_ready());
    }

    #[test]
    fn test_analyzer_error_yields_no_faces() {
        let (mut adapter, _) = adapter(None, false);
        let session = adapter.prepare().unwrap();
        assert!(adapter.detect(&session, &frame()).is_empty());
    }

    #[test]
    fn test_detect_clamps_boxes_to_frame() {
        let obs = FaceObservation::new(BoundingBox::new(180.0, -5.0, 40.0, 40.0), 0.9);
        let (mut adapter, _) = adapter(Some(vec![obs]), false);
        let session = adapter.prepare().unwrap();
        let out = adapter.detect(&session, &frame());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BoundingBox::new(180.0, 0.0, 20.0, 35.0));
    }

    #[test]
    fn test_normalize_drops_invalid_and_low_confidence() {
        let raw = vec![
            FaceObservation::new(BoundingBox::new(0.0, 0.0, 0.0, 10.0), 0.9),
            FaceObservation::new(BoundingBox::new(0.0, 0.0, f64::NAN, 10.0), 0.9),
            FaceObservation::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.2),
            FaceObservation::new(BoundingBox::new(500.0, 500.0, 10.0, 10.0), 0.9),
            FaceObservation::new(BoundingBox::new(5.0, 5.0, 10.0, 10.0), 0.7),
        ];
        let out = normalize(raw, 200, 100, &DetectionOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox.x, 5.0);
    }

    #[test]
    fn test_normalize_keeps_highest_scores() {
        let raw = vec![
            full_observation(0.0, 0.6),
            full_observation(50.0, 0.95),
            full_observation(100.0, 0.8),
        ];
        let opts = DetectionOptions {
            max_results: 2,
            ..Default::default()
        };
        let out = normalize(raw, 200, 100, &opts);
        let scores: Vec<f64> = out.iter().map(|o| o.score).collect();
        assert_eq!(scores, vec![0.95, 0.8]);
    }

    #[test]
    fn test_normalize_strips_disabled_attributes() {
        let opts = DetectionOptions {
            with_landmarks: false,
            with_expressions: false,
            with_age_gender: false,
            with_descriptors: false,
            ..Default::default()
        };
        let out = normalize(vec![full_observation(0.0, 0.9)], 200, 100, &opts);
        let obs = &out[0];
        assert!(obs.landmarks.is_empty());
        assert!(obs.pose.is_none());
        assert!(obs.expressions.is_empty());
        assert!(obs.age.is_none());
        assert!(obs.gender.is_none());
        assert!(obs.descriptor.is_none());
    }

    #[test]
    fn test_normalize_keeps_enabled_attributes() {
        let opts = DetectionOptions {
            with_descriptors: true,
            ..Default::default()
        };
        let out = normalize(vec![full_observation(0.0, 0.9)], 200, 100, &opts);
        let obs = &out[0];
        assert_eq!(obs.landmarks.len(), 5);
        assert!(obs.pose.is_some());
        assert!(obs.gender.is_some());
        assert!(obs.descriptor.is_some());
    }
}
