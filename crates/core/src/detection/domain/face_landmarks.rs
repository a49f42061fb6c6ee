//! 5-point face landmarks and the head pose derived from them.
//!
//! Point order: left eye, right eye, nose, left mouth corner, right mouth corner.
//! Points with x <= 0 are treated as invisible.

use super::face_observation::HeadPose;

const LEFT_EYE: usize = 0;
const RIGHT_EYE: usize = 1;
const NOSE: usize = 2;
const LEFT_MOUTH: usize = 3;
const RIGHT_MOUTH: usize = 4;

/// Nose position between the eye line (0) and the mouth line (1) on a level head.
const NEUTRAL_PITCH_RATIO: f64 = 0.5;

const MAX_ANGLE_DEG: f64 = 90.0;

#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    points: [(f64, f64); 5],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); 5]) -> Self {
        Self { points }
    }

    /// Takes the first five points; `None` if fewer are given.
    pub fn from_slice(points: &[(f64, f64)]) -> Option<Self> {
        let points: [(f64, f64); 5] = points.get(..5)?.try_into().ok()?;
        Some(Self::new(points))
    }

    pub fn points(&self) -> &[(f64, f64); 5] {
        &self.points
    }

    pub fn has_visible(&self) -> bool {
        self.points.iter().any(|(x, _)| *x > 0.0)
    }

    fn all_visible(&self) -> bool {
        self.points.iter().all(|(x, _)| *x > 0.0)
    }

    /// Signed nose offset from the eye midpoint relative to eye span,
    /// clamped to [-1, 1]. Positive when the nose sits right of center.
    pub fn yaw_ratio(&self) -> Option<f64> {
        let nose = self.points[NOSE];
        let left_eye = self.points[LEFT_EYE];
        let right_eye = self.points[RIGHT_EYE];

        if nose.0 <= 0.0 || left_eye.0 <= 0.0 || right_eye.0 <= 0.0 {
            return None;
        }

        let eye_mid_x = (left_eye.0 + right_eye.0) / 2.0;
        let eye_span = (right_eye.0 - left_eye.0).abs();
        if eye_span <= 0.0 {
            return None;
        }

        Some(((nose.0 - eye_mid_x) / eye_span).clamp(-1.0, 1.0))
    }

    /// Where the nose sits between the eye line (0.0) and the mouth line (1.0).
    pub fn pitch_ratio(&self) -> Option<f64> {
        if !self.all_visible() {
            return None;
        }
        let eye_mid_y = (self.points[LEFT_EYE].1 + self.points[RIGHT_EYE].1) / 2.0;
        let mouth_mid_y = (self.points[LEFT_MOUTH].1 + self.points[RIGHT_MOUTH].1) / 2.0;
        let span = mouth_mid_y - eye_mid_y;
        if span <= 0.0 {
            return None;
        }
        Some((self.points[NOSE].1 - eye_mid_y) / span)
    }

    /// Angle of the eye line against the horizontal, in degrees.
    pub fn roll_degrees(&self) -> Option<f64> {
        let left_eye = self.points[LEFT_EYE];
        let right_eye = self.points[RIGHT_EYE];
        if left_eye.0 <= 0.0 || right_eye.0 <= 0.0 {
            return None;
        }
        Some((right_eye.1 - left_eye.1).atan2(right_eye.0 - left_eye.0).to_degrees())
    }

    /// Approximate head pose. `None` unless all five points are visible.
    pub fn head_pose(&self) -> Option<HeadPose> {
        let roll = self.roll_degrees()?;
        let yaw = self.yaw_ratio()? * MAX_ANGLE_DEG;
        let pitch_ratio = self.pitch_ratio()?;
        let pitch = ((NEUTRAL_PITCH_RATIO - pitch_ratio) / NEUTRAL_PITCH_RATIO).clamp(-1.0, 1.0)
            * MAX_ANGLE_DEG;
        Some(HeadPose { roll, pitch, yaw })
    }
}
