use super::classification::{ClassificationJob, ClassificationOutcome, ClassificationResponse};
use super::face_crop::FaceCrop;

/// Remote label / identity lookup for one face crop.
///
/// Stateless from the caller's point of view and safe to call concurrently
/// for distinct crops. Never retries; must return within its own timeout.
pub trait Classifier: Send + Sync {
    fn classify(&self, crop: &FaceCrop) -> ClassificationOutcome;
}

/// Runs classification jobs off the frame loop.
///
/// `submit` never blocks on the network. Completed responses are collected
/// by the loop with `poll_completed`, so results are applied on the loop
/// thread only. Dropping the dispatcher abandons outstanding jobs.
pub trait ClassificationDispatch {
    fn submit(&mut self, job: ClassificationJob);

    /// Responses finished since the last poll, in completion order.
    fn poll_completed(&mut self) -> Vec<ClassificationResponse>;
}
