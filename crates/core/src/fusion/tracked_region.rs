use std::fmt;

use crate::detection::domain::face_observation::FaceObservation;
use crate::shared::bounding_box::BoundingBox;

/// Identifier of a tracked region. Reused when a face reappears where an
/// expired region left its tombstone; the generation tells them apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one classification request and the region incarnation that
/// issued it. A response is applied only if all three still match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTicket {
    pub request_id: u64,
    pub region_id: RegionId,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionState {
    /// Matched by an observation in the latest frame.
    Active,
    /// Unmatched for `missed` consecutive frames, still drawn.
    Stale { missed: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: u64,
    pub issued_at_frame: u64,
}

/// Most recent remote verdict applied to a region.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionClassification {
    pub label: String,
    pub identity: Option<String>,
    pub confidence: Option<f64>,
    pub received_at_frame: u64,
}

/// The fusion engine's notion of one face persisting across frames.
#[derive(Clone, Debug)]
pub struct TrackedRegion {
    pub(crate) id: RegionId,
    pub(crate) generation: u64,
    pub(crate) observation: FaceObservation,
    pub(crate) state: RegionState,
    pub(crate) pending: Option<PendingRequest>,
    pub(crate) classification: Option<RegionClassification>,
    /// `(expression, focus)` pair of the last ledger record for this region.
    pub(crate) last_recorded: Option<(String, String)>,
    pub(crate) created_at_frame: u64,
}

impl TrackedRegion {
    pub(crate) fn new(
        id: RegionId,
        generation: u64,
        observation: FaceObservation,
        frame_index: u64,
    ) -> Self {
        Self {
            id,
            generation,
            observation,
            state: RegionState::Active,
            pending: None,
            classification: None,
            last_recorded: None,
            created_at_frame: frame_index,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_box(&self) -> &BoundingBox {
        &self.observation.bbox
    }

    /// The observation that last matched this region.
    pub fn last_observation(&self) -> &FaceObservation {
        &self.observation
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.state, RegionState::Stale { .. })
    }

    pub fn missed_frames(&self) -> u32 {
        match self.state {
            RegionState::Active => 0,
            RegionState::Stale { missed } => missed,
        }
    }

    pub fn pending_request(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn last_classification(&self) -> Option<&RegionClassification> {
        self.classification.as_ref()
    }

    pub fn created_at_frame(&self) -> u64 {
        self.created_at_frame
    }

    pub(crate) fn ticket(&self, request_id: u64) -> RequestTicket {
        RequestTicket {
            request_id,
            region_id: self.id,
            generation: self.generation,
        }
    }

    /// Whether a response carrying `ticket` may still be applied here.
    pub(crate) fn accepts(&self, ticket: &RequestTicket) -> bool {
        self.id == ticket.region_id
            && self.generation == ticket.generation
            && self
                .pending
                .is_some_and(|p| p.request_id == ticket.request_id)
    }
}

/// Remains of an expired region, kept so a face reappearing in the same
/// place gets the same id under a newer generation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Tombstone {
    pub id: RegionId,
    pub generation: u64,
    pub last_box: BoundingBox,
    pub expired_at_frame: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> TrackedRegion {
        TrackedRegion::new(
            RegionId(3),
            7,
            FaceObservation::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9),
            1,
        )
    }

    #[test]
    fn test_accepts_only_matching_ticket() {
        let mut r = region();
        r.pending = Some(PendingRequest {
            request_id: 11,
            issued_at_frame: 1,
        });
        assert!(r.accepts(&r.ticket(11)));
        assert!(!r.accepts(&r.ticket(12)));

        let old_generation = RequestTicket {
            generation: 6,
            ..r.ticket(11)
        };
        assert!(!r.accepts(&old_generation));
    }

    #[test]
    fn test_no_pending_accepts_nothing() {
        let r = region();
        assert!(!r.accepts(&r.ticket(1)));
    }

    #[test]
    fn test_missed_frames_follow_state() {
        let mut r = region();
        assert_eq!(r.missed_frames(), 0);
        r.state = RegionState::Stale { missed: 2 };
        assert!(r.is_stale());
        assert_eq!(r.missed_frames(), 2);
    }
}
