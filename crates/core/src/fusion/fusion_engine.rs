//! Fuses per-frame detections with asynchronous remote classifications.
//!
//! Every frame the engine re-derives which tracked region each observation
//! belongs to by box overlap, decides which regions need a classification
//! request, ages regions nobody matched, and records a ledger entry whenever
//! a region's `(expression, focus)` pair changes. Responses come back later
//! through [`FusionEngine::apply_response`] and are applied only to the exact
//! request and region generation that asked for them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::region_matcher::{greedy_assign, MatchCandidate};
use super::tracked_region::{
    PendingRequest, RegionClassification, RegionId, RegionState, RequestTicket, Tombstone,
    TrackedRegion,
};
use crate::classification::domain::classification::{ClassificationOutcome, ClassificationResponse};
use crate::detection::domain::face_observation::FaceObservation;
use crate::ledger::prediction_ledger::PredictionLedger;
use crate::ledger::prediction_record::PredictionRecord;
use crate::shared::bounding_box::{BoundingBox, DEFAULT_IOU_THRESHOLD};
use crate::shared::constants::{
    DEFAULT_DESCRIPTOR_TIE_WINDOW, DEFAULT_GRACE_FRAMES, DEFAULT_TOMBSTONE_FRAMES,
};

/// Expression recorded when the expression head is disabled.
const UNKNOWN_EXPRESSION: &str = "unknown";

#[derive(Error, Debug, PartialEq)]
pub enum FusionConfigError {
    #[error("iou_threshold must be in (0, 1), got {0}")]
    IouThreshold(f64),
    #[error("descriptor_tie_window must be in [0, 1), got {0}")]
    TieWindow(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Minimum IoU for an observation to continue a region.
    pub iou_threshold: f64,
    /// Consecutive unmatched frames a region survives.
    pub grace_frames: u32,
    /// Frames an expired region's id stays claimable at its last position.
    pub tombstone_frames: u32,
    /// IoU distance within which descriptor similarity decides the match.
    pub descriptor_tie_window: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            grace_frames: DEFAULT_GRACE_FRAMES,
            tombstone_frames: DEFAULT_TOMBSTONE_FRAMES,
            descriptor_tie_window: DEFAULT_DESCRIPTOR_TIE_WINDOW,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), FusionConfigError> {
        if !(self.iou_threshold > 0.0 && self.iou_threshold < 1.0) {
            return Err(FusionConfigError::IouThreshold(self.iou_threshold));
        }
        if !(self.descriptor_tie_window >= 0.0 && self.descriptor_tie_window < 1.0) {
            return Err(FusionConfigError::TieWindow(self.descriptor_tie_window));
        }
        Ok(())
    }
}

/// A crop the caller should send for classification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationRequest {
    pub ticket: RequestTicket,
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionEvent {
    Created {
        id: RegionId,
        generation: u64,
        /// The id was taken over from a tombstone.
        revived: bool,
    },
    Resumed {
        id: RegionId,
    },
    WentStale {
        id: RegionId,
    },
    Expired {
        id: RegionId,
        generation: u64,
        abandoned_request: bool,
    },
    Recorded {
        id: RegionId,
        sequence_id: u64,
    },
}

/// Outcome of one [`FusionEngine::observe`] call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FusionStep {
    pub requests: Vec<ClassificationRequest>,
    pub events: Vec<RegionEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseDisposition {
    Applied,
    Failed,
    TimedOut,
    /// The region expired, was recreated or reset since the request was made.
    Stale,
}

pub struct FusionEngine {
    config: FusionConfig,
    ledger: PredictionLedger,
    regions: Vec<TrackedRegion>,
    tombstones: Vec<Tombstone>,
    next_region_id: u64,
    next_generation: u64,
    next_request_id: u64,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, ledger: PredictionLedger) -> Self {
        Self {
            config,
            ledger,
            regions: Vec::new(),
            tombstones: Vec::new(),
            next_region_id: 0,
            next_generation: 0,
            next_request_id: 0,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PredictionLedger {
        &self.ledger
    }

    /// Live regions in creation order.
    pub fn regions(&self) -> &[TrackedRegion] {
        &self.regions
    }

    pub fn region(&self, id: RegionId) -> Option<&TrackedRegion> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Number of classification requests currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.regions.iter().filter(|r| r.pending.is_some()).count()
    }

    /// Folds one frame's observations into the region set.
    pub fn observe(&mut self, frame_index: u64, observations: &[FaceObservation]) -> FusionStep {
        let mut step = FusionStep::default();
        self.prune_tombstones(frame_index);

        let assignment = {
            let regions: Vec<MatchCandidate<'_>> = self
                .regions
                .iter()
                .map(|r| MatchCandidate::new(&r.observation.bbox, r.observation.descriptor.as_deref()))
                .collect();
            let candidates: Vec<MatchCandidate<'_>> = observations
                .iter()
                .map(|o| MatchCandidate::new(&o.bbox, o.descriptor.as_deref()))
                .collect();
            greedy_assign(
                &regions,
                &candidates,
                self.config.iou_threshold,
                self.config.descriptor_tie_window,
            )
        };

        let mut touched = Vec::new();
        for &(ri, oi) in &assignment.matches {
            let region = &mut self.regions[ri];
            if region.is_stale() {
                log::debug!("Region {} resumed", region.id);
                step.events.push(RegionEvent::Resumed { id: region.id });
            }
            region.observation = observations[oi].clone();
            region.state = RegionState::Active;
            if region.pending.is_none() {
                step.requests
                    .push(issue_request(&mut self.next_request_id, region, frame_index));
            }
            touched.push(region.id);
        }

        self.age_unmatched(&assignment.unmatched_regions, frame_index, &mut step);

        for &oi in &assignment.unmatched_observations {
            let (id, generation) = self.create_region(&observations[oi], frame_index, &mut step);
            touched.push(id);
            log::debug!("Region {id} created (generation {generation})");
        }

        self.record_changes(&touched, &mut step);
        step
    }

    /// Applies a finished classification if it still belongs to the region
    /// that requested it. Any non-stale response frees the region's slot.
    pub fn apply_response(
        &mut self,
        response: ClassificationResponse,
        frame_index: u64,
    ) -> ResponseDisposition {
        let ticket = response.ticket;
        let Some(region) = self.regions.iter_mut().find(|r| r.accepts(&ticket)) else {
            log::debug!(
                "Discarding stale response for region {} (generation {}, request {})",
                ticket.region_id,
                ticket.generation,
                ticket.request_id
            );
            return ResponseDisposition::Stale;
        };

        region.pending = None;
        match response.outcome {
            ClassificationOutcome::Classified(c) => {
                region.classification = Some(RegionClassification {
                    label: c.label,
                    identity: c.identity,
                    confidence: c.confidence,
                    received_at_frame: frame_index,
                });
                ResponseDisposition::Applied
            }
            ClassificationOutcome::Failed(reason) => {
                log::debug!("Region {} classification failed: {reason}", region.id);
                ResponseDisposition::Failed
            }
            ClassificationOutcome::TimedOut => ResponseDisposition::TimedOut,
        }
    }

    /// Forgets every region and tombstone. Outstanding responses become stale.
    pub fn reset(&mut self) {
        let abandoned = self.in_flight();
        if abandoned > 0 {
            log::debug!("Abandoning {abandoned} outstanding classification requests");
        }
        self.regions.clear();
        self.tombstones.clear();
    }

    fn prune_tombstones(&mut self, frame_index: u64) {
        let keep_for = u64::from(self.config.tombstone_frames);
        self.tombstones
            .retain(|t| frame_index.saturating_sub(t.expired_at_frame) <= keep_for);
    }

    fn age_unmatched(&mut self, unmatched: &[usize], frame_index: u64, step: &mut FusionStep) {
        let grace = self.config.grace_frames;
        let mut expired = Vec::new();

        for &ri in unmatched {
            let region = &mut self.regions[ri];
            let missed = region.missed_frames() + 1;
            region.state = RegionState::Stale { missed };
            if missed == 1 {
                log::debug!("Region {} went stale", region.id);
                step.events.push(RegionEvent::WentStale { id: region.id });
            }
            if missed > grace {
                expired.push(ri);
            }
        }

        // Highest index first so earlier indices stay valid.
        expired.sort_unstable_by(|a, b| b.cmp(a));
        let mut removed: Vec<TrackedRegion> =
            expired.into_iter().map(|ri| self.regions.remove(ri)).collect();
        removed.reverse();

        for region in removed {
            let abandoned_request = region.pending.is_some();
            log::debug!(
                "Region {} expired (generation {}){}",
                region.id,
                region.generation,
                if abandoned_request {
                    ", abandoning its request"
                } else {
                    ""
                }
            );
            self.tombstones.push(Tombstone {
                id: region.id,
                generation: region.generation,
                last_box: region.observation.bbox,
                expired_at_frame: frame_index,
            });
            step.events.push(RegionEvent::Expired {
                id: region.id,
                generation: region.generation,
                abandoned_request,
            });
        }
    }

    /// Removes and returns the tombstone overlapping `bbox` best, if any
    /// reaches the IoU threshold.
    fn claim_tombstone(&mut self, bbox: &BoundingBox) -> Option<Tombstone> {
        let mut best: Option<(usize, f64)> = None;
        for (i, tombstone) in self.tombstones.iter().enumerate() {
            let iou = tombstone.last_box.iou(bbox);
            if iou >= self.config.iou_threshold && best.map_or(true, |(_, b)| iou > b) {
                best = Some((i, iou));
            }
        }
        best.map(|(i, _)| self.tombstones.remove(i))
    }

    fn create_region(
        &mut self,
        observation: &FaceObservation,
        frame_index: u64,
        step: &mut FusionStep,
    ) -> (RegionId, u64) {
        let tombstone = self.claim_tombstone(&observation.bbox);
        let id = match tombstone {
            Some(t) => t.id,
            None => {
                self.next_region_id += 1;
                RegionId(self.next_region_id)
            }
        };
        self.next_generation += 1;
        let generation = self.next_generation;

        let mut region = TrackedRegion::new(id, generation, observation.clone(), frame_index);
        step.requests
            .push(issue_request(&mut self.next_request_id, &mut region, frame_index));
        step.events.push(RegionEvent::Created {
            id,
            generation,
            revived: tombstone.is_some(),
        });
        self.regions.push(region);
        (id, generation)
    }

    fn record_changes(&mut self, touched: &[RegionId], step: &mut FusionStep) {
        for region in self.regions.iter_mut().filter(|r| touched.contains(&r.id)) {
            let Some(classification) = &region.classification else {
                continue;
            };
            let expression = region
                .observation
                .dominant_expression()
                .map_or(UNKNOWN_EXPRESSION, |(e, _)| e.as_str());
            let pair = (expression.to_string(), classification.label.clone());
            if region.last_recorded.as_ref() == Some(&pair) {
                continue;
            }

            let mut record =
                PredictionRecord::new(classification.identity.as_deref(), &pair.0, &pair.1)
                    .with_confidence(classification.confidence);
            if let Some(gender) = region.observation.gender {
                record = record.with_gender(gender.gender.to_string());
            }
            let sequence_id = self.ledger.append(record);
            region.last_recorded = Some(pair);
            step.events.push(RegionEvent::Recorded {
                id: region.id,
                sequence_id,
            });
        }
    }
}

fn issue_request(
    next_request_id: &mut u64,
    region: &mut TrackedRegion,
    frame_index: u64,
) -> ClassificationRequest {
    *next_request_id += 1;
    region.pending = Some(PendingRequest {
        request_id: *next_request_id,
        issued_at_frame: frame_index,
    });
    ClassificationRequest {
        ticket: region.ticket(*next_request_id),
        bbox: region.observation.bbox,
    }
}
