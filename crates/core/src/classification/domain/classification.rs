use crate::classification::domain::face_crop::FaceCrop;
use crate::fusion::tracked_region::RequestTicket;

/// A remote verdict for one face crop, normalised to a single shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// Focus / engagement class reported by the service.
    pub label: String,
    /// Recognised subject; `None` when unknown.
    pub identity: Option<String>,
    pub confidence: Option<f64>,
}

impl Classification {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            identity: None,
            confidence: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Result of one classification call. Failures are values, not errors:
/// they only free the region's request slot.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassificationOutcome {
    Classified(Classification),
    Failed(String),
    TimedOut,
}

/// A crop queued for classification, tagged with the request it answers.
#[derive(Clone, Debug)]
pub struct ClassificationJob {
    pub ticket: RequestTicket,
    pub crop: FaceCrop,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResponse {
    pub ticket: RequestTicket,
    pub outcome: ClassificationOutcome,
}
