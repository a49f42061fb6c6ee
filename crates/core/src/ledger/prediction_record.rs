use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::constants::UNKNOWN_SUBJECT;

/// One finalized observation of a subject: who, how they looked and whether
/// they were focused, at a point in time.
///
/// Serialises with the backend's read-side record keys. Session batches use
/// their own keys, see the submission client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Ledger sequence id. Assigned by [`super::prediction_ledger::PredictionLedger::append`].
    #[serde(rename = "id")]
    pub sequence_id: u64,
    #[serde(rename = "userId")]
    pub subject: String,
    pub expression: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(rename = "focus")]
    pub focus_state: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(rename = "time")]
    pub captured_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// A record captured now for `subject`, or for an unknown subject when `None`.
    pub fn new(
        subject: Option<&str>,
        expression: impl Into<String>,
        focus_state: impl Into<String>,
    ) -> Self {
        Self {
            sequence_id: 0,
            subject: subject.unwrap_or(UNKNOWN_SUBJECT).to_string(),
            expression: expression.into(),
            gender: None,
            focus_state: focus_state.into(),
            confidence: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }
}

/// Class session the batch belongs to. When present the batch is wrapped in
/// the backend's session envelope instead of being sent as a bare array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "dosen_id")]
    pub lecturer_id: i64,
    #[serde(rename = "mataKuliah_id")]
    pub course_id: i64,
    pub session_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 8, 30, 0).unwrap();
        let mut record = PredictionRecord::new(Some("2101"), "happy", "focused")
            .with_gender("female")
            .with_confidence(Some(0.8))
            .with_captured_at(at);
        record.sequence_id = 3;

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "id": 3,
                "userId": "2101",
                "expression": "happy",
                "gender": "female",
                "focus": "focused",
                "confidence": 0.8,
                "time": "2024-05-06T08:30:00Z"
            })
        );
    }

    #[test]
    fn test_missing_subject_is_unknown() {
        let record = PredictionRecord::new(None, "neutral", "distracted");
        assert_eq!(record.subject, "unknown");
        assert!(record.gender.is_none());
    }

    #[test]
    fn test_session_info_field_names() {
        let info = SessionInfo {
            lecturer_id: 4,
            course_id: 12,
            session_date: Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["dosen_id"], 4);
        assert_eq!(value["mataKuliah_id"], 12);
        assert_eq!(value["session_date"], "2024-05-06T00:00:00Z");
    }
}
