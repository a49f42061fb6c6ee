use std::time::Duration;

use chrono::SecondsFormat;
use serde::Serialize;
use thiserror::Error;

use super::prediction_ledger::PredictionLedger;
use super::prediction_record::{PredictionRecord, SessionInfo};

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("submission request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected the batch with status {status}")]
    Rejected { status: u16 },
}

#[derive(Serialize)]
struct SessionBatch<'a> {
    #[serde(flatten)]
    session: &'a SessionInfo,
    #[serde(rename = "MonitoringRecord")]
    records: Vec<SessionRecord<'a>>,
}

/// A record as the session endpoint binds it. Its keys differ from the
/// bare-array shape.
#[derive(Serialize)]
struct SessionRecord<'a> {
    #[serde(rename = "monitoring_records_id")]
    sequence_id: u64,
    #[serde(rename = "nim")]
    subject: &'a str,
    #[serde(rename = "ekspresi")]
    expression: &'a str,
    gender: &'a str,
    #[serde(rename = "ketertarikan")]
    focus_state: &'a str,
    #[serde(rename = "waktu_tercatat")]
    captured_at: String,
}

impl<'a> From<&'a PredictionRecord> for SessionRecord<'a> {
    fn from(record: &'a PredictionRecord) -> Self {
        Self {
            sequence_id: record.sequence_id,
            subject: &record.subject,
            expression: &record.expression,
            gender: record.gender.as_deref().unwrap_or_default(),
            focus_state: &record.focus_state,
            captured_at: record.captured_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Posts the ledger to the bulk submission endpoint.
pub struct SubmissionClient {
    client: reqwest::blocking::Client,
    url: String,
    session: Option<SessionInfo>,
}

impl SubmissionClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SubmissionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            session: None,
        })
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    /// Sends the current contents of `ledger`. On HTTP 200 exactly the sent
    /// records are acknowledged; anything appended meanwhile stays queued.
    /// Returns the number of records submitted.
    pub fn submit_ledger(&self, ledger: &PredictionLedger) -> Result<usize, SubmissionError> {
        let records = ledger.snapshot();
        let Some(last) = records.last().map(|r| r.sequence_id) else {
            log::info!("Nothing to submit");
            return Ok(0);
        };

        let request = self.client.post(&self.url);
        let request = match &self.session {
            Some(session) => request.json(&SessionBatch {
                session,
                records: records.iter().map(SessionRecord::from).collect(),
            }),
            None => request.json(&records),
        };

        let response = request.send()?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
            });
        }

        ledger.acknowledge_through(last);
        log::info!("Submitted {} predictions to {}", records.len(), self.url);
        Ok(records.len())
    }
}
