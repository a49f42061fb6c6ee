use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use serde_json::Value;
use thiserror::Error;

use crate::classification::domain::classification::{Classification, ClassificationOutcome};
use crate::classification::domain::classifier::Classifier;
use crate::classification::domain::face_crop::FaceCrop;
use crate::classification::domain::response_shape::{parse_identity, parse_prediction};

/// Multipart field the service reads the image from.
const IMAGE_FIELD: &str = "frame";

#[derive(Error, Debug)]
enum CallError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("service answered {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid response body: {0}")]
    Body(#[source] reqwest::Error),
}

impl CallError {
    fn transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CallError::Timeout
        } else {
            CallError::Transport(e)
        }
    }

    fn body(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CallError::Timeout
        } else {
            CallError::Body(e)
        }
    }
}

/// Classifies crops against the prediction endpoint and, when configured,
/// the identification endpoint. One round trip per endpoint, no retries.
pub struct HttpClassificationClient {
    client: reqwest::blocking::Client,
    predict_url: String,
    identify_url: Option<String>,
}

impl HttpClassificationClient {
    pub fn new(
        predict_url: impl Into<String>,
        identify_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            predict_url: predict_url.into(),
            identify_url,
        })
    }

    fn post_crop(&self, url: &str, crop: &FaceCrop) -> Result<Value, CallError> {
        let part = Part::bytes(crop.bytes().to_vec())
            .file_name(crop.format().file_name())
            .mime_str(crop.format().mime())
            .map_err(CallError::Transport)?;
        let form = Form::new().part(IMAGE_FIELD, part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(CallError::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Status(status));
        }
        response.json::<Value>().map_err(CallError::body)
    }
}

impl Classifier for HttpClassificationClient {
    fn classify(&self, crop: &FaceCrop) -> ClassificationOutcome {
        let body = match self.post_crop(&self.predict_url, crop) {
            Ok(body) => body,
            Err(CallError::Timeout) => {
                log::warn!("Classification timed out ({})", self.predict_url);
                return ClassificationOutcome::TimedOut;
            }
            Err(e) => {
                log::warn!("Classification failed: {e}");
                return ClassificationOutcome::Failed(e.to_string());
            }
        };

        let (label, confidence) = match parse_prediction(&body) {
            Ok(prediction) => prediction,
            Err(e) => {
                log::warn!("Unusable classification response: {e}");
                return ClassificationOutcome::Failed(e.to_string());
            }
        };

        let mut classification = Classification {
            label,
            identity: None,
            confidence,
        };

        if let Some(url) = &self.identify_url {
            match self.post_crop(url, crop) {
                Ok(body) => {
                    if let Some((identity, identity_confidence)) = parse_identity(&body) {
                        classification.identity = Some(identity);
                        classification.confidence =
                            classification.confidence.or(identity_confidence);
                    }
                }
                Err(e) => log::debug!("Identification unavailable: {e}"),
            }
        }

        ClassificationOutcome::Classified(classification)
    }
}
