//! Normalisation of the classification service's loosely shaped responses.
//!
//! The prediction endpoint has answered with a single object or with an
//! array of objects, under several field names for the label and the
//! confidence. Everything is reduced to `(label, confidence)` here so the
//! fusion engine only ever sees one shape.

use serde_json::Value;
use thiserror::Error;

use crate::shared::constants::UNKNOWN_SUBJECT;

const LABEL_KEYS: &[&str] = &["class", "label", "expression_predicted_class", "expression", "focus"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "score", "probability"];
const IDENTITY_KEYS: &[&str] = &["user_id", "userId", "id"];

#[derive(Error, Debug, PartialEq)]
pub enum ShapeError {
    #[error("empty response array")]
    Empty,
    #[error("response is not an object")]
    NotAnObject,
    #[error("service reported an error: {0}")]
    Service(String),
    #[error("no label field in response")]
    MissingLabel,
}

/// First element of an array, or the value itself.
fn primary(body: &Value) -> Result<&Value, ShapeError> {
    let value = match body {
        Value::Array(items) => items.first().ok_or(ShapeError::Empty)?,
        other => other,
    };
    if value.is_object() {
        Ok(value)
    } else {
        Err(ShapeError::NotAnObject)
    }
}

/// Text of a string or number field. Integral numbers print without a fraction.
fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        _ => None,
    })
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
    .filter(|c| c.is_finite())
}

/// `(label, confidence)` from a prediction response.
pub fn parse_prediction(body: &Value) -> Result<(String, Option<f64>), ShapeError> {
    let value = primary(body)?;
    let Some(label) = text_field(value, LABEL_KEYS) else {
        if let Some(message) = text_field(value, &["error"]) {
            return Err(ShapeError::Service(message));
        }
        return Err(ShapeError::MissingLabel);
    };
    Ok((label, number_field(value, CONFIDENCE_KEYS)))
}

/// `(identity, confidence)` from an identification response, or `None` when
/// the subject is unknown or the response carries no identity.
pub fn parse_identity(body: &Value) -> Option<(String, Option<f64>)> {
    let value = primary(body).ok()?;
    let identity = text_field(value, IDENTITY_KEYS)?;
    if identity.eq_ignore_ascii_case(UNKNOWN_SUBJECT) {
        return None;
    }
    Some((identity, number_field(value, CONFIDENCE_KEYS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::object(json!({"class": "focused", "confidence": 0.8}), "focused", Some(0.8))]
    #[case::array(json!([{"class": "distracted", "confidence": 0.6}, {"class": "focused"}]), "distracted", Some(0.6))]
    #[case::label_key(json!({"label": "focused", "score": 0.5}), "focused", Some(0.5))]
    #[case::expression_key(json!({"expression_predicted_class": "bored"}), "bored", None)]
    #[case::numeric_class(json!({"class": 1.0, "confidence": 0.9}), "1", Some(0.9))]
    #[case::string_confidence(json!({"focus": "focused", "probability": "0.75"}), "focused", Some(0.75))]
    fn test_parse_prediction_shapes(
        #[case] body: Value,
        #[case] label: &str,
        #[case] confidence: Option<f64>,
    ) {
        assert_eq!(parse_prediction(&body).unwrap(), (label.to_string(), confidence));
    }

    #[test]
    fn test_label_key_precedence() {
        let body = json!({"focus": "b", "class": "a"});
        assert_eq!(parse_prediction(&body).unwrap().0, "a");
    }

    #[rstest]
    #[case::empty_array(json!([]), ShapeError::Empty)]
    #[case::scalar(json!("focused"), ShapeError::NotAnObject)]
    #[case::missing(json!({"confidence": 0.4}), ShapeError::MissingLabel)]
    #[case::blank(json!({"class": "  "}), ShapeError::MissingLabel)]
    #[case::service_error(json!({"error": "model crashed"}), ShapeError::Service("model crashed".into()))]
    fn test_parse_prediction_rejects(#[case] body: Value, #[case] expected: ShapeError) {
        assert_eq!(parse_prediction(&body).unwrap_err(), expected);
    }

    #[test]
    fn test_parse_identity() {
        let body = json!({"user_id": "2101", "confidence": 42.5});
        assert_eq!(
            parse_identity(&body),
            Some(("2101".to_string(), Some(42.5)))
        );
    }

    #[test]
    fn test_parse_identity_numeric_id() {
        assert_eq!(parse_identity(&json!({"id": 7})).unwrap().0, "7");
    }

    #[rstest]
    #[case(json!({"user_id": "unknown"}))]
    #[case(json!({"user_id": "Unknown", "confidence": 10.0}))]
    #[case(json!({"message": "No faces detected"}))]
    #[case(json!([]))]
    fn test_parse_identity_unknown(#[case] body: Value) {
        assert!(parse_identity(&body).is_none());
    }
}
