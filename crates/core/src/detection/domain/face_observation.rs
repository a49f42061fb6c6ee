use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::bounding_box::BoundingBox;

/// Facial expression labels, in declared order.
///
/// The declaration order is the tie-break order for the dominant expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-expression probabilities from independent heads; they need not sum to 1.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionScores(BTreeMap<Expression, f64>);

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Expression, f64)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn set(&mut self, expression: Expression, score: f64) {
        self.0.insert(expression, score);
    }

    pub fn get(&self, expression: Expression) -> Option<f64> {
        self.0.get(&expression).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f64)> + '_ {
        self.0.iter().map(|(e, s)| (*e, *s))
    }

    /// Argmax entry; on equal scores the first-declared expression wins.
    pub fn dominant(&self) -> Option<(Expression, f64)> {
        let mut best: Option<(Expression, f64)> = None;
        for (expression, score) in self.iter() {
            if !score.is_finite() {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((expression, score)),
            }
        }
        best
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenderEstimate {
    pub gender: Gender,
    pub probability: f64,
}

/// Head rotation in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// One detected face in one frame. Created fresh every detection cycle and
/// never mutated afterwards; attributes from disabled sub-models are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub score: f64,
    #[serde(default)]
    pub landmarks: Vec<(f64, f64)>,
    #[serde(default)]
    pub expressions: ExpressionScores,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub gender: Option<GenderEstimate>,
    #[serde(default)]
    pub pose: Option<HeadPose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Vec<f32>>,
}

impl FaceObservation {
    pub fn new(bbox: BoundingBox, score: f64) -> Self {
        Self {
            bbox,
            score,
            landmarks: Vec::new(),
            expressions: ExpressionScores::new(),
            age: None,
            gender: None,
            pose: None,
            descriptor: None,
        }
    }

    pub fn with_expressions(mut self, expressions: ExpressionScores) -> Self {
        self.expressions = expressions;
        self
    }

    pub fn with_descriptor(mut self, descriptor: Vec<f32>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn dominant_expression(&self) -> Option<(Expression, f64)> {
        self.expressions.dominant()
    }
}
