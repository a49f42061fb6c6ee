use super::surface::{Color, Surface};
use crate::fusion::tracked_region::TrackedRegion;
use crate::shared::constants::PENDING_LABEL;

/// Vertical distance between stacked label lines.
pub const LINE_HEIGHT: f64 = 12.0;

const BOX_THICKNESS: u32 = 2;
const MARGIN: f64 = 4.0;

/// Attribute lines drawn above a region's box, top to bottom.
pub fn attribute_lines(region: &TrackedRegion) -> Vec<String> {
    let observation = region.last_observation();
    let mut lines = Vec::new();
    if let Some(g) = observation.gender {
        lines.push(format!("{} {:.0}%", g.gender, g.probability * 100.0));
    }
    if let Some((expression, score)) = observation.dominant_expression() {
        lines.push(format!("{expression} {score:.2}"));
    }
    if let Some(age) = observation.age {
        lines.push(format!("age {age:.0}"));
    }
    if let Some(pose) = observation.pose {
        lines.push(format!(
            "yaw {:.0} pitch {:.0} roll {:.0}",
            pose.yaw, pose.pitch, pose.roll
        ));
    }
    lines
}

/// Line drawn below a region's box: the remote verdict, or `pending`.
pub fn classification_line(region: &TrackedRegion) -> String {
    match region.last_classification() {
        Some(c) => match &c.identity {
            Some(identity) => format!("{} [{identity}]", c.label),
            None => c.label.clone(),
        },
        None => PENDING_LABEL.to_string(),
    }
}

/// Redraws the whole overlay from the current region set.
///
/// Pure with respect to engine state: reads regions, writes only to `surface`.
pub fn render<S: Surface + ?Sized>(surface: &mut S, regions: &[TrackedRegion], fps: Option<f64>) {
    surface.clear();

    if let Some(fps) = fps {
        surface.fill_text(MARGIN, MARGIN, &format!("FPS {fps:.1}"), Color::WHITE);
    }

    for region in regions {
        let bbox = region.last_box();
        let color = if region.is_stale() {
            Color::AMBER
        } else {
            Color::GREEN
        };
        surface.stroke_rect(bbox, color, BOX_THICKNESS);

        let lines = attribute_lines(region);
        let top = bbox.y - MARGIN - LINE_HEIGHT * lines.len() as f64;
        for (i, line) in lines.iter().enumerate() {
            let y = (top + LINE_HEIGHT * i as f64).max(0.0);
            surface.fill_text(bbox.x, y, line, color);
        }

        surface.fill_text(
            bbox.x,
            bbox.bottom() + MARGIN,
            &classification_line(region),
            Color::CYAN,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::domain::classification::{
        Classification, ClassificationOutcome, ClassificationResponse,
    };
    use crate::detection::domain::face_observation::{
        Expression, ExpressionScores, FaceObservation, Gender, GenderEstimate, HeadPose,
    };
    use crate::fusion::fusion_engine::{FusionConfig, FusionEngine};
    use crate::ledger::prediction_ledger::PredictionLedger;
    use crate::overlay::infrastructure::scene_recorder::{DrawCommand, SceneRecorder};
    use crate::shared::bounding_box::BoundingBox;

    fn full_observation() -> FaceObservation {
        let mut o = FaceObservation::new(BoundingBox::new(50.0, 60.0, 80.0, 80.0), 0.9)
            .with_expressions(ExpressionScores::from_pairs([
                (Expression::Happy, 0.82),
                (Expression::Neutral, 0.1),
            ]));
        o.age = Some(21.4);
        o.gender = Some(GenderEstimate {
            gender: Gender::Male,
            probability: 0.91,
        });
        o.pose = Some(HeadPose {
            roll: 2.0,
            pitch: -4.2,
            yaw: 12.6,
        });
        o
    }

    fn engine_with(observation: FaceObservation) -> FusionEngine {
        let mut engine = FusionEngine::new(FusionConfig::default(), PredictionLedger::new());
        engine.observe(1, &[observation]);
        engine
    }

    #[test]
    fn test_draws_everything_known() {
        let engine = engine_with(full_observation());
        let mut scene = SceneRecorder::new(640, 480);
        render(&mut scene, engine.regions(), Some(24.56));

        assert_eq!(scene.commands()[0], DrawCommand::Clear);
        assert_eq!(
            scene.texts(),
            vec![
                "FPS 24.6",
                "male 91%",
                "happy 0.82",
                "age 21",
                "yaw 13 pitch -4 roll 2",
                "pending",
            ]
        );
        assert_eq!(scene.rects().len(), 1);
        assert_eq!(scene.rects()[0].1, Color::GREEN);
    }

    #[test]
    fn test_absent_attributes_are_skipped() {
        let engine = engine_with(FaceObservation::new(BoundingBox::new(5.0, 5.0, 40.0, 40.0), 0.7));
        let mut scene = SceneRecorder::new(100, 100);
        render(&mut scene, engine.regions(), None);

        assert_eq!(scene.texts(), vec!["pending"]);
    }

    #[test]
    fn test_classification_and_identity_shown() {
        let mut engine = FusionEngine::new(FusionConfig::default(), PredictionLedger::new());
        let request = engine.observe(1, &[full_observation()]).requests[0];
        engine.apply_response(
            ClassificationResponse {
                ticket: request.ticket,
                outcome: ClassificationOutcome::Classified(
                    Classification::new("focused").with_identity("2101"),
                ),
            },
            2,
        );

        let mut scene = SceneRecorder::new(640, 480);
        render(&mut scene, engine.regions(), None);
        assert_eq!(scene.texts().last().unwrap(), "focused [2101]");
    }

    #[test]
    fn test_stale_region_uses_stale_colour() {
        let mut engine = engine_with(full_observation());
        engine.observe(2, &[]);

        let mut scene = SceneRecorder::new(640, 480);
        render(&mut scene, engine.regions(), None);
        assert_eq!(scene.rects()[0].1, Color::AMBER);
    }

    #[test]
    fn test_render_starts_from_clean_surface() {
        let engine = engine_with(full_observation());
        let mut scene = SceneRecorder::new(640, 480);
        render(&mut scene, engine.regions(), None);
        render(&mut scene, &[], None);
        assert!(scene.texts().is_empty());
    }

    #[test]
    fn test_labels_near_top_edge_stay_on_surface() {
        let mut o = full_observation();
        o.bbox = BoundingBox::new(10.0, 2.0, 50.0, 50.0);
        let engine = engine_with(o);
        let mut scene = SceneRecorder::new(640, 480);
        render(&mut scene, engine.regions(), None);

        for command in scene.commands() {
            if let DrawCommand::Text { y, .. } = command {
                assert!(*y >= 0.0);
            }
        }
    }
}
