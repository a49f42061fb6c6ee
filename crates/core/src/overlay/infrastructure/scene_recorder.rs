use crate::fusion::tracked_region::TrackedRegion;
use crate::overlay::domain::frame_presenter::FramePresenter;
use crate::overlay::domain::overlay_renderer::render;
use crate::overlay::domain::surface::{Color, Surface};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Clear,
    Rect {
        bbox: BoundingBox,
        color: Color,
        thickness: u32,
    },
    Text {
        x: f64,
        y: f64,
        text: String,
        color: Color,
    },
}

/// Surface that keeps the draw commands of the current scene.
/// `clear` starts a new scene.
#[derive(Clone, Debug, Default)]
pub struct SceneRecorder {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
}

impl SceneRecorder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn texts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn rects(&self) -> Vec<(BoundingBox, Color)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Rect { bbox, color, .. } => Some((*bbox, *color)),
                _ => None,
            })
            .collect()
    }
}

impl Surface for SceneRecorder {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.commands.clear();
        self.commands.push(DrawCommand::Clear);
    }

    fn stroke_rect(&mut self, bbox: &BoundingBox, color: Color, thickness: u32) {
        self.commands.push(DrawCommand::Rect {
            bbox: *bbox,
            color,
            thickness,
        });
    }

    fn fill_text(&mut self, x: f64, y: f64, text: &str, color: Color) {
        self.commands.push(DrawCommand::Text {
            x,
            y,
            text: text.to_string(),
            color,
        });
    }
}

/// Presenter that renders each frame into a [`SceneRecorder`] and keeps the
/// texts of every scene, keyed by frame index.
#[derive(Debug, Default)]
pub struct ScenePresenter {
    scenes: Vec<(u64, Vec<String>)>,
}

impl ScenePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scenes(&self) -> &[(u64, Vec<String>)] {
        &self.scenes
    }

    pub fn texts_for(&self, frame_index: u64) -> Option<&[String]> {
        self.scenes
            .iter()
            .find(|(i, _)| *i == frame_index)
            .map(|(_, texts)| texts.as_slice())
    }
}

impl FramePresenter for ScenePresenter {
    fn present(
        &mut self,
        frame: &Frame,
        regions: &[TrackedRegion],
        fps: Option<f64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = SceneRecorder::new(frame.width(), frame.height());
        render(&mut scene, regions, fps);
        let texts = scene.texts().into_iter().map(str::to_string).collect();
        self.scenes.push((frame.index(), texts));
        Ok(())
    }
}
