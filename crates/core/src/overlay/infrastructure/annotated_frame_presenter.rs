use std::path::{Path, PathBuf};

use super::frame_canvas::FrameCanvas;
use crate::fusion::tracked_region::TrackedRegion;
use crate::overlay::domain::frame_presenter::FramePresenter;
use crate::overlay::domain::overlay_renderer::render;
use crate::shared::frame::Frame;

/// Burns the overlay into every `every`-th frame and saves it as PNG.
pub struct AnnotatedFramePresenter {
    dir: PathBuf,
    every: u64,
    presented: u64,
    written: usize,
}

impl AnnotatedFramePresenter {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            dir: dir.into(),
            every: every.max(1),
            presented: 0,
            written: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn path_for(&self, frame: &Frame) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", frame.index()))
    }
}

impl FramePresenter for AnnotatedFramePresenter {
    fn present(
        &mut self,
        frame: &Frame,
        regions: &[TrackedRegion],
        fps: Option<f64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let due = self.presented % self.every == 0;
        self.presented += 1;
        if !due {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)?;
        let mut canvas = FrameCanvas::new(frame)?;
        render(&mut canvas, regions, fps);
        canvas.into_image().save(self.path_for(frame))?;
        self.written += 1;
        Ok(())
    }
}
