use std::fs;
use std::path::{Path, PathBuf};

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError};

/// Plays a directory of still images, in file-name order, as a video.
///
/// Frames are decoded lazily, one per `next_frame` call.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Option<Vec<PathBuf>>,
    position: usize,
    fps: Option<f64>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FrameSourceError> {
        let dir = dir.as_ref().to_path_buf();
        let open_err = |reason: String| FrameSourceError::Open {
            path: dir.clone(),
            reason,
        };

        let entries = fs::read_dir(&dir).map_err(|e| open_err(e.to_string()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        if files.is_empty() {
            return Err(open_err("no image files".to_string()));
        }
        files.sort();

        log::info!("Opened image sequence {} ({} frames)", dir.display(), files.len());
        Ok(Self {
            dir,
            files: Some(files),
            position: 0,
            fps: None,
        })
    }

    /// Stamps frames with presentation times at `fps`.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = (fps > 0.0).then_some(fps);
        self
    }

    pub fn len(&self) -> usize {
        self.files.as_ref().map_or(0, |f| f.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let files = self.files.as_ref().ok_or(FrameSourceError::NotOpened)?;
        let Some(path) = files.get(self.position) else {
            return Ok(None);
        };

        let index = self.position as u64;
        let rgb = image::open(path)
            .map_err(|e| FrameSourceError::Decode {
                index,
                reason: format!("{}: {e}", path.display()),
            })?
            .to_rgb8();
        self.position += 1;

        let (width, height) = rgb.dimensions();
        let mut frame = Frame::new(rgb.into_raw(), width, height, 3, index);
        if let Some(fps) = self.fps {
            frame = frame.with_timestamp(index as f64 / fps * 1000.0);
        }
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.files = None;
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }
}
