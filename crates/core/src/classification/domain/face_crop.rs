use std::io::Cursor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("box {0:?} lies outside the frame")]
    OutOfFrame(BoundingBox),
    #[error("unsupported frame layout: {0} channels")]
    Channels(u8),
    #[error("failed to encode crop: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropFormat {
    #[default]
    Png,
    Jpeg,
}

impl CropFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            CropFormat::Png => "image/png",
            CropFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            CropFormat::Png => "snapshot.png",
            CropFormat::Jpeg => "snapshot.jpg",
        }
    }

    fn image_format(&self) -> image::ImageFormat {
        match self {
            CropFormat::Png => image::ImageFormat::Png,
            CropFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// An encoded image of one face, cut from a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceCrop {
    bytes: Vec<u8>,
    format: CropFormat,
    width: u32,
    height: u32,
}

impl FaceCrop {
    /// Cuts `bbox`, grown by `padding` of its size on every side and clamped
    /// to the frame, and encodes it.
    pub fn from_frame(
        frame: &Frame,
        bbox: &BoundingBox,
        format: CropFormat,
        padding: f64,
    ) -> Result<Self, CropError> {
        if frame.channels() != 3 {
            return Err(CropError::Channels(frame.channels()));
        }
        let (x, y, w, h) = bbox
            .padded(padding.max(0.0))
            .pixel_rect(frame.width(), frame.height())
            .ok_or(CropError::OutOfFrame(*bbox))?;

        let pixels = frame.copy_rect(x, y, w, h);
        let img = image::RgbImage::from_raw(w, h, pixels).ok_or(CropError::OutOfFrame(*bbox))?;

        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format.image_format())?;
        Ok(Self {
            bytes,
            format,
            width: w,
            height: h,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> CropFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
