use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use crate::shared::frame::Frame;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError};

/// Live webcam via nokhwa.
///
/// Frames are captured on demand; only the frame just captured is held.
/// `release` stops the stream explicitly before the camera is dropped.
pub struct CameraSource {
    device: u32,
    camera: Option<Camera>,
    frame_index: u64,
}

impl CameraSource {
    pub fn open(device: u32) -> Result<Self, FrameSourceError> {
        let acquisition = |e: nokhwa::NokhwaError| FrameSourceError::CameraAcquisition {
            device: device.to_string(),
            reason: e.to_string(),
        };

        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(device), requested).map_err(acquisition)?;
        camera.open_stream().map_err(acquisition)?;

        let resolution = camera.resolution();
        log::info!(
            "Opened camera {device} ({}x{})",
            resolution.width(),
            resolution.height()
        );
        Ok(Self {
            device,
            camera: Some(camera),
            frame_index: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let camera = self.camera.as_mut().ok_or(FrameSourceError::NotOpened)?;
        let index = self.frame_index;
        let decode_err = |e: nokhwa::NokhwaError| FrameSourceError::Decode {
            index,
            reason: e.to_string(),
        };

        let buffer = camera.frame().map_err(decode_err)?;
        let rgb = buffer.decode_image::<RgbFormat>().map_err(decode_err)?;
        let (width, height) = rgb.dimensions();
        self.frame_index += 1;
        Ok(Some(Frame::new(rgb.into_raw(), width, height, 3, index)))
    }

    fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                log::warn!("Failed to stop camera {}: {e}", self.device);
            }
        }
    }

    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}
