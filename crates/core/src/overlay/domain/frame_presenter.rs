use crate::fusion::tracked_region::TrackedRegion;
use crate::shared::frame::Frame;

/// Final stage of a monitoring cycle: shows the frame with its overlay.
///
/// Called on the loop thread after fusion; must not wait on the network.
pub trait FramePresenter {
    fn present(
        &mut self,
        frame: &Frame,
        regions: &[TrackedRegion],
        fps: Option<f64>,
    ) -> Result<(), Box<dyn std::error::Error>>;
}

/// Presenter for headless runs.
pub struct NullPresenter;

impl FramePresenter for NullPresenter {
    fn present(
        &mut self,
        _frame: &Frame,
        _regions: &[TrackedRegion],
        _fps: Option<f64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }
}
