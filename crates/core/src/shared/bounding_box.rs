use serde::{Deserialize, Serialize};

/// Default overlap threshold for treating two boxes as the same face.
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.3;

/// Axis-aligned rectangle in frame pixel coordinates.
///
/// A valid box has finite coordinates and strictly positive width and height;
/// [`BoundingBox::is_valid`] is checked at the detection boundary so every
/// box that reaches fusion satisfies it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from corner coordinates `(x1, y1, x2, y2)`.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Grows the box by `fraction` of its size on every side.
    pub fn padded(&self, fraction: f64) -> BoundingBox {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        BoundingBox::new(
            self.x - dx,
            self.y - dy,
            self.width + 2.0 * dx,
            self.height + 2.0 * dy,
        )
    }

    /// Intersects the box with the `frame_w` × `frame_h` frame.
    ///
    /// Returns `None` when nothing of the box remains visible.
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Option<BoundingBox> {
        let x1 = self.x.max(0.0);
        let y1 = self.y.max(0.0);
        let x2 = self.right().min(frame_w as f64);
        let y2 = self.bottom().min(frame_h as f64);
        let clamped = BoundingBox::from_corners(x1, y1, x2, y2);
        clamped.is_valid().then_some(clamped)
    }

    /// Integer pixel rectangle `(x, y, w, h)` fully inside the frame, or
    /// `None` if the clamped box is smaller than one pixel.
    pub fn pixel_rect(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let clamped = self.clamp_to(frame_w, frame_h)?;
        let x = clamped.x.floor() as u32;
        let y = clamped.y.floor() as u32;
        let x2 = (clamped.right().ceil() as u32).min(frame_w);
        let y2 = (clamped.bottom().ceil() as u32).min(frame_h);
        if x2 <= x || y2 <= y {
            return None;
        }
        Some((x, y, x2 - x, y2 - y))
    }
}
