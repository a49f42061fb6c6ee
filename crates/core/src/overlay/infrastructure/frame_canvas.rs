use image::{Rgb, RgbImage};

use super::bitmap_font;
use crate::overlay::domain::surface::{Color, Surface};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

const TEXT_SCALE: i32 = 2;

/// Rasterising surface over a copy of a video frame. `clear` restores the
/// original pixels.
pub struct FrameCanvas {
    base: RgbImage,
    canvas: RgbImage,
}

impl FrameCanvas {
    pub fn new(frame: &Frame) -> Result<Self, Box<dyn std::error::Error>> {
        if frame.channels() != 3 {
            return Err(format!("cannot draw on a {}-channel frame", frame.channels()).into());
        }
        let base = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("Failed to create image from frame data")?;
        Ok(Self {
            canvas: base.clone(),
            base,
        })
    }

    pub fn image(&self) -> &RgbImage {
        &self.canvas
    }

    pub fn into_image(self) -> RgbImage {
        self.canvas
    }

    fn put(&mut self, x: i64, y: i64, color: Color) {
        if x >= 0 && y >= 0 && x < self.canvas.width() as i64 && y < self.canvas.height() as i64 {
            self.canvas.put_pixel(x as u32, y as u32, Rgb(color.to_array()));
        }
    }
}

impl Surface for FrameCanvas {
    fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn clear(&mut self) {
        self.canvas.clone_from(&self.base);
    }

    fn stroke_rect(&mut self, bbox: &BoundingBox, color: Color, thickness: u32) {
        let x1 = bbox.x.floor() as i64;
        let y1 = bbox.y.floor() as i64;
        let x2 = bbox.right().ceil() as i64 - 1;
        let y2 = bbox.bottom().ceil() as i64 - 1;

        for t in 0..thickness.max(1) as i64 {
            for x in x1..=x2 {
                self.put(x, y1 + t, color);
                self.put(x, y2 - t, color);
            }
            for y in y1..=y2 {
                self.put(x1 + t, y, color);
                self.put(x2 - t, y, color);
            }
        }
    }

    fn fill_text(&mut self, x: f64, y: f64, text: &str, color: Color) {
        bitmap_font::draw_text(
            &mut self.canvas,
            x.round() as i32,
            y.round() as i32,
            text,
            TEXT_SCALE,
            color.to_array(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![40u8; (w * h * 3) as usize], w, h, 3, 0)
    }

    #[test]
    fn test_stroke_rect_draws_border_only() {
        let mut canvas = FrameCanvas::new(&gray_frame(20, 20)).unwrap();
        canvas.stroke_rect(&BoundingBox::new(2.0, 2.0, 10.0, 10.0), Color::GREEN, 1);

        let img = canvas.image();
        assert_eq!(img.get_pixel(2, 2).0, Color::GREEN.to_array());
        assert_eq!(img.get_pixel(11, 11).0, Color::GREEN.to_array());
        assert_eq!(img.get_pixel(6, 6).0, [40, 40, 40]);
        assert_eq!(img.get_pixel(12, 12).0, [40, 40, 40]);
    }

    #[test]
    fn test_clear_restores_frame() {
        let mut canvas = FrameCanvas::new(&gray_frame(30, 20)).unwrap();
        canvas.stroke_rect(&BoundingBox::new(0.0, 0.0, 30.0, 20.0), Color::AMBER, 3);
        canvas.fill_text(2.0, 2.0, "FPS 9", Color::WHITE);
        canvas.clear();
        assert!(canvas.image().pixels().all(|p| p.0 == [40, 40, 40]));
    }

    #[test]
    fn test_out_of_bounds_drawing_is_clipped() {
        let mut canvas = FrameCanvas::new(&gray_frame(10, 10)).unwrap();
        canvas.stroke_rect(&BoundingBox::new(-5.0, -5.0, 30.0, 30.0), Color::CYAN, 2);
        canvas.fill_text(8.0, 8.0, "pending", Color::WHITE);
        assert_eq!(canvas.size(), (10, 10));
    }

    #[test]
    fn test_rejects_non_rgb_frame() {
        let frame = Frame::new(vec![0u8; 4], 2, 2, 1, 0);
        assert!(FrameCanvas::new(&frame).is_err());
    }
}
