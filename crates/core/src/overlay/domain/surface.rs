use crate::shared::bounding_box::BoundingBox;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const GREEN: Color = Color::rgb(40, 220, 90);
    pub const AMBER: Color = Color::rgb(255, 176, 0);
    pub const CYAN: Color = Color::rgb(0, 200, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

/// Something overlays can be drawn on. Coordinates are frame pixels; text is
/// positioned by its top-left corner. Drawing outside the surface is clipped.
pub trait Surface {
    fn size(&self) -> (u32, u32);

    /// Wipes every previous drawing.
    fn clear(&mut self);

    fn stroke_rect(&mut self, bbox: &BoundingBox, color: Color, thickness: u32);

    fn fill_text(&mut self, x: f64, y: f64, text: &str, color: Color);
}
