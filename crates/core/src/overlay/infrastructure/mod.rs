pub mod annotated_frame_presenter;
mod bitmap_font;
pub mod frame_canvas;
pub mod scene_recorder;
