#[cfg(feature = "camera")]
pub mod camera_source;
pub mod image_sequence_source;
pub mod video_file_source;
