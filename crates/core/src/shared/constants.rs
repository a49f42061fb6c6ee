pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const EXPRESSION_MODEL_NAME: &str = "emotion-ferplus-8.onnx";
pub const GENDER_AGE_MODEL_NAME: &str = "genderage.onnx";
pub const DESCRIPTOR_MODEL_NAME: &str = "w600k_r50.onnx";

/// Consecutive unmatched frames a region tolerates before it expires.
pub const DEFAULT_GRACE_FRAMES: u32 = 5;

/// Frames an expired region's id stays reserved for its own location.
pub const DEFAULT_TOMBSTONE_FRAMES: u32 = 30;

/// IoU spread inside which candidate matches are ordered by descriptor similarity.
pub const DEFAULT_DESCRIPTOR_TIE_WINDOW: f64 = 0.02;

pub const UNKNOWN_SUBJECT: &str = "unknown";
pub const PENDING_LABEL: &str = "pending";

pub const DEFAULT_CLASSIFY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CLASSIFY_WORKERS: usize = 4;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const APP_DIR_NAME: &str = "ClassWatch";
