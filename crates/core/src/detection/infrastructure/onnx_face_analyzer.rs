/// Face analysis on ONNX Runtime via `ort`.
///
/// A YOLO-pose detector finds faces and five keypoints; optional heads add
/// expression scores (FER+), gender and age (InsightFace genderage) and an
/// ArcFace appearance descriptor. Heads whose model file is absent are
/// skipped and their attributes stay unknown.
use std::path::{Path, PathBuf};

use ndarray::Array4;

use crate::detection::domain::detection_options::DetectionOptions;
use crate::detection::domain::face_analyzer::{FaceAnalyzer, ModelLoadError};
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::detection::domain::face_observation::{
    Expression, ExpressionScores, FaceObservation, Gender, GenderEstimate,
};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::{
    DESCRIPTOR_MODEL_NAME, EXPRESSION_MODEL_NAME, FACE_MODEL_NAME, GENDER_AGE_MODEL_NAME,
};
use crate::shared::frame::Frame;
use crate::shared::math::{l2_normalize, softmax};
use crate::shared::model_resolver::{model_cache_dir, ModelLocations};

/// Fallback detector input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

const NMS_IOU_THRESH: f64 = 0.45;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

const KEYPOINT_CONF_THRESH: f64 = 0.5;

const EXPRESSION_INPUT: usize = 64;
const GENDER_AGE_INPUT: usize = 96;
const DESCRIPTOR_INPUT: usize = 112;
const DESCRIPTOR_MEAN: f32 = 127.5;
const DESCRIPTOR_STD: f32 = 127.5;

/// FER+ output classes in model order, folded onto our labels.
/// Contempt has no label of its own and is merged into disgusted.
const FERPLUS_CLASSES: [Expression; 8] = [
    Expression::Neutral,
    Expression::Happy,
    Expression::Surprised,
    Expression::Sad,
    Expression::Angry,
    Expression::Disgusted,
    Expression::Fearful,
    Expression::Disgusted,
];

struct LoadedModels {
    detector: ort::session::Session,
    input_size: u32,
    expression: Option<ort::session::Session>,
    gender_age: Option<ort::session::Session>,
    descriptor: Option<ort::session::Session>,
}

pub struct OnnxFaceAnalyzer {
    cache_dir: Option<PathBuf>,
    download_base: Option<String>,
    models: Option<LoadedModels>,
}

impl OnnxFaceAnalyzer {
    /// `download_base`, when set, is where missing models are fetched from.
    pub fn new(download_base: Option<String>) -> Self {
        Self {
            cache_dir: None,
            download_base,
            models: None,
        }
    }

    /// Overrides the per-user model cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    fn locations(&self, dir: &Path) -> Result<ModelLocations, ModelLoadError> {
        let cache_dir = match &self.cache_dir {
            Some(d) => d.clone(),
            None => model_cache_dir().map_err(|e| ModelLoadError::new(dir, e))?,
        };
        Ok(ModelLocations {
            model_dir: Some(dir.to_path_buf()),
            cache_dir,
            download_base: self.download_base.clone(),
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn load_models(&mut self, dir: &Path) -> Result<(), ModelLoadError> {
        let locations = self.locations(dir)?;

        let detector_path = locations
            .resolve(FACE_MODEL_NAME, None)
            .map_err(|e| ModelLoadError::new(dir.join(FACE_MODEL_NAME), e))?;
        let detector = build_session(&detector_path)
            .map_err(|e| ModelLoadError::new(&detector_path, e.to_string()))?;
        let input_size = input_size(&detector);
        log::info!(
            "Loaded face detector {} (input {input_size}px)",
            detector_path.display()
        );

        let expression = load_optional(&locations, EXPRESSION_MODEL_NAME)?;
        let gender_age = load_optional(&locations, GENDER_AGE_MODEL_NAME)?;
        let descriptor = load_optional(&locations, DESCRIPTOR_MODEL_NAME)?;

        self.models = Some(LoadedModels {
            detector,
            input_size,
            expression,
            gender_age,
            descriptor,
        });
        Ok(())
    }

    fn analyze(
        &mut self,
        frame: &Frame,
        options: &DetectionOptions,
    ) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>> {
        let models = self.models.as_mut().ok_or("face models not loaded")?;

        let (input, scale, pad_x, pad_y) = letterbox(frame, models.input_size)?;
        let raw = {
            let input_value = ort::value::Tensor::from_array(input)?;
            let outputs = models.detector.run(ort::inputs![input_value])?;
            if outputs.len() == 0 {
                return Err("face detector produced no outputs".into());
            }
            let tensor = outputs[0].try_extract_array::<f32>()?;
            let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;
            parse_detections(
                data,
                tensor.shape(),
                options.min_confidence,
                scale,
                pad_x,
                pad_y,
            )?
        };

        let mut observations = Vec::new();
        for det in nms(raw, NMS_IOU_THRESH) {
            let mut obs = FaceObservation::new(det.bbox, det.confidence);
            if let Some(points) = det.keypoints {
                obs.pose = FaceLandmarks::new(points).head_pose();
                obs.landmarks = points.to_vec();
            }

            let Some((x, y, w, h)) = det.bbox.pixel_rect(frame.width(), frame.height()) else {
                observations.push(obs);
                continue;
            };
            let wants_heads = options.with_expressions
                || options.with_age_gender
                || options.with_descriptors;
            if wants_heads {
                let crop = frame.copy_rect(x, y, w, h);
                annotate(models, options, &mut obs, &crop, w, h);
            }
            observations.push(obs);
        }
        Ok(observations)
    }
}

/// Runs the enabled heads on one face crop. A failing head leaves its
/// attribute unknown instead of failing the frame.
fn annotate(
    models: &mut LoadedModels,
    options: &DetectionOptions,
    obs: &mut FaceObservation,
    crop: &[u8],
    w: u32,
    h: u32,
) {
    if options.with_expressions {
        if let Some(session) = models.expression.as_mut() {
            match run_head(session, expression_tensor(crop, w, h)) {
                Ok(logits) => obs.expressions = fold_ferplus(&logits),
                Err(e) => log::warn!("Expression head failed: {e}"),
            }
        }
    }
    if options.with_age_gender {
        if let Some(session) = models.gender_age.as_mut() {
            match run_head(session, gender_age_tensor(crop, w, h)) {
                Ok(out) => {
                    if let Some((age, gender)) = decode_gender_age(&out) {
                        obs.age = Some(age);
                        obs.gender = Some(gender);
                    }
                }
                Err(e) => log::warn!("Gender/age head failed: {e}"),
            }
        }
    }
    if options.with_descriptors {
        if let Some(session) = models.descriptor.as_mut() {
            match run_head(session, descriptor_tensor(crop, w, h)) {
                Ok(mut embedding) => {
                    l2_normalize(&mut embedding);
                    obs.descriptor = Some(embedding);
                }
                Err(e) => log::warn!("Descriptor head failed: {e}"),
            }
        }
    }
}

fn build_session(path: &Path) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let session = ort::session::Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(path)?;
    Ok(session)
}

/// Platform accelerator when one is available; ONNX Runtime falls back to CPU.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

fn load_optional(
    locations: &ModelLocations,
    name: &str,
) -> Result<Option<ort::session::Session>, ModelLoadError> {
    let dir = locations.model_dir.clone().unwrap_or_default();
    let path = locations
        .resolve_optional(name)
        .map_err(|e| ModelLoadError::new(dir.join(name), e))?;
    let Some(path) = path else {
        log::warn!("{name} not found; its attributes will be reported as unknown");
        return Ok(None);
    };
    let session = build_session(&path).map_err(|e| ModelLoadError::new(&path, e.to_string()))?;
    log::info!("Loaded {}", path.display());
    Ok(Some(session))
}

/// Square input size from the model's NCHW input shape.
fn input_size(session: &ort::session::Session) -> u32 {
    session
        .inputs()
        .first()
        .and_then(|input| {
            if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                if shape.len() >= 4 && shape[2] > 0 {
                    Some(shape[2] as u32)
                } else {
                    None
                }
            } else {
                None
            }
        })
        .unwrap_or(DEFAULT_INPUT_SIZE)
}

fn run_head(
    session: &mut ort::session::Session,
    input: Array4<f32>,
) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let value = ort::value::Tensor::from_array(input)?;
    let outputs = session.run(ort::inputs![value])?;
    if outputs.len() == 0 {
        return Err("head produced no outputs".into());
    }
    let array = outputs[0].try_extract_array::<f32>()?;
    Ok(array.iter().copied().collect())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, f64, u32, u32), Box<dyn std::error::Error>> {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // 114/255 gray padding, YOLO convention
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame
        .as_ndarray()
        .ok_or("frame buffer does not match its dimensions")?;
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Ok((tensor, scale, pad_x, pad_y))
}

/// Nearest-neighbour resample of an RGB crop to `size` × `size` pixels.
fn resample(rgb: &[u8], width: u32, height: u32, size: usize) -> Vec<[u8; 3]> {
    let src_w = (width as usize).max(1);
    let src_h = (height as usize).max(1);
    let mut out = Vec::with_capacity(size * size);
    for y in 0..size {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / size as f64) as usize).min(src_h - 1);
        for x in 0..size {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / size as f64) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * 3;
            let px = rgb
                .get(offset..offset + 3)
                .map(|p| [p[0], p[1], p[2]])
                .unwrap_or([0, 0, 0]);
            out.push(px);
        }
    }
    out
}

/// FER+ input: 64×64 grayscale, raw 0-255 intensities.
fn expression_tensor(rgb: &[u8], width: u32, height: u32) -> Array4<f32> {
    let pixels = resample(rgb, width, height, EXPRESSION_INPUT);
    let mut tensor = Array4::<f32>::zeros((1, 1, EXPRESSION_INPUT, EXPRESSION_INPUT));
    for (i, [r, g, b]) in pixels.into_iter().enumerate() {
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        tensor[[0, 0, i / EXPRESSION_INPUT, i % EXPRESSION_INPUT]] = luma;
    }
    tensor
}

/// Genderage input: 96×96 BGR, raw 0-255 intensities.
fn gender_age_tensor(rgb: &[u8], width: u32, height: u32) -> Array4<f32> {
    let pixels = resample(rgb, width, height, GENDER_AGE_INPUT);
    let mut tensor = Array4::<f32>::zeros((1, 3, GENDER_AGE_INPUT, GENDER_AGE_INPUT));
    for (i, [r, g, b]) in pixels.into_iter().enumerate() {
        let (y, x) = (i / GENDER_AGE_INPUT, i % GENDER_AGE_INPUT);
        tensor[[0, 0, y, x]] = b as f32;
        tensor[[0, 1, y, x]] = g as f32;
        tensor[[0, 2, y, x]] = r as f32;
    }
    tensor
}

/// ArcFace input: 112×112 RGB normalised to [-1, 1].
fn descriptor_tensor(rgb: &[u8], width: u32, height: u32) -> Array4<f32> {
    let pixels = resample(rgb, width, height, DESCRIPTOR_INPUT);
    let mut tensor = Array4::<f32>::zeros((1, 3, DESCRIPTOR_INPUT, DESCRIPTOR_INPUT));
    for (i, px) in pixels.into_iter().enumerate() {
        let (y, x) = (i / DESCRIPTOR_INPUT, i % DESCRIPTOR_INPUT);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px[c] as f32 - DESCRIPTOR_MEAN) / DESCRIPTOR_STD;
        }
    }
    tensor
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDetection {
    bbox: BoundingBox,
    confidence: f64,
    keypoints: Option<[(f64, f64); 5]>,
}

/// Decodes detector rows `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`
/// into frame coordinates. Accepts `[1, features, detections]` and
/// `[1, detections, features]` layouts.
fn parse_detections(
    data: &[f32],
    shape: &[usize],
    min_confidence: f64,
    scale: f64,
    pad_x: u32,
    pad_y: u32,
) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>> {
    if shape.len() != 3 {
        return Err(format!("Unexpected detector output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if data.len() < num_dets * num_feats {
        return Err("detector output shorter than its shape".into());
    }

    let unletterbox = |x: f64, y: f64| ((x - pad_x as f64) / scale, (y - pad_y as f64) / scale);

    let mut dets = Vec::new();
    for i in 0..num_dets {
        let row: Vec<f32> = if transposed {
            (0..num_feats).map(|f| data[f * num_dets + i]).collect()
        } else {
            data[i * num_feats..(i + 1) * num_feats].to_vec()
        };
        if row.len() < 5 {
            continue;
        }
        let conf = row[4] as f64;
        if conf < min_confidence {
            continue;
        }

        let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        let (x1, y1) = unletterbox(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = unletterbox(cx + w / 2.0, cy + h / 2.0);

        let keypoints = (row.len() >= 5 + NUM_KEYPOINT_VALUES).then(|| {
            let mut pts = [(0.0f64, 0.0f64); 5];
            for (k, pt) in pts.iter_mut().enumerate() {
                let base = 5 + k * 3;
                if row[base + 2] as f64 >= KEYPOINT_CONF_THRESH {
                    *pt = unletterbox(row[base] as f64, row[base + 1] as f64);
                }
            }
            pts
        });

        dets.push(RawDetection {
            bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            confidence: conf,
            keypoints,
        });
    }
    Ok(dets)
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(mut dets: Vec<RawDetection>, iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_thresh) {
            keep.push(det);
        }
    }
    keep
}

fn fold_ferplus(logits: &[f32]) -> ExpressionScores {
    let mut scores = ExpressionScores::from_pairs(Expression::ALL.iter().map(|e| (*e, 0.0)));
    for (p, expression) in softmax(logits).into_iter().zip(FERPLUS_CLASSES) {
        let current = scores.get(expression).unwrap_or(0.0);
        scores.set(expression, current + p);
    }
    scores
}

/// Genderage output `[female_logit, male_logit, age / 100]`.
fn decode_gender_age(out: &[f32]) -> Option<(f64, GenderEstimate)> {
    if out.len() < 3 {
        return None;
    }
    let probs = softmax(&out[..2]);
    let (gender, probability) = if probs[1] > probs[0] {
        (Gender::Male, probs[1])
    } else {
        (Gender::Female, probs[0])
    };
    let age = (out[2] as f64 * 100.0).round().max(0.0);
    Some((age, GenderEstimate { gender, probability }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
