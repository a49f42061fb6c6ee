use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser};

use classwatch_core::classification::domain::classifier::{ClassificationDispatch, Classifier};
use classwatch_core::classification::infrastructure::http_classification_client::HttpClassificationClient;
use classwatch_core::classification::infrastructure::worker_pool_dispatch::WorkerPoolDispatch;
use classwatch_core::detection::domain::detection_adapter::DetectionAdapter;
use classwatch_core::detection::domain::face_analyzer::FaceAnalyzer;
use classwatch_core::detection::infrastructure::onnx_face_analyzer::OnnxFaceAnalyzer;
use classwatch_core::detection::infrastructure::replay_face_analyzer::ReplayFaceAnalyzer;
use classwatch_core::fusion::fusion_engine::FusionEngine;
use classwatch_core::ledger::prediction_ledger::PredictionLedger;
use classwatch_core::ledger::prediction_record::SessionInfo;
use classwatch_core::ledger::submission_client::SubmissionClient;
use classwatch_core::overlay::domain::frame_presenter::{FramePresenter, NullPresenter};
use classwatch_core::overlay::infrastructure::annotated_frame_presenter::AnnotatedFramePresenter;
use classwatch_core::pipeline::monitoring_pipeline::{LoopOptions, MonitoringPipeline, RunSummary};
use classwatch_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use classwatch_core::shared::settings::MonitorSettings;
use classwatch_core::source::domain::frame_source::{FrameSource, FrameSourceError, PlaybackControl};
use classwatch_core::source::infrastructure::image_sequence_source::ImageSequenceSource;
use classwatch_core::source::infrastructure::video_file_source::VideoFileSource;

const DEFAULT_MODEL_DIR: &str = "models";
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Classroom engagement monitoring: detects faces, asks a remote service
/// whether each student is focused, and keeps a ledger of the predictions.
#[derive(Parser)]
#[command(name = "classwatch")]
#[command(group(ArgGroup::new("input").required(true).args(["video", "frames", "camera"])))]
struct Cli {
    /// Video file to monitor.
    #[arg(long)]
    video: Option<PathBuf>,

    /// Directory of still images, processed in name order.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Camera device index (requires the `camera` feature).
    #[arg(long)]
    camera: Option<u32>,

    /// Replay scripted detections from a JSON file instead of running models.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Directory holding the ONNX models.
    #[arg(long)]
    models: Option<PathBuf>,

    /// Settings file (defaults to the per-user settings file).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the effective settings to the per-user settings file.
    #[arg(long)]
    save_settings: bool,

    #[arg(long)]
    predict_url: Option<String>,

    #[arg(long, conflicts_with = "no_identify")]
    identify_url: Option<String>,

    /// Skip identity lookups.
    #[arg(long)]
    no_identify: bool,

    /// Per-call classification timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Concurrent classification calls.
    #[arg(long)]
    workers: Option<usize>,

    /// Face detection confidence threshold (0.0-1.0].
    #[arg(long)]
    min_confidence: Option<f64>,

    #[arg(long)]
    max_results: Option<usize>,

    #[arg(long)]
    no_landmarks: bool,

    #[arg(long)]
    no_expressions: bool,

    #[arg(long)]
    no_age_gender: bool,

    /// Use face descriptors to break near-ties when matching regions.
    #[arg(long)]
    descriptors: bool,

    /// Frames a face may go undetected before its region expires.
    #[arg(long)]
    grace_frames: Option<u32>,

    /// Minimum box overlap for a face to continue a region (0.0-1.0).
    #[arg(long)]
    iou_threshold: Option<f64>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Pace video playback at its native frame rate.
    #[arg(long)]
    realtime: bool,

    /// Write annotated frames as PNGs to this directory.
    #[arg(long)]
    annotate_dir: Option<PathBuf>,

    /// Annotate every Nth frame.
    #[arg(long, default_value = "1")]
    annotate_every: u64,

    /// Write the ledger as JSON when the run ends.
    #[arg(long)]
    ledger_out: Option<PathBuf>,

    /// Submit the ledger to the backend when the run ends.
    #[arg(long)]
    submit: bool,

    #[arg(long)]
    submit_url: Option<String>,

    /// Lecturer id sent with the submission.
    #[arg(long, requires = "course_id")]
    lecturer_id: Option<i64>,

    /// Course id sent with the submission.
    #[arg(long, requires = "lecturer_id")]
    course_id: Option<i64>,

    /// Session date (RFC 3339), defaults to now.
    #[arg(long, requires = "lecturer_id")]
    session_date: Option<String>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = build_settings(&cli)?;
    if cli.save_settings {
        settings.save()?;
        log::info!("Settings saved");
    }

    let mut pipeline = start_pipeline(&cli, &settings)?;
    cancel_on_interrupt(pipeline.cancel_handle())?;
    monitor(&cli, &settings, &mut pipeline)?;
    Ok(())
}

fn start_pipeline(
    cli: &Cli,
    settings: &MonitorSettings,
) -> Result<MonitoringPipeline, Box<dyn std::error::Error>> {
    let adapter = build_adapter(cli, settings);
    let dispatch = build_dispatch(settings)?;
    let engine = FusionEngine::new(settings.fusion.clone(), PredictionLedger::new());
    let options = LoopOptions {
        max_frames: cli.max_frames,
        ..LoopOptions::from(settings)
    };

    let mut pipeline = MonitoringPipeline::start(adapter, engine, dispatch, options)?
        .with_logger(Box::new(StdoutPipelineLogger::default()));
    pipeline.switch_source(|| open_source(cli))?;
    Ok(pipeline)
}

/// Runs the loop to its end, then persists the ledger. A cancelled run is
/// persisted the same way.
fn monitor(
    cli: &Cli,
    settings: &MonitorSettings,
    pipeline: &mut MonitoringPipeline,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let mut presenter: Box<dyn FramePresenter> = match &cli.annotate_dir {
        Some(dir) => Box::new(AnnotatedFramePresenter::new(dir, cli.annotate_every)),
        None => Box::new(NullPresenter),
    };
    let summary = pipeline.run(presenter.as_mut())?;
    report(&summary);

    let ledger = pipeline.ledger().clone();
    if let Some(path) = &cli.ledger_out {
        write_ledger(&ledger, path)?;
    }
    if cli.submit {
        submit(cli, settings, &ledger)?;
    }
    Ok(summary)
}

/// First Ctrl-C stops the loop after the current frame; a second one exits.
fn cancel_on_interrupt(cancel: Arc<AtomicBool>) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::warn!("Cannot listen for Ctrl-C: {e}");
                    return;
                }
                log::info!("Interrupted, stopping after the current frame");
                cancel.store(true, Ordering::SeqCst);

                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted again, exiting");
                    process::exit(130);
                }
            });
        })?;
    Ok(())
}

fn build_settings(cli: &Cli) -> Result<MonitorSettings, Box<dyn std::error::Error>> {
    let mut settings = MonitorSettings::load(cli.settings.as_deref())?;

    let detection = &mut settings.detection;
    if let Some(v) = cli.min_confidence {
        detection.min_confidence = v;
    }
    if let Some(v) = cli.max_results {
        detection.max_results = v;
    }
    if cli.no_landmarks {
        detection.with_landmarks = false;
    }
    if cli.no_expressions {
        detection.with_expressions = false;
    }
    if cli.no_age_gender {
        detection.with_age_gender = false;
    }
    if cli.descriptors {
        detection.with_descriptors = true;
    }

    let classification = &mut settings.classification;
    if let Some(url) = &cli.predict_url {
        classification.predict_url = url.clone();
    }
    if let Some(url) = &cli.identify_url {
        classification.identify_url = Some(url.clone());
    }
    if cli.no_identify {
        classification.identify_url = None;
    }
    if let Some(v) = cli.timeout_ms {
        classification.timeout_ms = v;
    }
    if let Some(v) = cli.workers {
        classification.workers = v;
    }

    if let Some(v) = cli.grace_frames {
        settings.fusion.grace_frames = v;
    }
    if let Some(v) = cli.iou_threshold {
        settings.fusion.iou_threshold = v;
    }
    if let Some(url) = &cli.submit_url {
        settings.submission_url = Some(url.clone());
    }
    if let Some(dir) = &cli.models {
        settings.model_dir = Some(dir.clone());
    }

    settings.validate()?;
    Ok(settings)
}

fn build_adapter(cli: &Cli, settings: &MonitorSettings) -> DetectionAdapter {
    let analyzer: Box<dyn FaceAnalyzer> = match &cli.replay {
        Some(script) => Box::new(ReplayFaceAnalyzer::from_file(script)),
        None => Box::new(OnnxFaceAnalyzer::new(settings.model_download_url.clone())),
    };
    let model_dir = settings
        .model_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
    DetectionAdapter::new(analyzer, model_dir, settings.detection.clone())
}

fn build_dispatch(
    settings: &MonitorSettings,
) -> Result<Box<dyn ClassificationDispatch>, Box<dyn std::error::Error>> {
    let classification = &settings.classification;
    let client = HttpClassificationClient::new(
        classification.predict_url.clone(),
        classification.identify_url.clone(),
        Duration::from_millis(classification.timeout_ms),
    )?;
    log::info!(
        "Classifying via {} with {} workers",
        classification.predict_url,
        classification.workers
    );
    let classifier: Arc<dyn Classifier> = Arc::new(client);
    Ok(Box::new(WorkerPoolDispatch::new(
        classifier,
        classification.workers,
    )?))
}

fn open_source(cli: &Cli) -> Result<Box<dyn FrameSource>, FrameSourceError> {
    if let Some(path) = &cli.video {
        let source = VideoFileSource::open(path, PlaybackControl::new())?.with_realtime(cli.realtime);
        return Ok(Box::new(source));
    }
    if let Some(dir) = &cli.frames {
        return Ok(Box::new(ImageSequenceSource::open(dir)?));
    }
    if let Some(device) = cli.camera {
        return open_camera(device);
    }
    Err(FrameSourceError::NotOpened)
}

#[cfg(feature = "camera")]
fn open_camera(device: u32) -> Result<Box<dyn FrameSource>, FrameSourceError> {
    use classwatch_core::source::infrastructure::camera_source::CameraSource;
    Ok(Box::new(CameraSource::open(device)?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(device: u32) -> Result<Box<dyn FrameSource>, FrameSourceError> {
    Err(FrameSourceError::CameraAcquisition {
        device: device.to_string(),
        reason: "built without the `camera` feature".to_string(),
    })
}

fn report(summary: &RunSummary) {
    let stats = &summary.stats;
    log::info!(
        "Stopped ({:?}) after {} frames: {} requests, {} applied, {} failed, {} timed out, {} stale",
        summary.stop_reason,
        stats.frames,
        stats.requests_issued,
        stats.responses_applied,
        stats.responses_failed,
        stats.responses_timed_out,
        stats.responses_stale
    );
    log::info!("Ledger holds {} records", summary.ledger_records);
}

fn write_ledger(ledger: &PredictionLedger, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&ledger.snapshot())?;
    fs::write(path, json)?;
    log::info!("Ledger written to {}", path.display());
    Ok(())
}

fn submit(
    cli: &Cli,
    settings: &MonitorSettings,
    ledger: &PredictionLedger,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = settings
        .submission_url
        .as_deref()
        .ok_or("--submit needs a submission URL")?;
    let mut client = SubmissionClient::new(url, SUBMIT_TIMEOUT)?;
    if let (Some(lecturer_id), Some(course_id)) = (cli.lecturer_id, cli.course_id) {
        client = client.with_session(SessionInfo {
            lecturer_id,
            course_id,
            session_date: parse_session_date(cli.session_date.as_deref())?,
        });
    }
    let sent = client.submit_ledger(ledger)?;
    log::info!("Submitted {sent} records to {url}");
    Ok(())
}

fn parse_session_date(raw: Option<&str>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match raw {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .map_err(|e| format!("Invalid session date '{raw}': {e}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classwatch_core::pipeline::monitoring_pipeline::StopReason;
    use serde_json::{json, Value};

    struct Fixture {
        _dir: tempfile::TempDir,
        frames: PathBuf,
        script: PathBuf,
        settings: PathBuf,
        ledger_out: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir(&frames).unwrap();
        for i in 0..3 {
            image::RgbImage::new(32, 32)
                .save(frames.join(format!("{i:03}.png")))
                .unwrap();
        }
        let script = dir.path().join("script.json");
        fs::write(&script, "{}").unwrap();
        let settings = dir.path().join("settings.json");
        fs::write(&settings, "{}").unwrap();
        let ledger_out = dir.path().join("ledger.json");
        Fixture {
            frames,
            script,
            settings,
            ledger_out,
            _dir: dir,
        }
    }

    fn parse(f: &Fixture) -> Cli {
        let path = |p: &PathBuf| p.to_str().unwrap().to_string();
        Cli::try_parse_from([
            "classwatch".to_string(),
            "--frames".to_string(),
            path(&f.frames),
            "--replay".to_string(),
            path(&f.script),
            "--settings".to_string(),
            path(&f.settings),
            "--no-identify".to_string(),
            "--ledger-out".to_string(),
            path(&f.ledger_out),
        ])
        .unwrap()
    }

    #[test]
    fn test_cancelled_run_still_writes_ledger() {
        let f = fixture();
        let cli = parse(&f);
        let settings = build_settings(&cli).unwrap();
        let mut pipeline = start_pipeline(&cli, &settings).unwrap();

        pipeline.cancel_handle().store(true, Ordering::SeqCst);
        let summary = monitor(&cli, &settings, &mut pipeline).unwrap();

        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.stats.frames, 0);
        let written: Value = serde_json::from_str(&fs::read_to_string(&f.ledger_out).unwrap()).unwrap();
        assert_eq!(written, json!([]));
    }

    #[test]
    fn test_uncancelled_run_reaches_end_of_stream() {
        let f = fixture();
        let cli = parse(&f);
        let settings = build_settings(&cli).unwrap();
        let mut pipeline = start_pipeline(&cli, &settings).unwrap();

        let summary = monitor(&cli, &settings, &mut pipeline).unwrap();

        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.stats.frames, 3);
        assert!(f.ledger_out.exists());
    }

    #[test]
    fn test_interrupt_listener_leaves_flag_clear() {
        let cancel = Arc::new(AtomicBool::new(false));
        cancel_on_interrupt(Arc::clone(&cancel)).unwrap();
        assert!(!cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_session_flags_need_both_ids() {
        let result = Cli::try_parse_from(["classwatch", "--frames", "x", "--lecturer-id", "3"]);
        assert!(result.is_err());
    }
}
