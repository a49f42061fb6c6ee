//! The frame loop: pull a frame, detect, fuse, dispatch classification
//! requests, draw.
//!
//! The loop is not reentrant. Frame N is pulled only after frame N-1 has
//! been detected, fused and presented, so detection work never queues up.
//! Classification runs elsewhere; its responses are drained at the start of
//! each cycle, which keeps all region state on the loop thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::fps_meter::FpsMeter;
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::classification::domain::classification::{
    ClassificationJob, ClassificationOutcome, ClassificationResponse,
};
use crate::classification::domain::classifier::ClassificationDispatch;
use crate::classification::domain::face_crop::{CropFormat, FaceCrop};
use crate::detection::domain::detection_adapter::{DetectionAdapter, DetectionSession};
use crate::detection::domain::face_analyzer::ModelLoadError;
use crate::fusion::fusion_engine::{FusionEngine, ResponseDisposition};
use crate::ledger::prediction_ledger::PredictionLedger;
use crate::overlay::domain::frame_presenter::FramePresenter;
use crate::shared::frame::Frame;
use crate::shared::settings::MonitorSettings;
use crate::source::domain::frame_source::{FrameSource, FrameSourceError, SourceSlot};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Source(#[from] FrameSourceError),
    #[error("no frame source is active")]
    NoSource,
    #[error("presenter failed: {0}")]
    Presenter(String),
}

/// Per-run knobs of the loop itself.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopOptions {
    pub crop_format: CropFormat,
    pub crop_padding: f64,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            crop_format: CropFormat::Png,
            crop_padding: 0.0,
            max_frames: None,
        }
    }
}

impl From<&MonitorSettings> for LoopOptions {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            crop_format: settings.classification.crop_format,
            crop_padding: settings.classification.crop_padding,
            max_frames: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
    FrameLimit,
    /// The source failed mid-run and was released.
    SourceFailed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: u64,
    pub requests_issued: u64,
    pub responses_applied: u64,
    pub responses_failed: u64,
    pub responses_timed_out: u64,
    pub responses_stale: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub stats: RunStats,
    /// Classification requests still outstanding when the run ended. They
    /// are abandoned; their responses will be stale.
    pub abandoned_requests: usize,
    pub ledger_records: usize,
}

pub struct MonitoringPipeline {
    adapter: DetectionAdapter,
    session: DetectionSession,
    engine: FusionEngine,
    dispatch: Box<dyn ClassificationDispatch>,
    source: SourceSlot,
    options: LoopOptions,
    fps: FpsMeter,
    logger: Box<dyn PipelineLogger>,
    cancelled: Arc<AtomicBool>,
    stats: RunStats,
}

impl MonitoringPipeline {
    /// Passes the detection readiness barrier. No frame is pulled before
    /// models are loaded; a load failure is returned here.
    pub fn start(
        mut adapter: DetectionAdapter,
        engine: FusionEngine,
        dispatch: Box<dyn ClassificationDispatch>,
        options: LoopOptions,
    ) -> Result<Self, PipelineError> {
        let session = adapter.prepare()?;
        Ok(Self {
            adapter,
            session,
            engine,
            dispatch,
            source: SourceSlot::new(),
            options,
            fps: FpsMeter::default(),
            logger: Box::new(NullPipelineLogger),
            cancelled: Arc::new(AtomicBool::new(false)),
            stats: RunStats::default(),
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Setting the flag stops [`run`](Self::run) before the next frame is pulled.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &PredictionLedger {
        self.engine.ledger()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn logger(&self) -> &dyn PipelineLogger {
        self.logger.as_ref()
    }

    /// Releases the current source, forgets tracked regions, then acquires
    /// the new source.
    pub fn switch_source<F>(&mut self, acquire: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, FrameSourceError>,
    {
        self.source.stop();
        self.engine.reset();
        self.fps.reset();
        self.source.switch(acquire)?;
        self.cancelled.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop_source(&mut self) {
        self.source.stop();
    }

    /// Runs cycles until end-of-stream, cancellation, the frame limit or a
    /// source failure. The source is released on every exit path.
    pub fn run(&mut self, presenter: &mut dyn FramePresenter) -> Result<RunSummary, PipelineError> {
        if !self.source.is_active() {
            return Err(PipelineError::NoSource);
        }
        let name = self.source.describe().unwrap_or_default();
        self.logger.info(&format!("Monitoring {name}"));

        let mut frames_this_run = 0u64;
        let stop_reason = loop {
            if self.cancelled.load(Ordering::SeqCst) {
                break StopReason::Cancelled;
            }
            if self
                .options
                .max_frames
                .is_some_and(|limit| frames_this_run >= limit)
            {
                break StopReason::FrameLimit;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::EndOfStream,
                Err(e) => {
                    log::warn!("Source {name} failed: {e}");
                    break StopReason::SourceFailed(e.to_string());
                }
            };

            if let Err(e) = self.process_frame(&frame, presenter) {
                self.source.stop();
                return Err(e);
            }
            frames_this_run += 1;
            self.logger.progress(frames_this_run as usize, None);
        };

        self.source.stop();
        let abandoned_requests = self.engine.in_flight();
        if abandoned_requests > 0 {
            log::debug!("Abandoning {abandoned_requests} outstanding classification requests");
        }
        self.logger.info(&format!("Stopped: {stop_reason:?}"));
        self.logger.summary();

        Ok(RunSummary {
            stop_reason,
            stats: self.stats.clone(),
            abandoned_requests,
            ledger_records: self.ledger().len(),
        })
    }

    /// One full cycle for `frame`.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        presenter: &mut dyn FramePresenter,
    ) -> Result<(), PipelineError> {
        let frame_index = frame.index();

        for response in self.dispatch.poll_completed() {
            self.apply(response, frame_index);
        }

        let t0 = Instant::now();
        let observations = self.adapter.detect(&self.session, frame);
        self.logger.timing("detect", elapsed_ms(t0));

        let t0 = Instant::now();
        let step = self.engine.observe(frame_index, &observations);
        for request in step.requests {
            self.stats.requests_issued += 1;
            match FaceCrop::from_frame(
                frame,
                &request.bbox,
                self.options.crop_format,
                self.options.crop_padding,
            ) {
                Ok(crop) => self.dispatch.submit(ClassificationJob {
                    ticket: request.ticket,
                    crop,
                }),
                Err(e) => {
                    log::warn!("Could not crop region {}: {e}", request.ticket.region_id);
                    self.apply(
                        ClassificationResponse {
                            ticket: request.ticket,
                            outcome: ClassificationOutcome::Failed(e.to_string()),
                        },
                        frame_index,
                    );
                }
            }
        }
        self.logger.timing("fuse", elapsed_ms(t0));
        self.logger
            .metric("regions", self.engine.regions().len() as f64);
        self.logger.metric("in_flight", self.engine.in_flight() as f64);

        let fps = self.fps.tick();
        let t0 = Instant::now();
        presenter
            .present(frame, self.engine.regions(), fps)
            .map_err(|e| PipelineError::Presenter(e.to_string()))?;
        self.logger.timing("render", elapsed_ms(t0));

        self.stats.frames += 1;
        Ok(())
    }

    fn apply(&mut self, response: ClassificationResponse, frame_index: u64) {
        match self.engine.apply_response(response, frame_index) {
            ResponseDisposition::Applied => self.stats.responses_applied += 1,
            ResponseDisposition::Failed => self.stats.responses_failed += 1,
            ResponseDisposition::TimedOut => self.stats.responses_timed_out += 1,
            ResponseDisposition::Stale => self.stats.responses_stale += 1,
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
