use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("camera {device} unavailable: {reason}")]
    CameraAcquisition { device: String, reason: String },
    #[error("failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },
    #[error("no source is open")]
    NotOpened,
}

/// Pull-based sequence of frames from a camera or a file.
///
/// `Ok(None)` signals end-of-stream (also while playback is paused).
/// `release` gives the device or file handle back explicitly; a released
/// source reports [`FrameSourceError::NotOpened`].
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;

    fn release(&mut self);

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// Shared pause switch for file playback.
#[derive(Clone, Debug, Default)]
pub struct PlaybackControl {
    paused: Arc<AtomicBool>,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Holds at most one active source. Switching releases the current source
/// before the next one is acquired.
#[derive(Default)]
pub struct SourceSlot {
    current: Option<Box<dyn FrameSource>>,
}

impl SourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn describe(&self) -> Option<String> {
        self.current.as_ref().map(|s| s.describe())
    }

    /// Releases the current source, then runs `acquire`. On failure the slot
    /// stays empty.
    pub fn switch<F>(&mut self, acquire: F) -> Result<(), FrameSourceError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, FrameSourceError>,
    {
        self.stop();
        let source = acquire()?;
        log::info!("Opened source {}", source.describe());
        self.current = Some(source);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut source) = self.current.take() {
            let name = source.describe();
            source.release();
            log::info!("Released source {name}");
        }
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        match self.current.as_mut() {
            Some(source) => source.next_frame(),
            None => Err(FrameSourceError::NotOpened),
        }
    }
}

impl Drop for SourceSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records lifecycle events into a shared journal.
    struct JournalSource {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        remaining: u64,
        released: bool,
    }

    impl FrameSource for JournalSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
            if self.released {
                return Err(FrameSourceError::NotOpened);
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Frame::new(vec![0u8; 3], 1, 1, 3, 0)))
        }

        fn release(&mut self) {
            self.released = true;
            self.journal
                .lock()
                .unwrap()
                .push(format!("release {}", self.name));
        }

        fn describe(&self) -> String {
            self.name.to_string()
        }
    }

    fn acquire(
        name: &'static str,
        journal: &Arc<Mutex<Vec<String>>>,
    ) -> Result<Box<dyn FrameSource>, FrameSourceError> {
        journal.lock().unwrap().push(format!("acquire {name}"));
        Ok(Box::new(JournalSource {
            name,
            journal: journal.clone(),
            remaining: 2,
            released: false,
        }))
    }

    #[test]
    fn test_switch_releases_before_acquiring() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slot = SourceSlot::new();
        slot.switch(|| acquire("camera", &journal)).unwrap();
        slot.switch(|| acquire("file", &journal)).unwrap();

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["acquire camera", "release camera", "acquire file"]
        );
        assert_eq!(slot.describe().as_deref(), Some("file"));
    }

    #[test]
    fn test_failed_acquire_leaves_slot_empty() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slot = SourceSlot::new();
        slot.switch(|| acquire("camera", &journal)).unwrap();

        let result = slot.switch(|| {
            Err(FrameSourceError::CameraAcquisition {
                device: "1".into(),
                reason: "busy".into(),
            })
        });

        assert!(matches!(result, Err(FrameSourceError::CameraAcquisition { .. })));
        assert!(!slot.is_active());
        assert_eq!(journal.lock().unwrap().last().unwrap(), "release camera");
    }

    #[test]
    fn test_empty_slot_reports_not_opened() {
        let mut slot = SourceSlot::new();
        assert!(matches!(slot.next_frame(), Err(FrameSourceError::NotOpened)));
    }

    #[test]
    fn test_next_frame_until_end_of_stream() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut slot = SourceSlot::new();
        slot.switch(|| acquire("file", &journal)).unwrap();
        assert!(slot.next_frame().unwrap().is_some());
        assert!(slot.next_frame().unwrap().is_some());
        assert!(slot.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_drop_releases_source() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        {
            let mut slot = SourceSlot::new();
            slot.switch(|| acquire("camera", &journal)).unwrap();
        }
        assert_eq!(journal.lock().unwrap().last().unwrap(), "release camera");
    }

    #[test]
    fn test_playback_control_is_shared() {
        let control = PlaybackControl::new();
        let handle = control.clone();
        handle.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!handle.is_paused());
    }
}
