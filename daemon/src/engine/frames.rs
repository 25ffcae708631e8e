//! Latest decoded frame, shared between the streaming thread and the renderer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A decoded RGBA frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `data`
    pub stride: u32,
    /// Increases by one for every frame the engine delivers
    pub sequence: u64,
    /// Rows are stored bottom-up
    pub flipped: bool,
}

type Notifier = Box<dyn Fn() + Send + Sync>;

/// Holds only the newest frame; older undelivered frames are replaced.
pub struct FrameStore {
    current: Mutex<Option<Arc<VideoFrame>>>,
    sequence: AtomicU64,
    notifier: Mutex<Option<Notifier>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            sequence: AtomicU64::new(0),
            notifier: Mutex::new(None),
        }
    }

    /// Register the "new frame" wakeup. Replaces any earlier one.
    pub fn set_notifier(&self, notifier: impl Fn() + Send + Sync + 'static) {
        *self.notifier.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(notifier));
    }

    pub fn clear_notifier(&self) {
        *self.notifier.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Store a frame and wake the renderer
    pub fn push(&self, data: Vec<u8>, width: u32, height: u32, stride: u32, flipped: bool) {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = Arc::new(VideoFrame {
            data,
            width,
            height,
            stride,
            sequence,
            flipped,
        });

        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = current.as_ref() {
                log::trace!("Replacing frame #{} with #{}", previous.sequence, sequence);
            }
            *current = Some(frame);
        }

        if let Some(notify) = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            notify();
        }
    }

    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of frames delivered so far
    pub fn delivered(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}
