use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::clock::FrameClock;
use super::lock;

/// Presentation target for decoded frames.
///
/// `pixels` is a tightly packed 32-bit buffer of exactly `width * height * 4`
/// bytes. It is only valid for the duration of the call; copy it to keep it.
/// Implementations may query the animator that presents to them (snapshot,
/// stop reason, last error) but must not drop it from inside `present`.
pub trait DisplaySink: Send + Sync {
    fn present(&self, pixels: &[u8], width: u32, height: u32);
}

/// One presentation recorded by [`FrameRecorder`].
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    /// Copy of the presented pixels.
    pub pixels: Vec<u8>,
    pub byte_len: usize,
    pub width: u32,
    pub height: u32,
    pub at: Instant,
}

/// Shared list of recorded presentations. Outlives the recorder itself.
pub type FrameLog = Arc<Mutex<Vec<PresentedFrame>>>;

/// Sink that records every presentation with its time.
pub struct FrameRecorder {
    clock: Option<Arc<dyn FrameClock>>,
    log: FrameLog,
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRecorder {
    /// Recorder stamping presentations with the wall clock.
    pub fn new() -> Self {
        Self {
            clock: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Recorder stamping presentations with the given clock's time base.
    pub fn with_clock(clock: Arc<dyn FrameClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new()
        }
    }

    pub fn log(&self) -> FrameLog {
        Arc::clone(&self.log)
    }

    pub fn count(&self) -> usize {
        lock(&self.log).len()
    }

    pub fn frames(&self) -> Vec<PresentedFrame> {
        lock(&self.log).clone()
    }
}

impl DisplaySink for FrameRecorder {
    fn present(&self, pixels: &[u8], width: u32, height: u32) {
        let at = self.clock.as_ref().map_or_else(Instant::now, |c| c.now());
        let frame = PresentedFrame {
            pixels: pixels.to_vec(),
            byte_len: pixels.len(),
            width,
            height,
            at,
        };
        lock(&self.log).push(frame);
    }
}
