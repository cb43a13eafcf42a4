//! The WebP animation engine.
//!
//! Decoding runs on the background executor; the frame clock callback only
//! copies an already decoded canvas into the display sink. The decoder handle
//! lives behind one mutex that is held for the whole of every decode, every
//! frame advance, and teardown, so disposal can never free it mid-decode.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use super::container;
use super::decoder::{AnimDecoder, DecodeOptions, DecoderBackend, ImageWebpBackend};
use super::types::{ContainerMetadata, FrameStatus, PixelLayout, PlaybackSnapshot, StopReason};
use crate::error::DecodeError;
use crate::runtime::executor::panic_message;
use crate::runtime::{DisplaySink, Executor, FrameClock, SubscriptionToken, lock};
use crate::settings::PlayerConfig;

/// Load-completion signal. Fires at most once per engine.
pub type LoadCallback = Box<dyn FnOnce(Result<ContainerMetadata, DecodeError>) + Send>;

/// Construction options for [`WebpAnimator`].
#[derive(Clone)]
pub struct AnimatorOptions {
    pub pixel_layout: PixelLayout,
    pub max_canvas_pixels: u64,
    pub backend: Arc<dyn DecoderBackend>,
}

impl Default for AnimatorOptions {
    fn default() -> Self {
        Self::from_config(&PlayerConfig::default())
    }
}

impl AnimatorOptions {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            pixel_layout: config.pixel_layout,
            max_canvas_pixels: config.max_canvas_pixels,
            backend: Arc::new(ImageWebpBackend),
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn DecoderBackend>) -> Self {
        self.backend = backend;
        self
    }
}

/// Everything guarded by the decoder lock.
struct DecoderState {
    decoder: Option<Box<dyn AnimDecoder>>,
    disposed: bool,
    /// Index of the next frame within the current loop.
    next_frame: u32,
}

/// Playback bookkeeping. Taken after the decoder lock, never before it.
struct Playback {
    loop_index: u32,
    current_timestamp: u64,
    current_duration: u64,
    frame_start: Instant,
    presented_first_frame: bool,
    frames_presented: u64,
}

struct Shared {
    meta: ContainerMetadata,
    sink: Weak<dyn DisplaySink>,
    clock: Arc<dyn FrameClock>,
    executor: Arc<dyn Executor>,
    decoder: Mutex<DecoderState>,
    /// Pending frame slot: status plus the decoded frame's timestamp.
    /// The pixels stay inside the decoder until presented.
    status: AtomicU8,
    pending_timestamp: AtomicU64,
    playback: Mutex<Playback>,
    subscription: Mutex<Option<SubscriptionToken>>,
    stopped: Mutex<Option<StopReason>>,
    load_signal: Mutex<Option<LoadCallback>>,
    last_error: Mutex<Option<String>>,
}

/// Decodes a WebP bitstream and plays it back on a display sink at the
/// encoded frame cadence.
///
/// Dropping the animator tears playback down; the drop blocks until any
/// decode already holding the decoder lock has finished.
pub struct WebpAnimator {
    sink: Weak<dyn DisplaySink>,
    clock: Arc<dyn FrameClock>,
    executor: Arc<dyn Executor>,
    options: AnimatorOptions,
    bitstream: Option<Arc<[u8]>>,
    shared: Option<Arc<Shared>>,
    initialized: bool,
}

impl WebpAnimator {
    pub fn new(
        sink: Weak<dyn DisplaySink>,
        clock: Arc<dyn FrameClock>,
        executor: Arc<dyn Executor>,
        options: AnimatorOptions,
    ) -> Self {
        Self {
            sink,
            clock,
            executor,
            options,
            bitstream: None,
            shared: None,
            initialized: false,
        }
    }

    /// Read the whole bitstream from `source`, then [`initialize`](Self::initialize).
    pub fn initialize_from_reader<R: Read>(
        &mut self,
        mut source: R,
        on_load: impl FnOnce(Result<ContainerMetadata, DecodeError>) + Send + 'static,
    ) -> bool {
        let mut bytes = Vec::new();
        if let Err(e) = source.read_to_end(&mut bytes) {
            self.initialized = true;
            let err = DecodeError::Io(e);
            log::warn!("WebP load failed: {err}");
            on_load(Err(err));
            return false;
        }
        self.initialize(bytes, on_load)
    }

    /// Parse the bitstream, create the decoder and start playback.
    ///
    /// Returns `true` once the metadata is valid and a decoder exists.
    /// `on_load` receives the outcome: for animations, success as soon as the
    /// metadata parses; for still images, after the single frame is decoded
    /// and presented. Initialization failures are reported through it too.
    pub fn initialize(
        &mut self,
        bytes: impl Into<Arc<[u8]>>,
        on_load: impl FnOnce(Result<ContainerMetadata, DecodeError>) + Send + 'static,
    ) -> bool {
        if self.initialized {
            log::warn!("WebpAnimator::initialize called twice");
            on_load(Err(DecodeError::ConfigInit("animator already initialized".into())));
            return false;
        }
        self.initialized = true;

        let bitstream: Arc<[u8]> = bytes.into();
        let (meta, decoder) = match self.open(&bitstream) {
            Ok(opened) => opened,
            Err(e) => {
                log::warn!("WebP load failed: {e}");
                on_load(Err(e));
                return false;
            }
        };
        log::info!(
            "Loaded WebP: {}x{}, {} frame{}, loop count {}",
            meta.canvas_width,
            meta.canvas_height,
            meta.frame_count,
            if meta.frame_count == 1 { "" } else { "s" },
            meta.loop_count
        );

        let shared = Arc::new(Shared {
            meta: meta.clone(),
            sink: self.sink.clone(),
            clock: Arc::clone(&self.clock),
            executor: Arc::clone(&self.executor),
            decoder: Mutex::new(DecoderState {
                decoder: Some(decoder),
                disposed: false,
                next_frame: 0,
            }),
            status: AtomicU8::new(FrameStatus::Started as u8),
            pending_timestamp: AtomicU64::new(0),
            playback: Mutex::new(Playback {
                loop_index: 0,
                current_timestamp: 0,
                current_duration: 0,
                frame_start: self.clock.now(),
                presented_first_frame: false,
                frames_presented: 0,
            }),
            subscription: Mutex::new(None),
            stopped: Mutex::new(None),
            load_signal: Mutex::new(None),
            last_error: Mutex::new(None),
        });
        self.bitstream = Some(bitstream);
        self.shared = Some(Arc::clone(&shared));

        if meta.is_animated() {
            on_load(Ok(meta));
            lock(&shared.playback).frame_start = shared.clock.now();
            Shared::decode_next_async(&shared);
            Shared::subscribe(&shared);
        } else {
            *lock(&shared.load_signal) = Some(Box::new(on_load));
            shared.set_status(FrameStatus::Started);
            let job_shared = Arc::clone(&shared);
            if let Err(e) = shared
                .executor
                .spawn(Box::new(move || job_shared.decode_still()))
            {
                shared.fail_still(e.into());
            }
        }
        true
    }

    /// Parse metadata, set up the decode configuration and create the decoder.
    fn open(
        &self,
        bitstream: &Arc<[u8]>,
    ) -> Result<(ContainerMetadata, Box<dyn AnimDecoder>), DecodeError> {
        let meta = container::parse(bitstream)?;
        let options = DecodeOptions::init(
            &meta,
            self.options.pixel_layout,
            self.options.max_canvas_pixels,
        )?;
        let decoder = self.options.backend.create(Arc::clone(bitstream), &options)?;
        Ok((meta, decoder))
    }

    pub fn metadata(&self) -> Option<&ContainerMetadata> {
        self.shared.as_ref().map(|s| &s.meta)
    }

    pub fn is_animated(&self) -> bool {
        self.metadata().is_some_and(ContainerMetadata::is_animated)
    }

    pub fn pixel_width(&self) -> u32 {
        self.metadata().map_or(0, |m| m.canvas_width)
    }

    pub fn pixel_height(&self) -> u32 {
        self.metadata().map_or(0, |m| m.canvas_height)
    }

    /// Size of the owned bitstream buffer in bytes.
    pub fn bitstream_len(&self) -> usize {
        self.bitstream.as_ref().map_or(0, |b| b.len())
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.as_ref().and_then(|s| *lock(&s.stopped))
    }

    /// Message of the decode error that ended playback, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.as_ref()?.last_error).clone()
    }

    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        let shared = self.shared.as_ref()?;
        let playback = lock(&shared.playback);
        Some(PlaybackSnapshot {
            loop_index: playback.loop_index,
            current_timestamp_ms: playback.current_timestamp,
            current_duration_ms: playback.current_duration,
            frames_presented: playback.frames_presented,
            status: shared.status(),
            stopped: *lock(&shared.stopped),
        })
    }
}

impl Drop for WebpAnimator {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.dispose();
        }
    }
}

impl Shared {
    fn status(&self) -> FrameStatus {
        FrameStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: FrameStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn is_stopped(&self) -> bool {
        lock(&self.stopped).is_some()
    }

    fn subscribe(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        let token = this.clock.subscribe(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                Shared::on_tick(&shared);
            }
        }));
        *lock(&this.subscription) = Some(token);
        // A tick on another thread may have stopped playback before the token was stored.
        if this.is_stopped() {
            this.unsubscribe();
        }
    }

    fn unsubscribe(&self) {
        if let Some(token) = lock(&self.subscription).take() {
            self.clock.unsubscribe(token);
        }
    }

    /// Enter a terminal state. Only the first reason sticks.
    fn stop(&self, reason: StopReason) {
        {
            let mut stopped = lock(&self.stopped);
            if stopped.is_some() {
                return;
            }
            *stopped = Some(reason);
        }
        match reason {
            StopReason::DecodeFailed => log::warn!("WebP playback stopped: frame decode failed"),
            StopReason::Finished => log::info!("WebP playback finished"),
            StopReason::TargetExpired => log::info!("WebP playback stopped: display target gone"),
            StopReason::Disposed => log::debug!("WebP playback disposed"),
        }
        self.unsubscribe();
    }

    /// Remember why playback failed and mark the pending slot failed.
    fn record_failure(&self, e: &DecodeError) {
        *lock(&self.last_error) = Some(e.to_string());
        self.set_status(FrameStatus::Failed);
    }

    /// Mark the slot as started and decode the next frame on the executor.
    fn decode_next_async(this: &Arc<Self>) {
        // Set before the hand-off so a tick in between sees "not ready".
        this.set_status(FrameStatus::Started);
        let job_shared = Arc::clone(this);
        if let Err(e) = this
            .executor
            .spawn(Box::new(move || job_shared.decode_next_frame()))
        {
            let e = DecodeError::from(e);
            log::warn!("{e}");
            this.record_failure(&e);
            this.stop(StopReason::DecodeFailed);
        }
    }

    /// Background half of `decode_next_async`.
    fn decode_next_frame(&self) {
        let mut state = lock(&self.decoder);
        let frame = state.next_frame;
        let disposed = state.disposed;
        let Some(decoder) = state.decoder.as_mut().filter(|_| !disposed) else {
            self.set_status(FrameStatus::Canceled);
            return;
        };
        match decode_guarded(&mut **decoder, frame) {
            Ok(timestamp) => {
                state.next_frame += 1;
                self.pending_timestamp.store(timestamp, Ordering::Relaxed);
                self.set_status(FrameStatus::Ready);
            }
            Err(e) => {
                log::warn!("{e}");
                self.record_failure(&e);
            }
        }
    }

    /// Background decode of a still image, presented as soon as it is ready.
    fn decode_still(&self) {
        let outcome = {
            let mut state = lock(&self.decoder);
            let disposed = state.disposed;
            match state.decoder.as_mut().filter(|_| !disposed) {
                None => None,
                Some(decoder) => Some(decode_guarded(&mut **decoder, 0).map(|_| {
                    self.set_status(FrameStatus::Ready);
                    match self.sink.upgrade() {
                        Some(sink) => {
                            sink.present(
                                decoder.frame(),
                                self.meta.canvas_width,
                                self.meta.canvas_height,
                            );
                            StopReason::Finished
                        }
                        None => StopReason::TargetExpired,
                    }
                })),
            }
        };

        // The signal runs without the decoder lock held.
        match outcome {
            Some(Ok(StopReason::Finished)) => {
                {
                    let mut playback = lock(&self.playback);
                    playback.frames_presented = 1;
                    playback.presented_first_frame = true;
                }
                let signal = lock(&self.load_signal).take();
                if let Some(signal) = signal {
                    signal(Ok(self.meta.clone()));
                }
                self.stop(StopReason::Finished);
            }
            Some(Ok(reason)) => self.stop(reason),
            Some(Err(e)) => self.fail_still(e),
            None => {
                self.set_status(FrameStatus::Canceled);
                self.stop(StopReason::Disposed);
            }
        }
    }

    /// A still image could not be shown: signal the error and stop.
    fn fail_still(&self, e: DecodeError) {
        log::warn!("WebP load failed: {e}");
        self.record_failure(&e);
        let signal = lock(&self.load_signal).take();
        if let Some(signal) = signal {
            signal(Err(e));
        }
        self.stop(StopReason::DecodeFailed);
    }

    /// Frame clock callback: present the pending frame once it is due.
    fn on_tick(this: &Arc<Self>) {
        if this.is_stopped() {
            return;
        }
        match this.status() {
            FrameStatus::Failed => {
                this.stop(StopReason::DecodeFailed);
                return;
            }
            FrameStatus::Ready => {}
            FrameStatus::Started | FrameStatus::Canceled => return,
        }

        let next_timestamp = this.pending_timestamp.load(Ordering::Relaxed);
        let now = this.clock.now();
        let due = {
            let playback = lock(&this.playback);
            let due = next_timestamp.saturating_sub(playback.current_timestamp);
            if now.saturating_duration_since(playback.frame_start) < Duration::from_millis(due) {
                return;
            }
            due
        };

        let Some(sink) = this.sink.upgrade() else {
            this.stop(StopReason::TargetExpired);
            return;
        };

        let mut state = lock(&this.decoder);
        // Teardown may have started since the status check.
        if state.disposed || state.decoder.is_none() || this.is_stopped() {
            drop(state);
            this.stop(StopReason::Disposed);
            return;
        }
        let Some(decoder) = state.decoder.as_mut() else {
            return;
        };

        // Only the decoder lock is held while presenting.
        sink.present(decoder.frame(), this.meta.canvas_width, this.meta.canvas_height);
        drop(sink);

        let mut playback = lock(&this.playback);
        playback.current_duration = due;
        playback.current_timestamp = next_timestamp;
        playback.frame_start = now;
        playback.frames_presented += 1;
        if !playback.presented_first_frame {
            playback.presented_first_frame = true;
            log::info!("First WebP frame presented");
        }

        if decoder.has_more_frames() {
            drop(playback);
            drop(state);
            Shared::decode_next_async(this);
            return;
        }

        let loop_count = u32::from(this.meta.loop_count);
        if loop_count == 0 || playback.loop_index + 1 < loop_count {
            if let Err(e) = decoder.reset() {
                drop(playback);
                drop(state);
                log::warn!("Failed to rewind WebP animation: {e}");
                this.record_failure(&e);
                this.stop(StopReason::DecodeFailed);
                return;
            }
            state.next_frame = 0;
            playback.loop_index += 1;
            playback.current_timestamp = 0;
            log::debug!("WebP animation starting loop {}", playback.loop_index + 1);
            drop(playback);
            drop(state);
            Shared::decode_next_async(this);
        } else {
            drop(playback);
            drop(state);
            this.stop(StopReason::Finished);
        }
    }

    /// Teardown: unsubscribe, then destroy the decoder under its lock.
    fn dispose(&self) {
        self.stop(StopReason::Disposed);
        // Already stopped for another reason: make sure the clock is released anyway.
        self.unsubscribe();

        {
            let mut state = lock(&self.decoder);
            state.disposed = true;
            // Destroyed while holding the lock: no decode can be running now.
            drop(state.decoder.take());
        }
        drop(lock(&self.load_signal).take());
    }
}

/// Decode one frame, turning a decoder panic into a frame decode error.
fn decode_guarded(decoder: &mut dyn AnimDecoder, frame: u32) -> Result<u64, DecodeError> {
    panic::catch_unwind(AssertUnwindSafe(|| decoder.decode_next())).unwrap_or_else(|payload| {
        Err(DecodeError::FrameDecode {
            frame,
            reason: format!("decoder panicked: {}", panic_message(&*payload)),
        })
    })
}
