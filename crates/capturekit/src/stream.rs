//! Capture streams.
//!
//! Callback contexts are reference counted. The stream keeps one reference
//! to each context until after its native handle is released, and the
//! release waits for callbacks in flight, so a trampoline never sees a
//! freed context. Each trampoline takes its own reference for the duration
//! of the call, so dropping the stream from inside a handler is sound.

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capturekit_ffi as ffi;
use capturekit_types::{OutputType, StreamState};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, trace, warn};

use crate::buffer::SampleBuffer;
use crate::completion::{submit, unit_trampoline, Completion};
use crate::configuration::StreamConfiguration;
use crate::error::{check, CaptureError, Result};
use crate::filter::ContentFilter;
use crate::handle::{Borrowed, ErrorObject, HandleType, OwnedHandle};
use crate::queue::DispatchQueue;
use crate::stats::{StatsSnapshot, StreamStats};

type ErrorFn = dyn Fn(CaptureError) + Send + Sync;
type OutputFn = dyn Fn(Borrowed<'_, SampleBuffer>) + Send + Sync;

struct ErrorContext {
    handler: Box<ErrorFn>,
}

struct OutputContext {
    output_type: OutputType,
    handler: Box<OutputFn>,
}

/// Take a reference to a context for the duration of a callback.
///
/// # Safety
///
/// `context` must be `Arc::as_ptr` of a live `Arc<T>`.
unsafe fn hold<T>(context: *mut c_void) -> Arc<T> {
    let ptr = context as *const T;
    Arc::increment_strong_count(ptr);
    Arc::from_raw(ptr)
}

unsafe extern "C" fn error_trampoline(context: *mut c_void, _stream: *const c_void, error: *const c_void) {
    let context = hold::<ErrorContext>(context);
    let Some(error) = Borrowed::<ErrorObject>::from_raw(error) else {
        return;
    };
    let error = CaptureError::from_error_object(&error);
    if panic::catch_unwind(AssertUnwindSafe(|| (context.handler)(error))).is_err() {
        error!("Stream error handler panicked");
    }
}

unsafe extern "C" fn output_trampoline(
    context: *mut c_void,
    _stream: *const c_void,
    _output_type: i32,
    sample: *const c_void,
) {
    let context = hold::<OutputContext>(context);
    let Some(sample) = Borrowed::<SampleBuffer>::from_raw(sample) else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| (context.handler)(sample))).is_err() {
        error!(output_type = %context.output_type, "Output handler panicked");
    }
}

/// Builder for a [`CaptureStream`]. An error handler is required.
pub struct CaptureStreamBuilder<'a> {
    filter: &'a ContentFilter,
    configuration: &'a StreamConfiguration,
    error_handler: Option<Arc<ErrorContext>>,
}

impl<'a> CaptureStreamBuilder<'a> {
    /// Called once if the stream fails while capturing.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(CaptureError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(ErrorContext {
            handler: Box::new(handler),
        }));
        self
    }

    /// Create the stream. Fails with a configuration error when no error
    /// handler was set or the configuration is invalid.
    #[instrument(name = "stream_create", skip(self))]
    pub fn build(self) -> Result<CaptureStream> {
        let (callback, context) = match &self.error_handler {
            Some(handler) => (
                Some(error_trampoline as unsafe extern "C" fn(_, _, _)),
                Arc::as_ptr(handler) as *mut c_void,
            ),
            None => (None, std::ptr::null_mut()),
        };

        let mut status = 0;
        // SAFETY: `status` is a valid out pointer and the context outlives
        // the native stream (see `CaptureStream`).
        let raw = unsafe {
            ffi::sc_stream_create(
                self.filter.as_ptr(),
                self.configuration.as_ptr(),
                callback,
                context,
                &mut status,
            )
        };
        // SAFETY: the C ABI hands us a new reference.
        let Some(handle) = (unsafe { OwnedHandle::from_raw(raw) }) else {
            check("create stream", status)?;
            return Err(CaptureError::NullHandle("create stream"));
        };

        debug!("Stream created");
        Ok(CaptureStream {
            handle,
            outputs: Mutex::new(Vec::new()),
            _error_handler: self.error_handler,
        })
    }
}

/// A capture session.
///
/// Dropping the stream stops it if needed and waits for running callbacks.
pub struct CaptureStream {
    // Declared first: the handle must be released before the contexts below.
    handle: OwnedHandle,
    outputs: Mutex<Vec<Arc<OutputContext>>>,
    _error_handler: Option<Arc<ErrorContext>>,
}

impl CaptureStream {
    pub fn builder<'a>(
        filter: &'a ContentFilter,
        configuration: &'a StreamConfiguration,
    ) -> CaptureStreamBuilder<'a> {
        CaptureStreamBuilder {
            filter,
            configuration,
            error_handler: None,
        }
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_raw(ffi::sc_stream_get_state(self.handle.as_ptr())).unwrap_or(StreamState::Error)
    }

    /// Register a handler for `output_type` on a stream-owned serial queue.
    ///
    /// The sample is borrowed for the call; retain it to keep it.
    pub fn add_output_handler<F>(&self, output_type: OutputType, handler: F) -> Result<()>
    where
        F: Fn(Borrowed<'_, SampleBuffer>) + Send + Sync + 'static,
    {
        self.register_output(output_type, None, Box::new(handler))
    }

    /// Register a handler that runs on `queue`, which must be serial.
    pub fn add_output_handler_on<F>(
        &self,
        output_type: OutputType,
        queue: &DispatchQueue,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Borrowed<'_, SampleBuffer>) + Send + Sync + 'static,
    {
        self.register_output(output_type, Some(queue), Box::new(handler))
    }

    fn register_output(
        &self,
        output_type: OutputType,
        queue: Option<&DispatchQueue>,
        handler: Box<OutputFn>,
    ) -> Result<()> {
        let context = Arc::new(OutputContext {
            output_type,
            handler,
        });
        let mut outputs = self.outputs.lock();
        check(
            "add output",
            ffi::sc_stream_add_output_with_queue(
                self.handle.as_ptr(),
                output_type.as_raw(),
                Some(output_trampoline),
                Arc::as_ptr(&context) as *mut c_void,
                queue.map_or(std::ptr::null(), |q| q.as_ptr()),
            ),
        )?;
        outputs.push(context);
        debug!(%output_type, "Output handler added");
        Ok(())
    }

    /// Remove every handler for `output_type`. Returns how many were removed.
    ///
    /// None of them runs after this returns.
    pub fn remove_output_handlers(&self, output_type: OutputType) -> Result<usize> {
        let mut outputs = self.outputs.lock();
        let code = ffi::sc_stream_remove_output(self.handle.as_ptr(), output_type.as_raw());
        if code < 0 {
            check("remove output", code)?;
        }
        outputs.retain(|context| context.output_type != output_type);
        Ok(code.max(0) as usize)
    }

    /// Deliver samples of `output_type` into a bounded queue.
    pub fn frames(&self, output_type: OutputType, options: FrameStreamOptions) -> Result<FrameStream> {
        let (tx, rx) = crossbeam_channel::bounded(options.capacity.max(1));
        let stats = Arc::new(StreamStats::new());
        let active = Arc::new(AtomicBool::new(true));
        let sink = FrameSink {
            tx,
            overflow: rx.clone(),
            policy: options.overflow,
            stats: stats.clone(),
            active: active.clone(),
        };

        self.add_output_handler(output_type, move |sample| sink.push(&sample))?;
        Ok(FrameStream { rx, stats, active })
    }

    /// Begin capturing. The completion resolves once capture is running or
    /// has failed to start.
    #[instrument(name = "stream_start", skip(self))]
    pub fn start(&self) -> Result<Completion<()>> {
        submit("start capture", |context| {
            ffi::sc_stream_start_capture(self.handle.as_ptr(), Some(unit_trampoline), context)
        })
    }

    /// Stop capturing. No output handler runs after the completion resolves.
    #[instrument(name = "stream_stop", skip(self))]
    pub fn stop(&self) -> Result<Completion<()>> {
        submit("stop capture", |context| {
            ffi::sc_stream_stop_capture(self.handle.as_ptr(), Some(unit_trampoline), context)
        })
    }

    /// Apply a new configuration. An invalid one fails here; a running
    /// stream picks it up without a restart.
    #[instrument(name = "stream_update", skip_all)]
    pub fn update_configuration(&self, configuration: &StreamConfiguration) -> Result<Completion<()>> {
        submit("update configuration", |context| {
            ffi::sc_stream_update_configuration(
                self.handle.as_ptr(),
                configuration.as_ptr(),
                Some(unit_trampoline),
                context,
            )
        })
    }
    /// Capture different content without restarting the stream.
    ///
    /// A source that has gone away fails the completion; the stream keeps
    /// capturing its previous content.
    #[instrument(name = "stream_update_filter", skip_all)]
    pub fn update_content_filter(&self, filter: &ContentFilter) -> Result<Completion<()>> {
        submit("update content filter", |context| {
            ffi::sc_stream_update_content_filter(
                self.handle.as_ptr(),
                filter.as_ptr(),
                Some(unit_trampoline),
                context,
            )
        })
    }
}

impl fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStream")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("outputs", &self.outputs.lock().len())
            .finish()
    }
}

/// What to do with a sample when the frame queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep what is queued and discard the new sample.
    #[default]
    DropNewest,
    /// Discard the oldest queued sample to make room.
    DropOldest,
}

/// Options for [`CaptureStream::frames`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStreamOptions {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for FrameStreamOptions {
    fn default() -> Self {
        Self {
            capacity: crate::config::DEFAULT_FRAME_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Provider side of a [`FrameStream`].
struct FrameSink {
    tx: Sender<SampleBuffer>,
    overflow: Receiver<SampleBuffer>,
    policy: OverflowPolicy,
    stats: Arc<StreamStats>,
    active: Arc<AtomicBool>,
}

impl FrameSink {
    fn push(&self, sample: &Borrowed<'_, SampleBuffer>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        self.stats.record_received();

        let sample = match self.tx.try_send(sample.retain()) {
            Ok(()) => {
                trace!("Sample queued");
                return;
            }
            Err(TrySendError::Full(sample)) => sample,
            Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                return;
            }
        };

        let dropped = match self.policy {
            OverflowPolicy::DropNewest => {
                drop(sample);
                self.stats.record_dropped()
            }
            OverflowPolicy::DropOldest => {
                // Only this sink sends, so a slot is free afterwards unless
                // the consumer took the oldest sample first.
                let mut dropped = 0;
                if self.overflow.try_recv().is_ok() {
                    dropped = self.stats.record_dropped();
                }
                if self.tx.try_send(sample).is_err() {
                    dropped = self.stats.record_dropped();
                }
                dropped
            }
        };
        if dropped == 1 || (dropped > 0 && dropped % 100 == 0) {
            warn!(dropped, policy = ?self.policy, "Frame queue overflow");
        }
    }
}

/// Samples of one output type, drained at the consumer's pace.
///
/// Ends when the stream is dropped or its handlers are removed. Dropping
/// the frame stream stops queueing and frees any queued samples.
pub struct FrameStream {
    rx: Receiver<SampleBuffer>,
    stats: Arc<StreamStats>,
    active: Arc<AtomicBool>,
}

impl FrameStream {
    /// Next sample, blocking. None once delivery has ended.
    pub fn recv(&self) -> Option<SampleBuffer> {
        let sample = self.rx.recv().ok()?;
        self.stats.record_consumed();
        Some(sample)
    }

    /// Next sample, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<SampleBuffer, RecvTimeoutError> {
        let sample = self.rx.recv_timeout(timeout)?;
        self.stats.record_consumed();
        Ok(sample)
    }

    /// Next sample if one is queued.
    pub fn try_recv(&self) -> Option<SampleBuffer> {
        let sample = self.rx.try_recv().ok()?;
        self.stats.record_consumed();
        Some(sample)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Shorthand for `stats().snapshot()`.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Iterator for FrameStream {
    type Item = SampleBuffer;

    fn next(&mut self) -> Option<SampleBuffer> {
        self.recv()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        while self.rx.try_recv().is_ok() {}
    }
}

impl fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStream")
            .field("queued", &self.rx.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
