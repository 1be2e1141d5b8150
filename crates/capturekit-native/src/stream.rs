//! Stream sessions.
//!
//! A stream owns its provider session, its output registrations and a
//! private serial control queue. Start, stop, updates and provider failures
//! are all handled on the control queue, so they never interleave.
//!
//! Output delivery is gated by `delivering`. Stopping clears the flag,
//! stops the provider session (after which the sink is never called
//! again), then runs a barrier on every output queue. Only then does the
//! completion fire, so no output callback can run after it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use capturekit_types::{OutputType, StreamConfiguration, StreamErrorCode, StreamState};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{BridgeError, NativeError};
use crate::filter::ContentFilter;
use crate::handle::HandleId;
use crate::object::{NativeObject, Registry};
use crate::provider::{CaptureProvider, FrameSink, ProviderSession};
use crate::queue::{DispatchQueue, QosClass, QueueKind};
use crate::sample_buffer::SampleBuffer;
use crate::Completion;

/// Called once per delivered sample: `(stream, output type, sample)`.
///
/// The sample handle is borrowed for the duration of the call.
pub type OutputHandler = Arc<dyn Fn(HandleId, OutputType, HandleId) + Send + Sync>;

/// Called once when the provider fails: `(stream, error)`.
///
/// The error handle is borrowed for the duration of the call.
pub type ErrorHandler = Arc<dyn Fn(HandleId, HandleId) + Send + Sync>;

struct OutputRegistration {
    output_type: OutputType,
    handler: OutputHandler,
    queue: Arc<DispatchQueue>,
}

struct Inner {
    state: StreamState,
    config: StreamConfiguration,
    session: Option<Box<dyn ProviderSession>>,
    /// The provider failure that moved the stream to `Error`.
    failure: Option<NativeError>,
}

impl Inner {
    fn transition(&mut self, to: StreamState) {
        debug!(from = %self.state, %to, "Stream state transition");
        self.state = to;
    }
}

/// A capture stream behind a handle.
pub struct StreamSession {
    id: OnceCell<HandleId>,
    registry: Arc<Registry>,
    provider: Arc<dyn CaptureProvider>,
    filter: RwLock<Arc<ContentFilter>>,
    inner: Mutex<Inner>,
    outputs: RwLock<Vec<OutputRegistration>>,
    delivering: AtomicBool,
    control: DispatchQueue,
    error_handler: ErrorHandler,
    /// Held while the error handler runs. Reentrant so the handler may
    /// release the stream from the control queue.
    callback_gate: ReentrantMutex<()>,
}

impl StreamSession {
    pub(crate) fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn CaptureProvider>,
        filter: Arc<ContentFilter>,
        config: StreamConfiguration,
        error_handler: ErrorHandler,
    ) -> Result<Arc<Self>, BridgeError> {
        config.validate()?;
        let control = DispatchQueue::new(
            "capturekit.stream.control",
            QueueKind::Serial,
            QosClass::UserInitiated,
        )?;

        Ok(Arc::new(Self {
            id: OnceCell::new(),
            registry,
            provider,
            filter: RwLock::new(filter),
            inner: Mutex::new(Inner {
                state: StreamState::Created,
                config,
                session: None,
                failure: None,
            }),
            outputs: RwLock::new(Vec::new()),
            delivering: AtomicBool::new(false),
            control,
            error_handler,
            callback_gate: ReentrantMutex::new(()),
        }))
    }

    pub(crate) fn bind_id(&self, id: HandleId) {
        if self.id.set(id).is_err() {
            warn!(handle = %id, "Stream already bound to a handle");
        }
    }

    /// The handle this stream is registered under.
    pub fn id(&self) -> Option<HandleId> {
        self.id.get().copied()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    /// Copy of the configuration as of the last accepted update.
    pub fn configuration(&self) -> StreamConfiguration {
        self.inner.lock().config.clone()
    }

    /// The filter the stream captures, as of the last completed update.
    pub fn filter(&self) -> Arc<ContentFilter> {
        self.filter.read().clone()
    }

    #[cfg(test)]
    pub(crate) fn control_queue(&self) -> &DispatchQueue {
        &self.control
    }

    /// Number of registered output handlers of `output_type`.
    pub fn output_count(&self, output_type: OutputType) -> usize {
        self.outputs
            .read()
            .iter()
            .filter(|r| r.output_type == output_type)
            .count()
    }

    /// Register an output handler, on `queue` or on a queue of its own.
    pub fn add_output(
        &self,
        output_type: OutputType,
        handler: OutputHandler,
        queue: Option<Arc<DispatchQueue>>,
    ) -> Result<(), BridgeError> {
        let state = self.state();
        if !state.can_add_output() {
            return Err(BridgeError::InvalidState {
                operation: "add an output to",
                state,
            });
        }

        let queue = match queue {
            Some(queue) if !queue.is_serial() => {
                return Err(BridgeError::InvalidParameter("output queue must be serial"));
            }
            Some(queue) => queue,
            None => Arc::new(DispatchQueue::new(
                format!("capturekit.stream.{output_type}"),
                QueueKind::Serial,
                QosClass::UserInteractive,
            )?),
        };

        debug!(output = %output_type, queue = queue.label(), "Output handler added");
        self.outputs.write().push(OutputRegistration {
            output_type,
            handler,
            queue,
        });
        Ok(())
    }

    /// Remove every handler of `output_type` and wait until none is running.
    pub fn remove_outputs(&self, output_type: OutputType) -> usize {
        let removed: Vec<OutputRegistration> = {
            let mut outputs = self.outputs.write();
            let (removed, kept) = outputs
                .drain(..)
                .partition(|r| r.output_type == output_type);
            *outputs = kept;
            removed
        };

        for registration in &removed {
            registration.queue.barrier();
        }
        debug!(output = %output_type, count = removed.len(), "Output handlers removed");
        removed.len()
    }

    /// Begin capturing. The completion runs once on the control queue.
    #[instrument(name = "stream_start", skip_all, fields(stream = ?self.id()))]
    pub fn start(self: &Arc<Self>, completion: Option<Completion<()>>) -> Result<(), BridgeError> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.can_start() {
                return Err(BridgeError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.transition(StreamState::Starting);
        }

        let this = self.clone();
        self.control.exec_async(move || {
            let result = this.open_session();
            this.complete(completion, result);
        });
        Ok(())
    }

    /// Stop capturing. No output callback runs after the completion.
    ///
    /// If a provider failure was handled first, the completion carries that
    /// error and the stream stays in `Error`.
    #[instrument(name = "stream_stop", skip_all, fields(stream = ?self.id()))]
    pub fn stop(self: &Arc<Self>, completion: Option<Completion<()>>) -> Result<(), BridgeError> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.can_stop() {
                return Err(BridgeError::InvalidState {
                    operation: "stop",
                    state: inner.state,
                });
            }
            inner.transition(StreamState::Stopping);
        }

        let this = self.clone();
        self.control.exec_async(move || {
            this.shutdown_session();
            // A provider failure queued ahead of the stop wins; the stop
            // then reports it instead of success.
            let result = {
                let mut inner = this.inner.lock();
                match inner.state {
                    StreamState::Stopping => {
                        inner.transition(StreamState::Stopped);
                        Ok(())
                    }
                    StreamState::Error => Err(inner.failure.clone().unwrap_or_else(|| {
                        NativeError::from_stream_code(StreamErrorCode::SystemStoppedStream)
                    })),
                    _ => Ok(()),
                }
            };
            match &result {
                Ok(()) => info!(stream = ?this.id(), "Stream stopped"),
                Err(e) => info!(stream = ?this.id(), error = %e, "Stream failed before stopping"),
            }
            this.complete(completion, result);
        });
        Ok(())
    }

    /// Replace the configuration. Validation failures are reported here.
    #[instrument(name = "stream_update_configuration", skip_all, fields(stream = ?self.id()))]
    pub fn update_configuration(
        self: &Arc<Self>,
        config: StreamConfiguration,
        completion: Option<Completion<()>>,
    ) -> Result<(), BridgeError> {
        config.validate()?;
        {
            let mut inner = self.inner.lock();
            if !inner.state.can_update() {
                return Err(BridgeError::InvalidState {
                    operation: "update the configuration of",
                    state: inner.state,
                });
            }
            inner.config = config.clone();
        }

        let this = self.clone();
        self.control.exec_async(move || {
            let result = match this.inner.lock().session.as_mut() {
                Some(session) => session.update_configuration(&config),
                None => Ok(()),
            };
            this.complete(completion, result);
        });
        Ok(())
    }

    /// Retarget the stream. Capturing streams switch content without a
    /// restart; the completion reports whether the provider accepted it.
    #[instrument(name = "stream_update_content_filter", skip_all, fields(stream = ?self.id()))]
    pub fn update_content_filter(
        self: &Arc<Self>,
        filter: Arc<ContentFilter>,
        completion: Option<Completion<()>>,
    ) -> Result<(), BridgeError> {
        let state = self.state();
        if !state.can_update() {
            return Err(BridgeError::InvalidState {
                operation: "update the content filter of",
                state,
            });
        }

        let this = self.clone();
        self.control.exec_async(move || {
            let result = match this.inner.lock().session.as_mut() {
                Some(session) => session.update_content_filter(&filter),
                None => Ok(()),
            };
            if result.is_ok() {
                *this.filter.write() = filter;
                debug!(stream = ?this.id(), "Content filter updated");
            }
            this.complete(completion, result);
        });
        Ok(())
    }

    /// Runs when the last handle to the stream is released.
    pub(crate) fn on_final_release(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == StreamState::Capturing {
                info!(stream = ?self.id(), "Released while capturing, stopping implicitly");
            }
            inner.transition(StreamState::Released);
        }
        self.shutdown_session();

        // Let pending completions and error callbacks finish, so the caller
        // can free their contexts once release returns. Control tasks drain
        // output queues, so waiting from one of those would deadlock; there
        // the gate is enough, since any later error delivery sees `Released`.
        let on_output_queue = self.outputs.read().iter().any(|r| r.queue.is_current());
        if on_output_queue {
            drop(self.callback_gate.lock());
        } else {
            self.control.barrier();
        }
    }

    fn open_session(self: &Arc<Self>) -> Result<(), NativeError> {
        let mut inner = self.inner.lock();
        if inner.state != StreamState::Starting {
            return Err(NativeError::from_stream_code(StreamErrorCode::FailedToStart)
                .with_message("stream was released before it started"));
        }

        self.delivering.store(true, Ordering::SeqCst);
        let sink = Arc::new(StreamSink {
            stream: Arc::downgrade(self),
        });

        let filter = self.filter();
        match self.provider.open_session(&filter, &inner.config, sink) {
            Ok(session) => {
                inner.session = Some(session);
                inner.transition(StreamState::Capturing);
                info!(stream = ?self.id(), "Stream capturing");
                Ok(())
            }
            Err(e) => {
                self.delivering.store(false, Ordering::SeqCst);
                inner.transition(StreamState::Error);
                warn!(stream = ?self.id(), error = %e, "Stream failed to start");
                Err(e)
            }
        }
    }

    /// Disable delivery, stop the provider and drain every output queue.
    fn shutdown_session(&self) {
        self.delivering.store(false, Ordering::SeqCst);

        let session = self.inner.lock().session.take();
        if let Some(mut session) = session {
            session.stop();
        }

        let queues: Vec<Arc<DispatchQueue>> =
            self.outputs.read().iter().map(|r| r.queue.clone()).collect();
        for queue in queues {
            queue.barrier();
        }
    }

    fn complete(&self, completion: Option<Completion<()>>, result: Result<(), NativeError>) {
        match (completion, result) {
            (Some(completion), Ok(())) => completion(Ok(())),
            (Some(completion), Err(e)) => {
                let error = self.registry.insert(NativeObject::Error(Arc::new(e)));
                completion(Err(error));
            }
            (None, Err(e)) => warn!(error = %e, "Stream operation failed without a completion"),
            (None, Ok(())) => {}
        }
    }

    fn deliver(self: &Arc<Self>, output_type: OutputType, sample: Arc<SampleBuffer>) {
        if !self.delivering.load(Ordering::SeqCst) {
            return;
        }
        let Some(stream_id) = self.id() else {
            return;
        };

        for registration in self.outputs.read().iter() {
            if registration.output_type != output_type {
                continue;
            }

            let handler = registration.handler.clone();
            let sample = sample.clone();
            let stream = Arc::downgrade(self);
            registration.queue.exec_async(move || {
                let Some(stream) = stream.upgrade() else {
                    return;
                };
                if !stream.delivering.load(Ordering::SeqCst) {
                    return;
                }

                let sample_id = stream.registry.insert(NativeObject::Sample(sample));
                trace!(stream = %stream_id, sample = %sample_id, output = %output_type, "Delivering sample");
                handler(stream_id, output_type, sample_id);
                if let Err(e) = stream.registry.release(sample_id) {
                    error!(error = %e, "Output handler released a borrowed sample");
                }
            });
        }
    }

    fn fail(self: &Arc<Self>, error: NativeError) {
        let this = self.clone();
        self.control.exec_async(move || {
            {
                let mut inner = this.inner.lock();
                if !matches!(inner.state, StreamState::Capturing | StreamState::Stopping) {
                    debug!(state = %inner.state, error = %error, "Ignoring provider failure");
                    return;
                }
                inner.transition(StreamState::Error);
                inner.failure = Some(error.clone());
            }
            warn!(stream = ?this.id(), error = %error, "Stream failed");

            this.shutdown_session();

            let Some(stream_id) = this.id() else {
                return;
            };
            // An output handler may have released the stream while the
            // queues drained.
            let _gate = this.callback_gate.lock();
            if this.state() == StreamState::Released {
                debug!(stream = %stream_id, "Released during shutdown, dropping error");
                return;
            }
            let error_id = this.registry.insert(NativeObject::Error(Arc::new(error)));
            (this.error_handler)(stream_id, error_id);
            if let Err(e) = this.registry.release(error_id) {
                error!(error = %e, "Error handler released a borrowed error");
            }
        });
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Bridges provider callbacks into the stream without keeping it alive.
struct StreamSink {
    stream: Weak<StreamSession>,
}

impl FrameSink for StreamSink {
    fn did_output(&self, output_type: OutputType, sample: Arc<SampleBuffer>) {
        if let Some(stream) = self.stream.upgrade() {
            stream.deliver(output_type, sample);
        }
    }

    fn did_fail(&self, error: NativeError) {
        if let Some(stream) = self.stream.upgrade() {
            stream.fail(error);
        }
    }
}
