//! The bridge engine: one handle registry, one provider, one worker queue.

use std::sync::Arc;

use capturekit_types::{
    DiscoveryOptions, ErrorKind, FrameInfo, FrameStatus, InvalidConfiguration, MediaTime,
    OutputType, Rect, StreamState,
};
use tracing::{debug, info, instrument, warn};

use crate::content::{ContentSnapshot, Display, RunningApplication, ShareableContent, Window};
use crate::error::{BridgeError, ContractViolation, NativeError};
use crate::filter::ContentFilter;
use crate::handle::HandleId;
use crate::object::{ConfigurationObject, NativeObject, NativeType, Registry};
use crate::pixel_buffer::{Image, PixelBuffer};
use crate::provider::{CaptureProvider, SyntheticProvider};
use crate::queue::{DispatchQueue, QosClass, QueueKind};
use crate::sample_buffer::SampleBuffer;
use crate::stream::{ErrorHandler, OutputHandler, StreamSession};
use crate::Completion;

/// Workers on the queue that runs discovery and screenshot completions.
const WORKER_THREADS: usize = 4;

/// Owns every handle and routes operations to the provider.
pub struct Bridge {
    registry: Arc<Registry>,
    provider: Arc<dyn CaptureProvider>,
    worker: DispatchQueue,
}

impl Bridge {
    /// A bridge over `provider`, with its own registry and worker queue.
    pub fn new(provider: Arc<dyn CaptureProvider>) -> Result<Self, BridgeError> {
        let worker = DispatchQueue::new(
            "capturekit.bridge.worker",
            QueueKind::Concurrent(WORKER_THREADS),
            QosClass::UserInitiated,
        )?;
        info!("Capture bridge created");

        Ok(Self {
            registry: Arc::new(Registry::new()),
            provider,
            worker,
        })
    }

    /// A bridge over the in-process synthetic provider.
    pub fn synthetic() -> Result<Self, BridgeError> {
        Self::new(Arc::new(SyntheticProvider::new()))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn CaptureProvider> {
        &self.provider
    }

    // Generic handle operations.

    /// Register an object and return its first owned handle.
    pub fn register<T: NativeType>(&self, object: Arc<T>) -> HandleId {
        self.registry.insert(T::wrap(object))
    }

    /// The object behind `id`, checked against `T`. Does not retain.
    pub fn borrow<T: NativeType>(&self, id: HandleId) -> Result<Arc<T>, ContractViolation> {
        self.registry.get(id)?.downcast::<T>(id)
    }

    /// Add a reference; returns the same handle.
    pub fn retain(&self, id: HandleId) -> Result<HandleId, ContractViolation> {
        self.registry.retain(id)
    }

    /// Drop a reference. The last release destroys the object and runs its
    /// teardown, such as stopping a stream.
    pub fn release(&self, id: HandleId) -> Result<(), ContractViolation> {
        self.registry.release(id).map(|_| ())
    }

    /// Release a handle that must be of kind `T`.
    pub fn release_as<T: NativeType>(&self, id: HandleId) -> Result<(), ContractViolation> {
        self.borrow::<T>(id)?;
        self.release(id)
    }

    /// Outstanding references to `id`.
    pub fn retain_count(&self, id: HandleId) -> Result<usize, ContractViolation> {
        self.registry.ref_count(id)
    }

    /// Register an error as an owned handle for a caller.
    pub fn register_error(&self, error: NativeError) -> HandleId {
        self.register(Arc::new(error))
    }

    // Discovery.

    /// Enumerate shareable content. The completion runs once on the worker
    /// queue with an owned snapshot or an owned error.
    #[instrument(name = "discover", skip(self, completion))]
    pub fn discover(&self, options: DiscoveryOptions, completion: Completion<HandleId>) {
        let registry = self.registry.clone();
        let provider = self.provider.clone();

        self.worker.exec_async(move || match provider.shareable_content(&options) {
            Ok(content) => {
                debug!(
                    displays = content.displays.len(),
                    windows = content.windows.len(),
                    applications = content.applications.len(),
                    "Content discovered"
                );
                completion(Ok(register_content(&registry, content)));
            }
            Err(e) => {
                warn!(error = %e, "Content discovery failed");
                completion(Err(registry.insert(NativeObject::Error(Arc::new(e)))));
            }
        });
    }

    /// Register a snapshot and all of its elements.
    pub fn register_content(&self, content: ShareableContent) -> HandleId {
        register_content(&self.registry, content)
    }

    /// A new owned handle to the window's application, if it has one.
    pub fn window_owning_application(
        &self,
        window: HandleId,
    ) -> Result<Option<HandleId>, ContractViolation> {
        let window = self.borrow::<Window>(window)?;
        Ok(window
            .owning_application
            .clone()
            .map(|app| self.register(app)))
    }

    // Filters.

    pub fn filter_display_excluding_windows(
        &self,
        display: HandleId,
        windows: &[HandleId],
    ) -> Result<HandleId, ContractViolation> {
        let display = self.borrow::<Display>(display)?;
        let windows = self.borrow_all::<Window>(windows)?;
        Ok(self.register(Arc::new(ContentFilter::display_excluding_windows(
            &display, &windows,
        ))))
    }

    pub fn filter_display_including_windows(
        &self,
        display: HandleId,
        windows: &[HandleId],
    ) -> Result<HandleId, ContractViolation> {
        let display = self.borrow::<Display>(display)?;
        let windows = self.borrow_all::<Window>(windows)?;
        Ok(self.register(Arc::new(ContentFilter::display_including_windows(
            &display, &windows,
        ))))
    }

    pub fn filter_display_including_applications(
        &self,
        display: HandleId,
        applications: &[HandleId],
        excepting_windows: &[HandleId],
    ) -> Result<HandleId, ContractViolation> {
        let display = self.borrow::<Display>(display)?;
        let applications = self.borrow_all::<RunningApplication>(applications)?;
        let windows = self.borrow_all::<Window>(excepting_windows)?;
        Ok(self.register(Arc::new(ContentFilter::display_including_applications(
            &display,
            &applications,
            &windows,
        ))))
    }

    pub fn filter_desktop_independent_window(
        &self,
        window: HandleId,
    ) -> Result<HandleId, ContractViolation> {
        let window = self.borrow::<Window>(window)?;
        Ok(self.register(Arc::new(ContentFilter::desktop_independent_window(&window))))
    }

    // Configuration and queues.

    pub fn create_configuration(&self) -> HandleId {
        self.register(Arc::new(ConfigurationObject::default()))
    }

    pub fn create_queue(
        &self,
        label: &str,
        kind: QueueKind,
        qos: QosClass,
    ) -> Result<HandleId, BridgeError> {
        let queue = DispatchQueue::new(label, kind, qos)?;
        Ok(self.register(Arc::new(queue)))
    }

    // Streams.

    /// Create a stream. The error handler is mandatory.
    #[instrument(name = "stream_create", skip(self, error_handler))]
    pub fn create_stream(
        &self,
        filter: HandleId,
        configuration: HandleId,
        error_handler: Option<ErrorHandler>,
    ) -> Result<HandleId, BridgeError> {
        let filter = self.borrow::<ContentFilter>(filter)?;
        let config = self.borrow::<ConfigurationObject>(configuration)?.snapshot();
        let Some(error_handler) = error_handler else {
            return Err(InvalidConfiguration::MissingErrorHandler.into());
        };

        let stream = StreamSession::new(
            self.registry.clone(),
            self.provider.clone(),
            filter,
            config,
            error_handler,
        )?;
        let id = self.register(stream.clone());
        stream.bind_id(id);

        info!(stream = %id, "Stream created");
        Ok(id)
    }

    /// Register an output handler. See [`StreamSession::add_output`].
    pub fn stream_add_output(
        &self,
        stream: HandleId,
        output_type: OutputType,
        handler: OutputHandler,
        queue: Option<HandleId>,
    ) -> Result<(), BridgeError> {
        let stream = self.borrow::<StreamSession>(stream)?;
        let queue = queue
            .map(|q| self.borrow::<DispatchQueue>(q))
            .transpose()?;
        stream.add_output(output_type, handler, queue)
    }

    /// Remove every handler of `output_type`; returns how many there were.
    pub fn stream_remove_output(
        &self,
        stream: HandleId,
        output_type: OutputType,
    ) -> Result<usize, BridgeError> {
        Ok(self.borrow::<StreamSession>(stream)?.remove_outputs(output_type))
    }

    pub fn stream_start(
        &self,
        stream: HandleId,
        completion: Option<Completion<()>>,
    ) -> Result<(), BridgeError> {
        self.borrow::<StreamSession>(stream)?.start(completion)
    }

    pub fn stream_stop(
        &self,
        stream: HandleId,
        completion: Option<Completion<()>>,
    ) -> Result<(), BridgeError> {
        self.borrow::<StreamSession>(stream)?.stop(completion)
    }

    pub fn stream_update_configuration(
        &self,
        stream: HandleId,
        configuration: HandleId,
        completion: Option<Completion<()>>,
    ) -> Result<(), BridgeError> {
        let stream = self.borrow::<StreamSession>(stream)?;
        let config = self.borrow::<ConfigurationObject>(configuration)?.snapshot();
        stream.update_configuration(config, completion)
    }

    /// See [`StreamSession::update_content_filter`].
    pub fn stream_update_content_filter(
        &self,
        stream: HandleId,
        filter: HandleId,
        completion: Option<Completion<()>>,
    ) -> Result<(), BridgeError> {
        let stream = self.borrow::<StreamSession>(stream)?;
        let filter = self.borrow::<ContentFilter>(filter)?;
        stream.update_content_filter(filter, completion)
    }

    pub fn stream_state(&self, stream: HandleId) -> Result<StreamState, ContractViolation> {
        Ok(self.borrow::<StreamSession>(stream)?.state())
    }

    // Screenshots.

    /// Capture one still image. The completion runs once on the worker queue
    /// with an owned image or an owned error.
    #[instrument(name = "screenshot_capture", skip(self, completion))]
    pub fn capture_screenshot(
        &self,
        filter: HandleId,
        configuration: HandleId,
        completion: Completion<HandleId>,
    ) -> Result<(), BridgeError> {
        let filter = self.borrow::<ContentFilter>(filter)?;
        let config = self.borrow::<ConfigurationObject>(configuration)?.snapshot();

        self.capture_on_worker(completion, move |provider| {
            config.validate()?;
            let buffer = provider.capture_image(&filter, &config)?;
            debug!(width = buffer.width(), height = buffer.height(), "Screenshot captured");
            Ok(NativeObject::Image(Arc::new(Image::new(buffer))))
        });
        Ok(())
    }

    /// Like [`capture_screenshot`](Self::capture_screenshot), delivering an
    /// owned video sample buffer instead of an image.
    #[instrument(name = "screenshot_capture_sample_buffer", skip(self, completion))]
    pub fn capture_sample_buffer(
        &self,
        filter: HandleId,
        configuration: HandleId,
        completion: Completion<HandleId>,
    ) -> Result<(), BridgeError> {
        let filter = self.borrow::<ContentFilter>(filter)?;
        let config = self.borrow::<ConfigurationObject>(configuration)?.snapshot();

        self.capture_on_worker(completion, move |provider| {
            config.validate()?;
            let buffer = provider.capture_image(&filter, &config)?;
            let info = FrameInfo {
                status: FrameStatus::Complete,
                display_time: 0,
                content_rect: Rect::new(0.0, 0.0, f64::from(buffer.width()), f64::from(buffer.height())),
                content_scale: 1.0,
                scale_factor: filter.point_pixel_scale(),
                sequence: 0,
            };
            debug!(width = buffer.width(), height = buffer.height(), "Screenshot sample captured");
            let sample = SampleBuffer::video(MediaTime::zero(), MediaTime::zero(), info, Some(buffer));
            Ok(NativeObject::Sample(Arc::new(sample)))
        });
        Ok(())
    }

    /// Capture a region of the desktop, in points, independent of any
    /// filter. An empty or non-finite rect is rejected here.
    #[instrument(name = "screenshot_capture_in_rect", skip(self, completion))]
    pub fn capture_image_in_rect(
        &self,
        rect: Rect,
        completion: Completion<HandleId>,
    ) -> Result<(), BridgeError> {
        let finite = [rect.min_x(), rect.min_y(), rect.width(), rect.height()]
            .iter()
            .all(|v| v.is_finite());
        if !finite || rect.is_empty() {
            return Err(BridgeError::InvalidParameter("capture rect must be finite and non-empty"));
        }

        self.capture_on_worker(completion, move |provider| {
            let buffer = provider.capture_image_in_rect(rect)?;
            debug!(width = buffer.width(), height = buffer.height(), "Region captured");
            Ok(NativeObject::Image(Arc::new(Image::new(buffer))))
        });
        Ok(())
    }

    /// Run a capture on the worker queue and complete with an owned result
    /// or an owned error.
    fn capture_on_worker(
        &self,
        completion: Completion<HandleId>,
        capture: impl FnOnce(&dyn CaptureProvider) -> Result<NativeObject, NativeError> + Send + 'static,
    ) {
        let registry = self.registry.clone();
        let provider = self.provider.clone();

        self.worker.exec_async(move || match capture(provider.as_ref()) {
            Ok(object) => completion(Ok(registry.insert(object))),
            Err(e) => {
                warn!(error = %e, "Screenshot failed");
                completion(Err(registry.insert(NativeObject::Error(Arc::new(e)))));
            }
        });
    }

    // Buffers.

    /// A new owned handle to the sample's pixel buffer, if it has one.
    pub fn sample_pixel_buffer(&self, sample: HandleId) -> Result<Option<HandleId>, ContractViolation> {
        let sample = self.borrow::<SampleBuffer>(sample)?;
        Ok(sample
            .pixel_buffer()
            .map(|buffer| self.register(Arc::new(buffer.clone()))))
    }

    /// A new owned handle to the image's pixel buffer.
    pub fn image_pixel_buffer(&self, image: HandleId) -> Result<HandleId, ContractViolation> {
        let image = self.borrow::<Image>(image)?;
        Ok(self.register(Arc::new(image.pixel_buffer().clone())))
    }

    /// A new owned handle to the surface behind a pixel buffer.
    pub fn pixel_buffer_surface(&self, buffer: HandleId) -> Result<HandleId, ContractViolation> {
        let buffer = self.borrow::<PixelBuffer>(buffer)?;
        Ok(self.registry.insert(NativeObject::Surface(buffer.surface().clone())))
    }

    /// Kind of an error handle.
    pub fn error_kind(&self, error: HandleId) -> Result<ErrorKind, ContractViolation> {
        Ok(self.borrow::<NativeError>(error)?.kind)
    }

    fn borrow_all<T: NativeType>(&self, ids: &[HandleId]) -> Result<Vec<Arc<T>>, ContractViolation> {
        ids.iter().map(|&id| self.borrow::<T>(id)).collect()
    }
}

fn register_content(registry: &Registry, content: ShareableContent) -> HandleId {
    let displays = content
        .displays
        .iter()
        .map(|d| registry.insert(NativeObject::Display(d.clone())))
        .collect();
    let windows = content
        .windows
        .iter()
        .map(|w| registry.insert(NativeObject::Window(w.clone())))
        .collect();
    let applications = content
        .applications
        .iter()
        .map(|a| registry.insert(NativeObject::Application(a.clone())))
        .collect();

    let snapshot = ContentSnapshot::new(content, displays, windows, applications);
    registry.insert(NativeObject::Content(Arc::new(snapshot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    use capturekit_types::{PixelFormat, StreamErrorCode};
    use crossbeam_channel::{Receiver, Sender};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn completion<T: Send + 'static>() -> (Completion<T>, Receiver<Result<T, HandleId>>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (Box::new(move |result| tx.send(result).unwrap()), rx)
    }

    fn discover(bridge: &Bridge) -> HandleId {
        let (done, rx) = completion();
        bridge.discover(DiscoveryOptions::default(), done);
        rx.recv_timeout(TIMEOUT).unwrap().unwrap()
    }

    fn first_display(bridge: &Bridge, content: HandleId) -> HandleId {
        bridge.borrow::<ContentSnapshot>(content).unwrap().display_handles()[0]
    }

    fn small_config(bridge: &Bridge) -> HandleId {
        let id = bridge.create_configuration();
        bridge
            .borrow::<ConfigurationObject>(id)
            .unwrap()
            .update(|c| {
                c.width = 64;
                c.height = 32;
                c.minimum_frame_interval = 0.005;
            });
        id
    }

    fn display_filter(bridge: &Bridge) -> HandleId {
        let content = discover(bridge);
        let filter = bridge
            .filter_display_excluding_windows(first_display(bridge, content), &[])
            .unwrap();
        bridge.release(content).unwrap();
        filter
    }

    struct Harness {
        bridge: Arc<Bridge>,
        stream: HandleId,
        errors: Receiver<String>,
    }

    fn harness(provider: Arc<SyntheticProvider>) -> Harness {
        let bridge = Arc::new(Bridge::new(provider).unwrap());
        let filter = display_filter(&bridge);
        let config = small_config(&bridge);

        let (error_tx, errors) = crossbeam_channel::unbounded();
        let weak = Arc::downgrade(&bridge);
        let handler: ErrorHandler = Arc::new(move |_stream, error| {
            if let Some(bridge) = weak.upgrade() {
                let message = bridge.borrow::<NativeError>(error).unwrap().describe();
                let _ = error_tx.send(message);
            }
        });

        let stream = bridge.create_stream(filter, config, Some(handler)).unwrap();
        bridge.release(filter).unwrap();
        bridge.release(config).unwrap();
        Harness {
            bridge,
            stream,
            errors,
        }
    }

    fn counting_output(
        bridge: &Arc<Bridge>,
        stream: HandleId,
    ) -> (Arc<AtomicU64>, Arc<AtomicBool>) {
        let count = Arc::new(AtomicU64::new(0));
        let after_stop = Arc::new(AtomicBool::new(false));
        let (c, flag) = (count.clone(), after_stop.clone());
        let handler: OutputHandler = Arc::new(move |_, _, _| {
            if flag.load(Ordering::SeqCst) {
                panic!("output after stop completion");
            }
            c.fetch_add(1, Ordering::SeqCst);
        });
        bridge
            .stream_add_output(stream, OutputType::Screen, handler, None)
            .unwrap();
        (count, after_stop)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + TIMEOUT;
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_discovery_delivers_owned_snapshot() {
        let bridge = Bridge::synthetic().unwrap();
        let content = discover(&bridge);
        let snapshot = bridge.borrow::<ContentSnapshot>(content).unwrap();
        assert_eq!(snapshot.display_handles().len(), 2);
        assert_eq!(bridge.retain_count(content).unwrap(), 1);
    }

    #[test]
    fn test_discovery_failure_delivers_error() {
        let bridge =
            Bridge::new(Arc::new(SyntheticProvider::builder().permission_denied(true).build()))
                .unwrap();
        let (done, rx) = completion();
        bridge.discover(DiscoveryOptions::default(), done);

        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(bridge.error_kind(error).unwrap(), ErrorKind::PermissionDenied);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_snapshot_release_cascades_unless_retained() {
        let bridge = Bridge::synthetic().unwrap();
        let content = discover(&bridge);
        let snapshot = bridge.borrow::<ContentSnapshot>(content).unwrap();
        let (kept, lost) = (snapshot.display_handles()[0], snapshot.display_handles()[1]);
        drop(snapshot);

        bridge.retain(kept).unwrap();
        bridge.release(content).unwrap();

        assert_eq!(bridge.borrow::<Display>(kept).unwrap().display_id, 1);
        assert_eq!(
            bridge.borrow::<Display>(lost).unwrap_err(),
            ContractViolation::Released(lost)
        );
        bridge.release(kept).unwrap();
    }

    #[test]
    fn test_filter_outlives_snapshot() {
        let bridge = Bridge::synthetic().unwrap();
        let filter = display_filter(&bridge);
        let filter = bridge.borrow::<ContentFilter>(filter).unwrap();
        assert_eq!(filter.display().unwrap().display_id, 1);
    }

    #[test]
    fn test_filter_rejects_wrong_kind() {
        let bridge = Bridge::synthetic().unwrap();
        let config = bridge.create_configuration();
        assert!(matches!(
            bridge.filter_desktop_independent_window(config),
            Err(ContractViolation::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_owning_application_is_new_handle() {
        let bridge = Bridge::synthetic().unwrap();
        let content = discover(&bridge);
        let window = bridge.borrow::<ContentSnapshot>(content).unwrap().window_handles()[1];

        let app = bridge.window_owning_application(window).unwrap().unwrap();
        bridge.release(content).unwrap();

        let app = bridge.borrow::<RunningApplication>(app).unwrap();
        assert_eq!(app.bundle_identifier, "com.example.editor");
    }

    #[test]
    fn test_stream_requires_error_handler() {
        let bridge = Bridge::synthetic().unwrap();
        let filter = display_filter(&bridge);
        let config = bridge.create_configuration();
        let err = bridge.create_stream(filter, config, None).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Configuration(InvalidConfiguration::MissingErrorHandler)
        ));
    }

    #[test]
    fn test_stream_rejects_invalid_configuration() {
        let bridge = Bridge::synthetic().unwrap();
        let filter = display_filter(&bridge);
        let config = bridge.create_configuration();
        bridge
            .borrow::<ConfigurationObject>(config)
            .unwrap()
            .update(|c| c.width = 0);

        let handler: ErrorHandler = Arc::new(|_, _| {});
        let err = bridge.create_stream(filter, config, Some(handler)).unwrap_err();
        assert_eq!(err.status(), capturekit_types::Status::ConfigurationError);
    }

    #[test]
    fn test_start_twice_is_invalid_state() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(h.bridge.stream_state(h.stream).unwrap(), StreamState::Capturing);

        let (done, rx) = completion::<()>();
        let err = h.bridge.stream_start(h.stream, Some(done)).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState { .. }));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(h.bridge.stream_state(h.stream).unwrap(), StreamState::Capturing);

        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_stop_before_start_is_invalid_state() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        assert!(matches!(
            h.bridge.stream_stop(h.stream, None),
            Err(BridgeError::InvalidState { state: StreamState::Created, .. })
        ));
    }

    #[test]
    fn test_no_output_after_stop_completion() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let (count, after_stop) = counting_output(&h.bridge, h.stream);

        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        wait_until(|| count.load(Ordering::SeqCst) >= 3);

        let (done, rx) = completion();
        let flag = after_stop.clone();
        h.bridge
            .stream_stop(
                h.stream,
                Some(Box::new(move |result| {
                    flag.store(true, Ordering::SeqCst);
                    done(result);
                })),
            )
            .unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();

        let frames = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), frames);
        assert_eq!(h.bridge.stream_state(h.stream).unwrap(), StreamState::Stopped);
        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_samples_are_borrowed_during_callback() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let (tx, rx): (Sender<HandleId>, _) = crossbeam_channel::unbounded();
        let weak = Arc::downgrade(&h.bridge);
        let handler: OutputHandler = Arc::new(move |_, output_type, sample| {
            assert_eq!(output_type, OutputType::Screen);
            if let Some(bridge) = weak.upgrade() {
                let buffer = bridge.sample_pixel_buffer(sample).unwrap().unwrap();
                let _ = tx.send(buffer);
                let _ = tx.send(sample);
            }
        });
        h.bridge
            .stream_add_output(h.stream, OutputType::Screen, handler, None)
            .unwrap();

        h.bridge.stream_start(h.stream, None).unwrap();
        let buffer = rx.recv_timeout(TIMEOUT).unwrap();
        let sample = rx.recv_timeout(TIMEOUT).unwrap();
        h.bridge.release(h.stream).unwrap();

        // The sample handle died with the callback; the buffer we took is ours.
        assert!(h.bridge.borrow::<SampleBuffer>(sample).is_err());
        let buffer_obj = h.bridge.borrow::<PixelBuffer>(buffer).unwrap();
        assert_eq!((buffer_obj.width(), buffer_obj.height()), (64, 32));
        h.bridge.release(buffer).unwrap();
    }

    #[test]
    fn test_provider_failure_reaches_error_handler() {
        let h = harness(Arc::new(SyntheticProvider::builder().fail_after_frames(2).build()));
        h.bridge.stream_start(h.stream, None).unwrap();

        let message = h.errors.recv_timeout(TIMEOUT).unwrap();
        assert!(message.contains(&StreamErrorCode::SystemStoppedStream.as_raw().to_string()));
        wait_until(|| h.bridge.stream_state(h.stream).unwrap() == StreamState::Error);
        assert!(h.errors.recv_timeout(Duration::from_millis(50)).is_err());
        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_start_failure_completes_with_error() {
        let provider = Arc::new(SyntheticProvider::new());
        let h = harness(provider.clone());
        provider.set_permission_denied(true);

        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();
        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(h.bridge.error_kind(error).unwrap(), ErrorKind::PermissionDenied);
        assert_eq!(h.bridge.stream_state(h.stream).unwrap(), StreamState::Error);
        h.bridge.release(error).unwrap();
        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_release_while_capturing_stops() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let (count, _) = counting_output(&h.bridge, h.stream);

        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        wait_until(|| count.load(Ordering::SeqCst) >= 1);

        h.bridge.release(h.stream).unwrap();
        let frames = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), frames);
        assert_eq!(
            h.bridge.stream_state(h.stream).unwrap_err(),
            ContractViolation::Released(h.stream)
        );
    }

    #[test]
    fn test_release_with_pending_start() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let stream = h.bridge.borrow::<StreamSession>(h.stream).unwrap();

        // Block the control queue so the start stays pending.
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        stream.control_queue().exec_async(move || {
            let _ = gate_rx.recv();
        });

        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();

        // Release waits for the control queue, so open the gate elsewhere.
        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            gate_tx.send(()).unwrap();
        });
        h.bridge.release(h.stream).unwrap();
        opener.join().unwrap();

        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(h.bridge.error_kind(error).unwrap(), ErrorKind::Stream);
        assert_eq!(stream.state(), StreamState::Released);
    }

    #[test]
    fn test_update_configuration_states() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let config = small_config(&h.bridge);

        let (done, rx) = completion();
        h.bridge
            .stream_update_configuration(h.stream, config, Some(done))
            .unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();

        h.bridge
            .borrow::<ConfigurationObject>(config)
            .unwrap()
            .update(|c| c.channel_count = 5);
        let err = h
            .bridge
            .stream_update_configuration(h.stream, config, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_update_content_filter_retargets_stream() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let content = discover(&h.bridge);
        let second = h.bridge.borrow::<ContentSnapshot>(content).unwrap().display_handles()[1];
        let retina = h.bridge.filter_display_excluding_windows(second, &[]).unwrap();
        h.bridge.release(content).unwrap();
        let stream = h.bridge.borrow::<StreamSession>(h.stream).unwrap();

        let (done, rx) = completion();
        h.bridge
            .stream_update_content_filter(h.stream, retina, Some(done))
            .unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(stream.filter().display().unwrap().display_id, 2);

        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();

        let ghost = Display::new(99, capturekit_types::Rect::new(0.0, 0.0, 10.0, 10.0), 1.0);
        let ghost = h
            .bridge
            .register(Arc::new(ContentFilter::display_excluding_windows(&ghost, &[])));
        let (done, rx) = completion();
        h.bridge
            .stream_update_content_filter(h.stream, ghost, Some(done))
            .unwrap();
        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(h.bridge.error_kind(error).unwrap(), ErrorKind::ContentUnavailable);
        assert_eq!(stream.filter().display().unwrap().display_id, 2);
        assert_eq!(h.bridge.stream_state(h.stream).unwrap(), StreamState::Capturing);

        let (done, rx) = completion();
        h.bridge.stream_stop(h.stream, Some(done)).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        let err = h
            .bridge
            .stream_update_content_filter(h.stream, retina, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState { state: StreamState::Stopped, .. }));

        h.bridge.release(error).unwrap();
        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_no_error_callback_after_release_from_output_handler() {
        let bridge = Arc::new(
            Bridge::new(Arc::new(SyntheticProvider::builder().fail_after_frames(1).build())).unwrap(),
        );
        let filter = display_filter(&bridge);
        let config = small_config(&bridge);
        bridge
            .borrow::<ConfigurationObject>(config)
            .unwrap()
            .update(|c| c.minimum_frame_interval = 0.05);

        let released = Arc::new(AtomicBool::new(false));
        let (error_tx, errors) = crossbeam_channel::unbounded();
        let flag = released.clone();
        let error_handler: ErrorHandler = Arc::new(move |_, _| {
            let _ = error_tx.send(flag.load(Ordering::SeqCst));
        });
        let stream = bridge.create_stream(filter, config, Some(error_handler)).unwrap();
        bridge.release(filter).unwrap();
        bridge.release(config).unwrap();

        // The failure lands while this handler is still running.
        let weak = Arc::downgrade(&bridge);
        let (flag, releasing) = (released.clone(), Arc::new(AtomicBool::new(false)));
        let handler: OutputHandler = Arc::new(move |stream, _, _| {
            if releasing.swap(true, Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(Duration::from_millis(200));
            if let Some(bridge) = weak.upgrade() {
                bridge.release(stream).unwrap();
            }
            flag.store(true, Ordering::SeqCst);
        });
        bridge
            .stream_add_output(stream, OutputType::Screen, handler, None)
            .unwrap();
        bridge.stream_start(stream, None).unwrap();

        wait_until(|| released.load(Ordering::SeqCst));
        if let Ok(after_release) = errors.recv_timeout(Duration::from_millis(300)) {
            assert!(!after_release, "error callback ran after release returned");
        }
        assert_eq!(
            bridge.stream_state(stream).unwrap_err(),
            ContractViolation::Released(stream)
        );
    }

    #[test]
    fn test_stop_reports_failure_handled_first() {
        let h = harness(Arc::new(SyntheticProvider::builder().fail_after_frames(1).build()));
        let (count, _) = counting_output(&h.bridge, h.stream);
        let stream = h.bridge.borrow::<StreamSession>(h.stream).unwrap();
        let config = small_config(&h.bridge);
        h.bridge
            .borrow::<ConfigurationObject>(config)
            .unwrap()
            .update(|c| c.minimum_frame_interval = 0.05);
        h.bridge.stream_update_configuration(h.stream, config, None).unwrap();
        h.bridge.release(config).unwrap();

        let (done, rx) = completion();
        h.bridge.stream_start(h.stream, Some(done)).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap().unwrap();

        // Hold the control queue so the failure and the stop queue up in order.
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        stream.control_queue().exec_async(move || {
            let _ = gate_rx.recv();
        });
        wait_until(|| count.load(Ordering::SeqCst) >= 1);
        std::thread::sleep(Duration::from_millis(150));

        let (done, rx) = completion();
        h.bridge.stream_stop(h.stream, Some(done)).unwrap();
        gate_tx.send(()).unwrap();

        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(h.bridge.error_kind(error).unwrap(), ErrorKind::Stream);
        assert_eq!(h.bridge.stream_state(h.stream).unwrap(), StreamState::Error);
        assert!(h.errors.recv_timeout(TIMEOUT).is_ok());

        h.bridge.release(error).unwrap();
        h.bridge.release(h.stream).unwrap();
    }

    #[test]
    fn test_output_queue_must_be_serial() {
        let h = harness(Arc::new(SyntheticProvider::new()));
        let queue = h
            .bridge
            .create_queue("test.concurrent", QueueKind::Concurrent(2), QosClass::Default)
            .unwrap();
        let handler: OutputHandler = Arc::new(|_, _, _| {});
        let err = h
            .bridge
            .stream_add_output(h.stream, OutputType::Screen, handler, Some(queue))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParameter(_)));
    }

    #[test]
    fn test_screenshot_dimensions() {
        let bridge = Bridge::synthetic().unwrap();
        let filter = display_filter(&bridge);
        let config = bridge.create_configuration();
        bridge
            .borrow::<ConfigurationObject>(config)
            .unwrap()
            .update(|c| c.pixel_format = PixelFormat::Bgra32);

        let (done, rx) = completion();
        bridge.capture_screenshot(filter, config, done).unwrap();
        let image = rx.recv_timeout(TIMEOUT).unwrap().unwrap();

        let buffer = bridge.image_pixel_buffer(image).unwrap();
        let buffer = bridge.borrow::<PixelBuffer>(buffer).unwrap();
        let plane = buffer.plane(0).unwrap();
        assert_eq!((plane.width, plane.height), (1920, 1080));
        assert!(plane.bytes_per_row >= 1920 * 4);
    }

    #[test]
    fn test_screenshot_invalid_configuration_is_async() {
        let bridge = Bridge::synthetic().unwrap();
        let filter = display_filter(&bridge);
        let config = bridge.create_configuration();
        bridge
            .borrow::<ConfigurationObject>(config)
            .unwrap()
            .update(|c| c.height = 0);

        let (done, rx) = completion();
        bridge.capture_screenshot(filter, config, done).unwrap();
        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(bridge.error_kind(error).unwrap(), ErrorKind::Configuration);
    }

    #[test]
    fn test_screenshot_sample_buffer_is_owned() {
        let bridge = Bridge::synthetic().unwrap();
        let filter = display_filter(&bridge);
        let config = small_config(&bridge);

        let (done, rx) = completion();
        bridge.capture_sample_buffer(filter, config, done).unwrap();
        let sample = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        bridge.release(filter).unwrap();
        bridge.release(config).unwrap();

        assert_eq!(bridge.retain_count(sample).unwrap(), 1);
        let object = bridge.borrow::<SampleBuffer>(sample).unwrap();
        assert_eq!(object.output_type, OutputType::Screen);
        let info = object.frame_info().unwrap();
        assert_eq!(info.status, capturekit_types::FrameStatus::Complete);
        assert_eq!(info.scale_factor, 1.0);
        drop(object);

        let buffer = bridge.sample_pixel_buffer(sample).unwrap().unwrap();
        bridge.release(sample).unwrap();
        let buffer_obj = bridge.borrow::<PixelBuffer>(buffer).unwrap();
        assert_eq!((buffer_obj.width(), buffer_obj.height()), (64, 32));
        bridge.release(buffer).unwrap();
    }

    #[test]
    fn test_capture_image_in_rect() {
        let bridge = Bridge::synthetic().unwrap();

        let (done, rx) = completion();
        bridge
            .capture_image_in_rect(Rect::new(1900.0, 100.0, 40.0, 30.0), done)
            .unwrap();
        let image = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
        let image_obj = bridge.borrow::<Image>(image).unwrap();
        assert_eq!((image_obj.width(), image_obj.height()), (80, 60));
        drop(image_obj);
        bridge.release(image).unwrap();

        let (done, rx) = completion();
        bridge
            .capture_image_in_rect(Rect::new(-100.0, -100.0, 10.0, 10.0), done)
            .unwrap();
        let error = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert_eq!(bridge.error_kind(error).unwrap(), ErrorKind::ContentUnavailable);

        let (done, rx) = completion();
        let err = bridge
            .capture_image_in_rect(Rect::new(0.0, 0.0, 0.0, 10.0), done)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParameter(_)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
