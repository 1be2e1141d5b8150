//! In-process provider that renders test patterns.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use capturekit_types::{
    AudioFormat, DiscoveryOptions, FrameInfo, FrameStatus, MediaTime, OutputType, PixelFormat,
    Rect, StreamConfiguration, StreamErrorCode,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use super::pool::SurfacePool;
use super::{CaptureProvider, FrameSink, ProviderSession};
use crate::content::{Display, RunningApplication, ShareableContent, Window};
use crate::error::NativeError;
use crate::filter::ContentFilter;
use crate::pixel_buffer::PixelBuffer;
use crate::sample_buffer::SampleBuffer;
use crate::surface::SurfaceWriter;

/// Floor for unthrottled streams.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Audio frames per delivered buffer.
const AUDIO_FRAMES_PER_BUFFER: usize = 1024;

const SYSTEM_AUDIO_TONE_HZ: f32 = 440.0;
const MICROPHONE_TONE_HZ: f32 = 220.0;

/// A provider that fabricates content, frames and audio in-process.
pub struct SyntheticProvider {
    content: Arc<RwLock<ShareableContent>>,
    permission_denied: AtomicBool,
    fail_after_frames: Option<u64>,
    discovery_delay: Option<Duration>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SyntheticProviderBuilder {
        SyntheticProviderBuilder::default()
    }

    /// Two displays, a desktop window and a few application windows.
    pub fn default_content() -> ShareableContent {
        let desktop = Arc::new(RunningApplication::new("com.example.desktop", "Desktop", 100));
        let editor = Arc::new(RunningApplication::new("com.example.editor", "Editor", 200));
        let terminal = Arc::new(RunningApplication::new("com.example.terminal", "Terminal", 300));

        let window = |window_id: u32,
                      title: &str,
                      frame: Rect,
                      window_layer: i32,
                      is_on_screen: bool,
                      is_desktop: bool,
                      owner: &Arc<RunningApplication>| {
            Arc::new(Window {
                window_id,
                title: Some(title.to_string()),
                frame,
                window_layer,
                is_on_screen,
                is_desktop,
                owning_application: Some(owner.clone()),
            })
        };

        ShareableContent {
            displays: vec![
                Arc::new(Display::new(1, Rect::new(0.0, 0.0, 1920.0, 1080.0), 1.0)),
                Arc::new(Display::new(2, Rect::new(1920.0, 0.0, 2560.0, 1440.0), 2.0)),
            ],
            windows: vec![
                window(10, "Desktop", Rect::new(0.0, 0.0, 1920.0, 1080.0), -2_147_483_623, true, true, &desktop),
                window(11, "main.rs - Editor", Rect::new(100.0, 100.0, 1280.0, 800.0), 0, true, false, &editor),
                window(12, "Terminal", Rect::new(200.0, 200.0, 800.0, 600.0), 0, true, false, &terminal),
                window(13, "Preferences", Rect::new(300.0, 300.0, 480.0, 360.0), 0, false, false, &editor),
            ],
            applications: vec![desktop, editor, terminal],
        }
    }

    /// Deny (or grant) capture permission from now on.
    pub fn set_permission_denied(&self, denied: bool) {
        self.permission_denied.store(denied, Ordering::SeqCst);
    }

    /// Replace the content reported by discovery and used to resolve filters.
    pub fn set_content(&self, content: ShareableContent) {
        *self.content.write() = content;
    }

    fn check_permission(&self) -> Result<(), NativeError> {
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(NativeError::from_stream_code(StreamErrorCode::UserDeclined));
        }
        Ok(())
    }

    fn resolve(&self, filter: &ContentFilter) -> Result<(Rect, f64), NativeError> {
        resolve(&self.content, filter)
    }
}

/// Content rect (points) and scale of the filter's target, if it still exists.
fn resolve(content: &RwLock<ShareableContent>, filter: &ContentFilter) -> Result<(Rect, f64), NativeError> {
    let content = content.read();
    let found = match (filter.display(), filter.window()) {
        (Some(display), _) => content.display(display.display_id).is_some(),
        (None, Some(window)) => content.window(window.window_id).is_some(),
        (None, None) => false,
    };

    if !found {
        return Err(NativeError::from_stream_code(StreamErrorCode::NoCaptureSource));
    }
    Ok((filter.content_rect(), filter.point_pixel_scale()))
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureProvider for SyntheticProvider {
    #[instrument(name = "synthetic_shareable_content", skip(self))]
    fn shareable_content(&self, options: &DiscoveryOptions) -> Result<ShareableContent, NativeError> {
        if let Some(delay) = self.discovery_delay {
            thread::sleep(delay);
        }
        self.check_permission()?;
        Ok(self.content.read().clone().filtered(options))
    }

    #[instrument(name = "synthetic_open_session", skip_all, fields(width = config.width, height = config.height))]
    fn open_session(
        &self,
        filter: &ContentFilter,
        config: &StreamConfiguration,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Box<dyn ProviderSession>, NativeError> {
        self.check_permission()?;
        let (source, scale_factor) = self.resolve(filter)?;
        let source = Arc::new(Mutex::new((source, scale_factor)));

        let config = Arc::new(Mutex::new(config.clone()));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let mut threads = Vec::new();

        let video = VideoProducer {
            sink: sink.clone(),
            config: config.clone(),
            source: source.clone(),
            fail_after: self.fail_after_frames,
        };
        let rx = stop_rx.clone();
        threads.push(
            thread::Builder::new()
                .name("synthetic-video".into())
                .spawn(move || video.run(rx))
                .map_err(spawn_error)?,
        );

        let (captures_audio, captures_microphone) = {
            let config = config.lock();
            (config.captures_audio, config.captures_microphone)
        };
        for (enabled, output_type, tone) in [
            (captures_audio, OutputType::Audio, SYSTEM_AUDIO_TONE_HZ),
            (captures_microphone, OutputType::Microphone, MICROPHONE_TONE_HZ),
        ] {
            if !enabled {
                continue;
            }
            let audio = AudioProducer {
                sink: sink.clone(),
                config: config.clone(),
                output_type,
                tone,
            };
            let rx = stop_rx.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("synthetic-{output_type}"))
                    .spawn(move || audio.run(rx))
                    .map_err(spawn_error)?,
            );
        }

        info!(threads = threads.len(), "Synthetic session started");

        Ok(Box::new(SyntheticSession {
            stop_tx: Some(stop_tx),
            threads,
            config,
            content: self.content.clone(),
            source,
        }))
    }

    #[instrument(name = "synthetic_capture_image", skip_all)]
    fn capture_image(
        &self,
        filter: &ContentFilter,
        config: &StreamConfiguration,
    ) -> Result<PixelBuffer, NativeError> {
        self.check_permission()?;
        self.resolve(filter)?;

        let buffer = PixelBuffer::allocate(config.width, config.height, config.pixel_format);
        let mut writer = buffer.surface().try_begin_write().ok_or_else(|| {
            NativeError::from_stream_code(StreamErrorCode::InternalError)
                .with_message("freshly allocated surface is busy")
        })?;
        render_test_pattern(&mut writer, config.width, config.pixel_format, 0);
        drop(writer);

        Ok(buffer)
    }
    #[instrument(name = "synthetic_capture_image_in_rect", skip(self))]
    fn capture_image_in_rect(&self, rect: Rect) -> Result<PixelBuffer, NativeError> {
        self.check_permission()?;
        let scale = self
            .content
            .read()
            .displays
            .iter()
            .filter(|d| d.frame.intersection(&rect).is_some())
            .map(|d| d.scale_factor)
            .reduce(f64::max)
            .ok_or_else(|| NativeError::from_stream_code(StreamErrorCode::NoCaptureSource))?;

        let width = (rect.width() * scale).ceil() as u32;
        let height = (rect.height() * scale).ceil() as u32;
        let format = PixelFormat::Bgra32;
        let buffer = PixelBuffer::allocate(width, height, format);
        let mut writer = buffer.surface().try_begin_write().ok_or_else(|| {
            NativeError::from_stream_code(StreamErrorCode::InternalError)
                .with_message("freshly allocated surface is busy")
        })?;
        render_test_pattern(&mut writer, width, format, 0);
        drop(writer);

        debug!(width, height, scale, "Synthetic region captured");
        Ok(buffer)
    }
}

/// Builder for [`SyntheticProvider`] with fault injection.
#[derive(Debug, Default)]
pub struct SyntheticProviderBuilder {
    content: Option<ShareableContent>,
    permission_denied: bool,
    fail_after_frames: Option<u64>,
    discovery_delay: Option<Duration>,
}

impl SyntheticProviderBuilder {
    /// Use this content instead of the default displays and windows.
    pub fn content(mut self, content: ShareableContent) -> Self {
        self.content = Some(content);
        self
    }

    /// Fail discovery, sessions and screenshots with a permission error.
    pub fn permission_denied(mut self, denied: bool) -> Self {
        self.permission_denied = denied;
        self
    }

    /// Report a stream failure after this many video frames.
    pub fn fail_after_frames(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }

    /// Delay every discovery call.
    pub fn discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = Some(delay);
        self
    }

    pub fn build(self) -> SyntheticProvider {
        SyntheticProvider {
            content: Arc::new(RwLock::new(
                self.content.unwrap_or_else(SyntheticProvider::default_content),
            )),
            permission_denied: AtomicBool::new(self.permission_denied),
            fail_after_frames: self.fail_after_frames,
            discovery_delay: self.discovery_delay,
        }
    }
}

struct SyntheticSession {
    stop_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
    config: Arc<Mutex<StreamConfiguration>>,
    content: Arc<RwLock<ShareableContent>>,
    /// Resolved content rect and scale of the current filter.
    source: Arc<Mutex<(Rect, f64)>>,
}

impl ProviderSession for SyntheticSession {
    fn update_configuration(&mut self, config: &StreamConfiguration) -> Result<(), NativeError> {
        debug!(width = config.width, height = config.height, "Synthetic session reconfigured");
        *self.config.lock() = config.clone();
        Ok(())
    }

    fn update_content_filter(&mut self, filter: &ContentFilter) -> Result<(), NativeError> {
        let resolved = resolve(&self.content, filter)?;
        debug!(width = resolved.0.width(), height = resolved.0.height(), "Synthetic session retargeted");
        *self.source.lock() = resolved;
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the sender wakes every producer.
        if self.stop_tx.take().is_none() {
            return;
        }

        let current = thread::current().id();
        for handle in self.threads.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Synthetic producer thread panicked");
            }
        }
        info!("Synthetic session stopped");
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct VideoProducer {
    sink: Arc<dyn FrameSink>,
    config: Arc<Mutex<StreamConfiguration>>,
    source: Arc<Mutex<(Rect, f64)>>,
    fail_after: Option<u64>,
}

impl VideoProducer {
    fn run(self, stop: Receiver<()>) {
        let start = Instant::now();
        let initial = self.config.lock().clone();
        let mut pool = SurfacePool::new(
            initial.queue_depth as usize,
            initial.width,
            initial.height,
            initial.pixel_format,
        );
        let mut sequence = 0u64;

        loop {
            let interval = self
                .config
                .lock()
                .frame_interval()
                .unwrap_or(MIN_FRAME_INTERVAL)
                .max(MIN_FRAME_INTERVAL);
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }

            if self.fail_after.is_some_and(|n| sequence >= n) {
                warn!(sequence, "Injected stream failure");
                self.sink
                    .did_fail(NativeError::from_stream_code(StreamErrorCode::SystemStoppedStream));
                break;
            }

            let config = self.config.lock().clone();
            pool.recreate(
                config.queue_depth as usize,
                config.width,
                config.height,
                config.pixel_format,
            );

            let Some(surface) = pool.acquire() else {
                warn!(sequence, dropped = pool.dropped(), "No free surface, dropping frame");
                continue;
            };
            match surface.try_begin_write() {
                Some(mut writer) => {
                    render_test_pattern(&mut writer, config.width, config.pixel_format, sequence)
                }
                None => continue,
            }

            let elapsed = start.elapsed();
            let (source, scale_factor) = *self.source.lock();
            let source = config.source_rect.unwrap_or(source);
            let (content_rect, content_scale) = fit_content(source, &config);
            let info = FrameInfo {
                status: FrameStatus::Complete,
                display_time: elapsed.as_nanos() as u64,
                content_rect,
                content_scale,
                scale_factor,
                sequence,
            };
            let sample = SampleBuffer::video(
                MediaTime::from_nanos(elapsed.as_nanos() as u64),
                MediaTime::from_seconds(interval.as_secs_f64(), 600),
                info,
                Some(PixelBuffer::new(surface)),
            );

            trace!(sequence, "Synthetic frame produced");
            self.sink.did_output(OutputType::Screen, Arc::new(sample));
            sequence += 1;
        }

        debug!(frames = sequence, dropped = pool.dropped(), "Video producer exiting");
    }
}

struct AudioProducer {
    sink: Arc<dyn FrameSink>,
    config: Arc<Mutex<StreamConfiguration>>,
    output_type: OutputType,
    tone: f32,
}

impl AudioProducer {
    fn run(self, stop: Receiver<()>) {
        let mut phase = 0f32;
        let mut frames_emitted = 0i64;

        loop {
            let (sample_rate, channel_count) = {
                let config = self.config.lock();
                (config.sample_rate, config.channel_count)
            };
            let interval =
                Duration::from_secs_f64(AUDIO_FRAMES_PER_BUFFER as f64 / f64::from(sample_rate));
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }

            let step = TAU * self.tone / sample_rate as f32;
            let mut samples = Vec::with_capacity(AUDIO_FRAMES_PER_BUFFER * channel_count as usize);
            for _ in 0..AUDIO_FRAMES_PER_BUFFER {
                let value = phase.sin() * 0.25;
                samples.extend(std::iter::repeat(value).take(channel_count as usize));
                phase = (phase + step) % TAU;
            }

            let format = AudioFormat {
                sample_rate,
                channel_count,
            };
            let sample = SampleBuffer::audio(
                self.output_type,
                MediaTime::new(frames_emitted, sample_rate as i32),
                format,
                &samples,
            );
            frames_emitted += AUDIO_FRAMES_PER_BUFFER as i64;

            trace!(output = %self.output_type, frames_emitted, "Synthetic audio produced");
            self.sink.did_output(self.output_type, Arc::new(sample));
        }
    }
}

/// Where the source lands inside the output, and at what scale.
fn fit_content(source: Rect, config: &StreamConfiguration) -> (Rect, f64) {
    let (out_w, out_h) = (f64::from(config.width), f64::from(config.height));
    let (src_w, src_h) = (source.width().max(1.0), source.height().max(1.0));

    if !config.scales_to_fit {
        return (Rect::new(0.0, 0.0, src_w.min(out_w), src_h.min(out_h)), 1.0);
    }
    if !config.preserves_aspect_ratio {
        return (Rect::new(0.0, 0.0, out_w, out_h), (out_w / src_w).min(out_h / src_h));
    }

    let scale = (out_w / src_w).min(out_h / src_h);
    let (w, h) = (src_w * scale, src_h * scale);
    (Rect::new((out_w - w) / 2.0, (out_h - h) / 2.0, w, h), scale)
}

fn render_test_pattern(writer: &mut SurfaceWriter<'_>, width: u32, format: PixelFormat, sequence: u64) {
    let planes = writer.planes().to_vec();
    let bytes = writer.bytes_mut();
    let shift = (sequence % 256) as usize;
    let width = width as usize;

    match format {
        PixelFormat::Bgra32 | PixelFormat::Argb2101010 => {
            let plane = planes[0];
            for y in 0..plane.height {
                let row = &mut bytes[plane.offset + y * plane.bytes_per_row..][..width * 4];
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    let (r, g, b) = (shift, y % 256, (x + shift) % 256);
                    let value = if format == PixelFormat::Bgra32 {
                        [b as u8, g as u8, r as u8, 0xFF]
                    } else {
                        let pack = (3u32 << 30) | ((r as u32) << 22) | ((g as u32) << 12) | ((b as u32) << 2);
                        pack.to_le_bytes()
                    };
                    pixel.copy_from_slice(&value);
                }
            }
        }
        PixelFormat::YCbCr420Video | PixelFormat::YCbCr420Full => {
            let (luma, chroma) = (planes[0], planes[1]);
            for y in 0..luma.height {
                let row = &mut bytes[luma.offset + y * luma.bytes_per_row..][..luma.width];
                for (x, value) in row.iter_mut().enumerate() {
                    *value = ((x + y + shift) % 256) as u8;
                }
            }
            for y in 0..chroma.height {
                let start = chroma.offset + y * chroma.bytes_per_row;
                bytes[start..start + chroma.width * 2].fill(0x80);
            }
        }
    }
}

fn spawn_error(err: std::io::Error) -> NativeError {
    NativeError::from_stream_code(StreamErrorCode::FailedToStart)
        .with_message(format!("failed to spawn producer thread: {err}"))
}
