//! The capture provider seam.
//!
//! A provider discovers content, runs capture sessions that push samples
//! into a [`FrameSink`], and takes one-shot screenshots. The OS compositor
//! binding plugs in here; [`SyntheticProvider`] is the in-process one.

mod pool;
mod synthetic;

pub use pool::SurfacePool;
pub use synthetic::{SyntheticProvider, SyntheticProviderBuilder};

use std::sync::Arc;

use capturekit_types::{DiscoveryOptions, OutputType, Rect, StreamConfiguration};

use crate::content::ShareableContent;
use crate::error::NativeError;
use crate::filter::ContentFilter;
use crate::pixel_buffer::PixelBuffer;
use crate::sample_buffer::SampleBuffer;

/// Receives everything a running session produces.
///
/// Calls for one output type arrive from a single thread, in capture order.
pub trait FrameSink: Send + Sync {
    fn did_output(&self, output_type: OutputType, sample: Arc<SampleBuffer>);

    /// The session failed and will produce nothing more.
    fn did_fail(&self, error: NativeError);
}

/// A running capture session.
pub trait ProviderSession: Send {
    fn update_configuration(&mut self, config: &StreamConfiguration) -> Result<(), NativeError>;

    /// Switch to new content. Frames after this return come from `filter`.
    fn update_content_filter(&mut self, filter: &ContentFilter) -> Result<(), NativeError>;

    /// Stop producing. Once this returns the sink is never called again.
    fn stop(&mut self);
}

/// Source of content, sessions and screenshots.
pub trait CaptureProvider: Send + Sync {
    fn shareable_content(&self, options: &DiscoveryOptions) -> Result<ShareableContent, NativeError>;

    fn open_session(
        &self,
        filter: &ContentFilter,
        config: &StreamConfiguration,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Box<dyn ProviderSession>, NativeError>;

    fn capture_image(
        &self,
        filter: &ContentFilter,
        config: &StreamConfiguration,
    ) -> Result<PixelBuffer, NativeError>;

    /// Capture a region of the global desktop, in points. The region may
    /// span displays; the image uses the highest scale among them.
    fn capture_image_in_rect(&self, rect: Rect) -> Result<PixelBuffer, NativeError>;
}
