//! Safe Rust interface to the capture bridge.
//!
//! Handles release themselves when dropped and retain when cloned.
//! Snapshot elements and callback arguments arrive as [`Borrowed`] views
//! that cannot outlive their source. One-shot operations return a
//! [`Completion`] future; repeated frame delivery is either a handler
//! closure or a bounded [`FrameStream`].
//!
//! ```no_run
//! use capturekit::{CaptureStream, ContentFilter, ShareableContent, StreamConfiguration};
//! use capturekit::{FrameStreamOptions, OutputType, StreamSettings};
//!
//! # fn main() -> capturekit::Result<()> {
//! let content = ShareableContent::get()?.wait()?;
//! let filter = ContentFilter::display_excluding_windows(&content.displays()[0], &[])?;
//! let configuration = StreamConfiguration::from_settings(&StreamSettings::default())?;
//!
//! let stream = CaptureStream::builder(&filter, &configuration)
//!     .on_error(|e| eprintln!("stream failed: {e}"))
//!     .build()?;
//! let frames = stream.frames(OutputType::Screen, FrameStreamOptions::default())?;
//! stream.start()?.wait()?;
//! for sample in frames.take(10) {
//!     println!("{:?}", sample.frame_info());
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
mod completion;
mod config;
mod configuration;
mod content;
mod error;
mod filter;
mod handle;
mod queue;
mod screenshot;
mod stats;
mod stream;

pub use buffer::{LockOptions, PixelBuffer, PixelBufferGuard, SampleBuffer, Surface, SurfaceGuard};
pub use completion::Completion;
pub use config::{ClientConfig, ConfigError, DEFAULT_FRAME_QUEUE_CAPACITY};
pub use configuration::StreamConfiguration;
pub use content::{Display, RunningApplication, ShareableContent, Window};
pub use error::{CaptureError, Result};
pub use filter::ContentFilter;
pub use handle::{Borrowed, ErrorObject, HandleType, OwnedHandle};
pub use queue::{DispatchQueue, QosClass};
pub use screenshot::{capture_image, capture_image_in_rect, capture_sample_buffer, Image};
pub use stats::{StatsSnapshot, StreamStats};
pub use stream::{CaptureStream, CaptureStreamBuilder, FrameStream, FrameStreamOptions, OverflowPolicy};

pub use capturekit_types::{
    AudioFormat, DiscoveryOptions, ErrorKind, FrameInfo, FrameStatus, MediaTime, OutputType,
    PixelFormat, PlaneLayout, Point, Rect, Size, Status, StreamConfiguration as StreamSettings,
    StreamErrorCode, StreamState,
};
