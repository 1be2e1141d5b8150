//! Value types shared across the capture bridge.
//!
//! Everything in this crate crosses the boundary by value: geometry,
//! pixel formats, stream configuration, output and frame metadata, the
//! stream state machine and the error taxonomy. Nothing here owns a
//! native object.

mod config;
mod error;
mod geometry;
mod pixel_format;
mod sample;
mod state;

pub use config::{DiscoveryOptions, StreamConfiguration, MAX_QUEUE_DEPTH, SUPPORTED_SAMPLE_RATES};
pub use error::{ErrorKind, InvalidConfiguration, Status, StreamErrorCode};
pub use geometry::{Point, Rect, Size};
pub use pixel_format::{four_cc_to_string, PixelFormat, PlaneLayout, ROW_ALIGNMENT};
pub use sample::{AudioFormat, FrameInfo, FrameStatus, MediaTime, OutputType};
pub use state::StreamState;

/// Default number of surfaces a stream may have in flight.
pub const DEFAULT_QUEUE_DEPTH: u32 = 3;

/// Largest accepted output dimension, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;
