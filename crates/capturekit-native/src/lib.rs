//! Native object layer for the capture bridge.
//!
//! Every object the caller can see lives in one [`Registry`] behind a
//! [`HandleId`]. The [`Bridge`] owns the registry, a [`CaptureProvider`]
//! and the worker queue async completions run on. Streams, surfaces and
//! dispatch queues implement the concurrency contract; the C ABI crate is a
//! thin translation over this one.

mod bridge;
mod content;
mod error;
mod filter;
mod handle;
mod object;
mod pixel_buffer;
pub mod provider;
mod queue;
mod sample_buffer;
mod stream;
mod surface;

pub use bridge::Bridge;
pub use content::{ContentSnapshot, Display, RunningApplication, ShareableContent, Window};
pub use error::{BridgeError, ContractViolation, NativeError, SurfaceError};
pub use filter::ContentFilter;
pub use handle::{HandleId, HandleTable, Retainable};
pub use object::{ConfigurationObject, NativeObject, NativeType, Registry};
pub use pixel_buffer::{Image, PixelBuffer, PIXEL_BUFFER_LOCK_READ_ONLY};
pub use provider::{CaptureProvider, FrameSink, ProviderSession, SyntheticProvider};
pub use queue::{DispatchQueue, QosClass, QueueKind};
pub use sample_buffer::{SampleBuffer, SamplePayload};
pub use stream::{ErrorHandler, OutputHandler, StreamSession};
pub use surface::{Surface, SurfaceReadGuard, LOCK_AVOID_SYNC, LOCK_READ_ONLY};

/// One-shot completion for an async operation.
///
/// `Ok` carries the result (an owned handle where there is one), `Err` an
/// owned error handle. Called exactly once for an accepted operation.
pub type Completion<T> = Box<dyn FnOnce(Result<T, HandleId>) + Send + 'static>;
