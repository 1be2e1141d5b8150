//! Buffer-level views of surfaces: pixel buffers and still images.

use std::sync::Arc;

use capturekit_types::{PixelFormat, PlaneLayout};

use crate::error::SurfaceError;
use crate::surface::{Surface, LOCK_READ_ONLY};

/// Lock flag accepted by [`PixelBuffer::lock`].
pub const PIXEL_BUFFER_LOCK_READ_ONLY: u32 = 1;

/// A frame's pixels, backed by a surface.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    surface: Arc<Surface>,
}

impl PixelBuffer {
    pub fn new(surface: Arc<Surface>) -> Self {
        Self { surface }
    }

    /// Allocate a fresh buffer with its own surface.
    pub fn allocate(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self::new(Arc::new(Surface::new(width, height, pixel_format)))
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.surface.pixel_format()
    }

    pub fn bytes_per_row(&self) -> usize {
        self.surface.bytes_per_row()
    }

    pub fn data_size(&self) -> usize {
        self.surface.alloc_size()
    }

    pub fn plane_count(&self) -> usize {
        self.surface.plane_count()
    }

    pub fn is_planar(&self) -> bool {
        self.pixel_format().is_planar()
    }

    pub fn plane(&self, index: usize) -> Result<PlaneLayout, SurfaceError> {
        self.surface.plane(index)
    }

    /// Lock the backing surface. `flags` is 0 or
    /// [`PIXEL_BUFFER_LOCK_READ_ONLY`]; returns the surface seed.
    pub fn lock(&self, flags: u32) -> Result<u32, SurfaceError> {
        self.surface.lock(Self::surface_options(flags)?)
    }

    /// Undo a [`lock`](Self::lock) taken with the same flags.
    pub fn unlock(&self, flags: u32) -> Result<u32, SurfaceError> {
        self.surface.unlock(Self::surface_options(flags)?)
    }

    /// Start of the pixel data, or null when not locked.
    pub fn base_address(&self) -> *mut u8 {
        self.surface.base_address()
    }

    /// Start of plane `index`, or null when not locked.
    pub fn plane_base_address(&self, index: usize) -> Result<*mut u8, SurfaceError> {
        self.surface.plane_base_address(index)
    }

    fn surface_options(flags: u32) -> Result<u32, SurfaceError> {
        match flags {
            0 => Ok(0),
            PIXEL_BUFFER_LOCK_READ_ONLY => Ok(LOCK_READ_ONLY),
            other => Err(SurfaceError::InvalidOptions(other)),
        }
    }
}

/// A still image produced by a screenshot.
#[derive(Debug, Clone)]
pub struct Image {
    pixel_buffer: PixelBuffer,
}

impl Image {
    pub fn new(pixel_buffer: PixelBuffer) -> Self {
        Self { pixel_buffer }
    }

    pub fn width(&self) -> u32 {
        self.pixel_buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.pixel_buffer.height()
    }

    pub fn pixel_buffer(&self) -> &PixelBuffer {
        &self.pixel_buffer
    }
}
