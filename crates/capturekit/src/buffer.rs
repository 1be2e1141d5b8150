//! Sample buffers, pixel buffers and surfaces.
//!
//! Pixel memory is only reachable through a lock guard. The guard locks on
//! construction and unlocks with the same options when dropped, on every
//! exit path.

use std::ffi::c_void;
use std::ops::BitOr;

use bytes::Bytes;
use capturekit_ffi as ffi;
use capturekit_types::{
    AudioFormat, FrameInfo, FrameStatus, MediaTime, OutputType, PixelFormat, PlaneLayout,
};
use tracing::warn;

use crate::error::{check, CaptureError, Result};
use crate::handle::{handle_type, HandleType, OwnedHandle};

/// Options for locking a surface or pixel buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LockOptions(u32);

impl LockOptions {
    pub const READ_WRITE: Self = Self(0);
    pub const READ_ONLY: Self = Self(1);
    /// Fail instead of waiting when the provider is writing (surfaces only).
    pub const AVOID_SYNC: Self = Self(2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_read_only(self) -> bool {
        self.0 & Self::READ_ONLY.0 != 0
    }
}

impl BitOr for LockOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

fn plane_layout(info: ffi::ScPlaneInfo) -> PlaneLayout {
    PlaneLayout {
        width: info.width,
        height: info.height,
        bytes_per_element: info.bytes_per_element,
        bytes_per_row: info.bytes_per_row,
        offset: 0,
    }
}

handle_type!(
    /// One delivered sample: a video frame or a block of audio.
    SampleBuffer
);

impl SampleBuffer {
    pub fn output_type(&self) -> Option<OutputType> {
        OutputType::from_raw(ffi::sc_sample_buffer_get_output_type(self.as_ptr()))
    }

    pub fn presentation_time(&self) -> MediaTime {
        ffi::sc_sample_buffer_get_presentation_timestamp(self.as_ptr())
    }

    pub fn duration(&self) -> MediaTime {
        ffi::sc_sample_buffer_get_duration(self.as_ptr())
    }

    /// Frame metadata, for video samples.
    pub fn frame_info(&self) -> Option<FrameInfo> {
        let raw = self.as_ptr();
        let status = FrameStatus::from_raw(ffi::sc_sample_buffer_get_frame_status(raw))?;
        Some(FrameInfo {
            status,
            display_time: ffi::sc_sample_buffer_get_display_time(raw),
            content_rect: ffi::sc_sample_buffer_get_content_rect(raw),
            content_scale: ffi::sc_sample_buffer_get_content_scale(raw),
            scale_factor: ffi::sc_sample_buffer_get_scale_factor(raw),
            sequence: ffi::sc_sample_buffer_get_sequence_number(raw),
        })
    }

    /// The frame's pixels, absent for audio and non-complete frames.
    pub fn pixel_buffer(&self) -> Option<PixelBuffer> {
        let raw = ffi::sc_sample_buffer_copy_pixel_buffer(self.as_ptr());
        // SAFETY: the C ABI hands us a new reference.
        unsafe { OwnedHandle::from_raw(raw) }.map(PixelBuffer::from_owned)
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        let raw = self.as_ptr();
        let sample_rate = ffi::sc_sample_buffer_get_sample_rate(raw);
        (sample_rate > 0).then(|| AudioFormat {
            sample_rate,
            channel_count: ffi::sc_sample_buffer_get_channel_count(raw),
        })
    }

    /// Audio frames in the sample.
    pub fn num_samples(&self) -> usize {
        ffi::sc_sample_buffer_get_num_samples(self.as_ptr())
    }

    /// Copy of the interleaved 32-bit float PCM data. Empty for video.
    pub fn audio_data(&self) -> Bytes {
        let size = ffi::sc_sample_buffer_get_audio_data_size(self.as_ptr());
        if size == 0 {
            return Bytes::new();
        }
        let mut data = vec![0u8; size];
        // SAFETY: `data` has room for `size` bytes.
        let copied = unsafe {
            ffi::sc_sample_buffer_copy_audio_data(self.as_ptr(), data.as_mut_ptr(), data.len())
        };
        data.truncate(copied);
        Bytes::from(data)
    }
}

handle_type!(
    /// Buffer-level view of a surface.
    PixelBuffer
);

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        ffi::sc_pixel_buffer_get_width(self.as_ptr())
    }

    pub fn height(&self) -> u32 {
        ffi::sc_pixel_buffer_get_height(self.as_ptr())
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_four_cc(ffi::sc_pixel_buffer_get_pixel_format(self.as_ptr()))
    }

    pub fn bytes_per_row(&self) -> usize {
        ffi::sc_pixel_buffer_get_bytes_per_row(self.as_ptr())
    }

    pub fn data_size(&self) -> usize {
        ffi::sc_pixel_buffer_get_data_size(self.as_ptr())
    }

    pub fn plane_count(&self) -> usize {
        ffi::sc_pixel_buffer_get_plane_count(self.as_ptr())
    }

    pub fn is_planar(&self) -> bool {
        ffi::sc_pixel_buffer_is_planar(self.as_ptr())
    }

    /// Layout of plane `index`. Offsets are not reported and read as 0.
    pub fn plane(&self, index: usize) -> Result<PlaneLayout> {
        let mut info = ffi::ScPlaneInfo::default();
        // SAFETY: `info` is a valid out pointer.
        check("plane", unsafe {
            ffi::sc_pixel_buffer_get_plane(self.as_ptr(), index, &mut info)
        })?;
        Ok(plane_layout(info))
    }

    /// The backing surface.
    pub fn surface(&self) -> Result<Surface> {
        let raw = ffi::sc_pixel_buffer_copy_surface(self.as_ptr());
        // SAFETY: the C ABI hands us a new reference.
        unsafe { crate::handle::adopt(raw, "pixel buffer surface") }
    }

    /// Lock the base address. Only [`LockOptions::READ_ONLY`] is meaningful.
    ///
    /// A read-write lock is exclusive across every handle to the same
    /// surface, so at most one guard can hand out writable plane data.
    pub fn lock(&self, options: LockOptions) -> Result<PixelBufferGuard<'_>> {
        check(
            "lock pixel buffer",
            ffi::sc_pixel_buffer_lock_base_address(self.as_ptr(), options.bits()),
        )?;
        Ok(PixelBufferGuard {
            buffer: self,
            options,
        })
    }
}

/// A locked pixel buffer.
#[derive(Debug)]
pub struct PixelBufferGuard<'a> {
    buffer: &'a PixelBuffer,
    options: LockOptions,
}

impl PixelBufferGuard<'_> {
    pub fn options(&self) -> LockOptions {
        self.options
    }

    /// Bytes of plane `index`, including row padding.
    pub fn plane_data(&self, index: usize) -> Result<&[u8]> {
        let (ptr, len) = self.plane_region(index)?;
        // SAFETY: the region is valid while the lock is held, which the
        // borrow of `self` guarantees.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Writable bytes of plane `index`. Fails for read-only locks.
    pub fn plane_data_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        if self.options.is_read_only() {
            return Err(CaptureError::Rejected {
                operation: "write plane",
                status: capturekit_types::Status::LockMismatch,
            });
        }
        let (ptr, len) = self.plane_region(index)?;
        // SAFETY: as above; the provider never writes a locked surface.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Copy plane `index` into owned memory.
    pub fn copy_plane(&self, index: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.plane_data(index)?))
    }

    fn plane_region(&self, index: usize) -> Result<(*mut u8, usize)> {
        let layout = self.buffer.plane(index)?;
        let mut base: *mut c_void = std::ptr::null_mut();
        // SAFETY: `base` is a valid out pointer.
        check("plane base address", unsafe {
            ffi::sc_pixel_buffer_get_base_address_of_plane(self.buffer.as_ptr(), index, &mut base)
        })?;
        if base.is_null() {
            return Err(CaptureError::NullHandle("plane base address"));
        }
        Ok((base.cast(), layout.len()))
    }
}

impl Drop for PixelBufferGuard<'_> {
    fn drop(&mut self) {
        let code = ffi::sc_pixel_buffer_unlock_base_address(self.buffer.as_ptr(), self.options.bits());
        if let Err(e) = check("unlock pixel buffer", code) {
            warn!(error = %e, "Pixel buffer unlock failed");
        }
    }
}

handle_type!(
    /// Provider-owned shared memory backing a frame.
    Surface
);

impl Surface {
    /// Global identifier of the surface, stable for its lifetime.
    pub fn id(&self) -> u32 {
        ffi::sc_surface_get_id(self.as_ptr())
    }

    /// Width of the first plane in pixels.
    pub fn width(&self) -> u32 {
        ffi::sc_surface_get_width(self.as_ptr())
    }

    /// Height of the first plane in pixels.
    pub fn height(&self) -> u32 {
        ffi::sc_surface_get_height(self.as_ptr())
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_four_cc(ffi::sc_surface_get_pixel_format(self.as_ptr()))
    }

    pub fn bytes_per_row(&self) -> usize {
        ffi::sc_surface_get_bytes_per_row(self.as_ptr())
    }

    pub fn bytes_per_element(&self) -> usize {
        ffi::sc_surface_get_bytes_per_element(self.as_ptr())
    }

    pub fn alloc_size(&self) -> usize {
        ffi::sc_surface_get_alloc_size(self.as_ptr())
    }

    pub fn plane_count(&self) -> usize {
        ffi::sc_surface_get_plane_count(self.as_ptr())
    }

    /// Modification counter, bumped by every read-write unlock.
    pub fn seed(&self) -> u32 {
        ffi::sc_surface_get_seed(self.as_ptr())
    }

    /// Returns true while any handle holds a lock.
    pub fn is_locked(&self) -> bool {
        ffi::sc_surface_is_locked(self.as_ptr())
    }

    /// Layout of plane `index`. Offsets are not reported and read as 0.
    pub fn plane(&self, index: usize) -> Result<PlaneLayout> {
        let mut info = ffi::ScPlaneInfo::default();
        // SAFETY: `info` is a valid out pointer.
        check("plane", unsafe {
            ffi::sc_surface_get_plane(self.as_ptr(), index, &mut info)
        })?;
        Ok(plane_layout(info))
    }

    /// Lock the surface. Read-only locks nest; a read-write lock fails
    /// while any other lock is outstanding and blocks new ones.
    pub fn lock(&self, options: LockOptions) -> Result<SurfaceGuard<'_>> {
        let mut seed = 0u32;
        // SAFETY: `seed` is a valid out pointer.
        check("lock surface", unsafe {
            ffi::sc_surface_lock(self.as_ptr(), options.bits(), &mut seed)
        })?;
        Ok(SurfaceGuard {
            surface: self,
            options,
            seed,
        })
    }
}

/// A locked surface.
#[derive(Debug)]
pub struct SurfaceGuard<'a> {
    surface: &'a Surface,
    options: LockOptions,
    seed: u32,
}

impl SurfaceGuard<'_> {
    /// Seed observed when the lock was taken.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Bytes of plane `index`, including row padding.
    pub fn plane_data(&self, index: usize) -> Result<&[u8]> {
        let (ptr, len) = self.plane_region(index)?;
        // SAFETY: valid while the lock is held.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Writable bytes of plane `index`. Fails with a lock mismatch on a
    /// read-only guard.
    pub fn plane_data_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        if self.options.is_read_only() {
            return Err(CaptureError::Rejected {
                operation: "write plane",
                status: capturekit_types::Status::LockMismatch,
            });
        }
        let (ptr, len) = self.plane_region(index)?;
        // SAFETY: valid while the lock is held; nobody else writes it.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Owned copy of plane `index`, usable after the guard is dropped.
    pub fn copy_plane(&self, index: usize) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.plane_data(index)?))
    }

    fn plane_region(&self, index: usize) -> Result<(*mut u8, usize)> {
        let layout = self.surface.plane(index)?;
        let mut base: *mut c_void = std::ptr::null_mut();
        // SAFETY: `base` is a valid out pointer.
        check("plane base address", unsafe {
            ffi::sc_surface_get_base_address_of_plane(self.surface.as_ptr(), index, &mut base)
        })?;
        if base.is_null() {
            return Err(CaptureError::NullHandle("plane base address"));
        }
        Ok((base.cast(), layout.len()))
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: a null seed pointer is accepted.
        let code = unsafe {
            ffi::sc_surface_unlock(self.surface.as_ptr(), self.options.bits(), std::ptr::null_mut())
        };
        if let Err(e) = check("unlock surface", code) {
            warn!(error = %e, "Surface unlock failed");
        }
    }
}
