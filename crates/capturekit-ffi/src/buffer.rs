//! Sample buffers, pixel buffers and surfaces.
//!
//! Base addresses are only valid between a matching lock and unlock; they
//! are null while the buffer is unlocked. Plane-indexed calls return -3 for
//! an index past the plane count.

use std::ffi::c_void;

use capturekit_native::{PixelBuffer, SampleBuffer, Surface, SurfaceError};
use capturekit_types::{MediaTime, PlaneLayout, Rect, Status};

use crate::{borrow, bridge, checked, from_raw, invalid_parameter, release_as, to_raw};

/// Layout of one plane, filled in by the `_get_plane` calls.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScPlaneInfo {
    pub width: usize,
    pub height: usize,
    pub bytes_per_row: usize,
    pub bytes_per_element: usize,
}

impl From<PlaneLayout> for ScPlaneInfo {
    fn from(plane: PlaneLayout) -> Self {
        Self {
            width: plane.width,
            height: plane.height,
            bytes_per_row: plane.bytes_per_row,
            bytes_per_element: plane.bytes_per_element,
        }
    }
}

fn surface_status<T>(result: Result<T, SurfaceError>, write: impl FnOnce(T)) -> i32 {
    match result {
        Ok(value) => {
            write(value);
            Status::Ok.as_raw()
        }
        Err(e) => e.status().as_raw(),
    }
}

/// Store `value` through `out` if it is non-null.
///
/// # Safety
///
/// `out` must be null or writable.
unsafe fn store<T>(out: *mut T, value: T) {
    if !out.is_null() {
        *out = value;
    }
}

// Sample buffers.

/// Output type (screen 0, audio 1, microphone 2), or -1.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_output_type(sample: *const c_void) -> i32 {
    borrow::<SampleBuffer>(sample).map_or(invalid_parameter(), |s| s.output_type.as_raw())
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_presentation_timestamp(sample: *const c_void) -> MediaTime {
    borrow::<SampleBuffer>(sample).map_or(MediaTime::zero(), |s| s.presentation_time)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_duration(sample: *const c_void) -> MediaTime {
    borrow::<SampleBuffer>(sample).map_or(MediaTime::zero(), |s| s.duration)
}

/// Frame status (complete 0 ... stopped 5), or -1 for audio samples.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_frame_status(sample: *const c_void) -> i32 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.frame_info().map(|info| info.status.as_raw()))
        .unwrap_or(invalid_parameter())
}

/// Display time in nanoseconds since the stream started.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_display_time(sample: *const c_void) -> u64 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.frame_info().map(|info| info.display_time))
        .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_content_rect(sample: *const c_void) -> Rect {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.frame_info().map(|info| info.content_rect))
        .unwrap_or_else(Rect::zero)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_content_scale(sample: *const c_void) -> f64 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.frame_info().map(|info| info.content_scale))
        .unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_scale_factor(sample: *const c_void) -> f64 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.frame_info().map(|info| info.scale_factor))
        .unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_sequence_number(sample: *const c_void) -> u64 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.frame_info().map(|info| info.sequence))
        .unwrap_or(0)
}

/// New owned handle to the frame's pixel buffer, or null for audio and
/// frames without content.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_copy_pixel_buffer(sample: *const c_void) -> *const c_void {
    from_raw(sample)
        .and_then(|id| checked(bridge().sample_pixel_buffer(id)).flatten())
        .map_or(std::ptr::null(), to_raw)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_sample_rate(sample: *const c_void) -> u32 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.audio_format())
        .map_or(0, |f| f.sample_rate)
}

#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_channel_count(sample: *const c_void) -> u32 {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.audio_format())
        .map_or(0, |f| f.channel_count)
}

/// Audio frames in the sample, or 1 for video.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_num_samples(sample: *const c_void) -> usize {
    borrow::<SampleBuffer>(sample).map_or(0, |s| s.num_samples())
}

/// Bytes of interleaved float PCM, or 0 for video.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_get_audio_data_size(sample: *const c_void) -> usize {
    borrow::<SampleBuffer>(sample)
        .and_then(|s| s.audio_data().map(|data| data.len()))
        .unwrap_or(0)
}

/// Copy up to `capacity` bytes of audio into `dest`. Returns bytes copied.
///
/// # Safety
///
/// `dest` must be null or writable for `capacity` bytes.
#[no_mangle]
pub unsafe extern "C" fn sc_sample_buffer_copy_audio_data(
    sample: *const c_void,
    dest: *mut u8,
    capacity: usize,
) -> usize {
    if dest.is_null() {
        return 0;
    }
    borrow::<SampleBuffer>(sample).map_or(0, |s| {
        s.copy_audio_data(std::slice::from_raw_parts_mut(dest, capacity))
    })
}

/// Release a sample the caller owns. Samples passed to output
/// callbacks are borrowed and must not be released.
#[no_mangle]
pub extern "C" fn sc_sample_buffer_release(sample: *const c_void) {
    release_as::<SampleBuffer>(sample);
}

// Pixel buffers.

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_width(buffer: *const c_void) -> u32 {
    borrow::<PixelBuffer>(buffer).map_or(0, |b| b.width())
}

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_height(buffer: *const c_void) -> u32 {
    borrow::<PixelBuffer>(buffer).map_or(0, |b| b.height())
}

/// Four-char pixel format code.
#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_pixel_format(buffer: *const c_void) -> u32 {
    borrow::<PixelBuffer>(buffer).map_or(0, |b| b.pixel_format().four_cc())
}

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_bytes_per_row(buffer: *const c_void) -> usize {
    borrow::<PixelBuffer>(buffer).map_or(0, |b| b.bytes_per_row())
}

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_data_size(buffer: *const c_void) -> usize {
    borrow::<PixelBuffer>(buffer).map_or(0, |b| b.data_size())
}

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_plane_count(buffer: *const c_void) -> usize {
    borrow::<PixelBuffer>(buffer).map_or(0, |b| b.plane_count())
}

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_is_planar(buffer: *const c_void) -> bool {
    borrow::<PixelBuffer>(buffer).is_some_and(|b| b.is_planar())
}

/// # Safety
///
/// `out` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_pixel_buffer_get_plane(
    buffer: *const c_void,
    index: usize,
    out: *mut ScPlaneInfo,
) -> i32 {
    let Some(buffer) = borrow::<PixelBuffer>(buffer) else {
        return invalid_parameter();
    };
    surface_status(buffer.plane(index), |plane| store(out, plane.into()))
}

/// Lock with flags 0 (read-write) or 1 (read-only).
///
/// A read-write lock is exclusive: it and any lock taken while it is held
/// fail with -2 when another lock overlaps.
#[no_mangle]
pub extern "C" fn sc_pixel_buffer_lock_base_address(buffer: *const c_void, flags: u32) -> i32 {
    let Some(buffer) = borrow::<PixelBuffer>(buffer) else {
        return invalid_parameter();
    };
    surface_status(buffer.lock(flags), |_| ())
}

/// Unlock with the flags used to lock.
#[no_mangle]
pub extern "C" fn sc_pixel_buffer_unlock_base_address(buffer: *const c_void, flags: u32) -> i32 {
    let Some(buffer) = borrow::<PixelBuffer>(buffer) else {
        return invalid_parameter();
    };
    surface_status(buffer.unlock(flags), |_| ())
}

/// Base address of the first plane, or null when not locked.
#[no_mangle]
pub extern "C" fn sc_pixel_buffer_get_base_address(buffer: *const c_void) -> *mut c_void {
    borrow::<PixelBuffer>(buffer).map_or(std::ptr::null_mut(), |b| b.base_address().cast())
}

/// # Safety
///
/// `out` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_pixel_buffer_get_base_address_of_plane(
    buffer: *const c_void,
    index: usize,
    out: *mut *mut c_void,
) -> i32 {
    let Some(buffer) = borrow::<PixelBuffer>(buffer) else {
        return invalid_parameter();
    };
    surface_status(buffer.plane_base_address(index), |ptr| store(out, ptr.cast()))
}

/// New owned handle to the backing surface.
#[no_mangle]
pub extern "C" fn sc_pixel_buffer_copy_surface(buffer: *const c_void) -> *const c_void {
    from_raw(buffer)
        .and_then(|id| checked(bridge().pixel_buffer_surface(id)))
        .map_or(std::ptr::null(), to_raw)
}

#[no_mangle]
pub extern "C" fn sc_pixel_buffer_release(buffer: *const c_void) {
    release_as::<PixelBuffer>(buffer);
}

// Surfaces.

#[no_mangle]
pub extern "C" fn sc_surface_get_id(surface: *const c_void) -> u32 {
    borrow::<Surface>(surface).map_or(0, |s| s.id())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_width(surface: *const c_void) -> u32 {
    borrow::<Surface>(surface).map_or(0, |s| s.width())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_height(surface: *const c_void) -> u32 {
    borrow::<Surface>(surface).map_or(0, |s| s.height())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_pixel_format(surface: *const c_void) -> u32 {
    borrow::<Surface>(surface).map_or(0, |s| s.pixel_format().four_cc())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_bytes_per_row(surface: *const c_void) -> usize {
    borrow::<Surface>(surface).map_or(0, |s| s.bytes_per_row())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_bytes_per_element(surface: *const c_void) -> usize {
    borrow::<Surface>(surface).map_or(0, |s| s.bytes_per_element())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_alloc_size(surface: *const c_void) -> usize {
    borrow::<Surface>(surface).map_or(0, |s| s.alloc_size())
}

#[no_mangle]
pub extern "C" fn sc_surface_get_plane_count(surface: *const c_void) -> usize {
    borrow::<Surface>(surface).map_or(0, |s| s.plane_count())
}

/// Modification counter, bumped by every read-write unlock.
#[no_mangle]
pub extern "C" fn sc_surface_get_seed(surface: *const c_void) -> u32 {
    borrow::<Surface>(surface).map_or(0, |s| s.seed())
}

#[no_mangle]
pub extern "C" fn sc_surface_is_locked(surface: *const c_void) -> bool {
    borrow::<Surface>(surface).is_some_and(|s| s.is_locked())
}

/// # Safety
///
/// `out` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_surface_get_plane(
    surface: *const c_void,
    index: usize,
    out: *mut ScPlaneInfo,
) -> i32 {
    let Some(surface) = borrow::<Surface>(surface) else {
        return invalid_parameter();
    };
    surface_status(surface.plane(index), |plane| store(out, plane.into()))
}

/// Lock with options `READ_ONLY = 1` and `AVOID_SYNC = 2`. The seed at
/// lock time is stored in `seed` when non-null.
///
/// # Safety
///
/// `seed` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_surface_lock(surface: *const c_void, options: u32, seed: *mut u32) -> i32 {
    let Some(surface) = borrow::<Surface>(surface) else {
        return invalid_parameter();
    };
    surface_status(surface.lock(options), |value| store(seed, value))
}

/// Unlock with the options used to lock.
///
/// # Safety
///
/// `seed` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_surface_unlock(surface: *const c_void, options: u32, seed: *mut u32) -> i32 {
    let Some(surface) = borrow::<Surface>(surface) else {
        return invalid_parameter();
    };
    surface_status(surface.unlock(options), |value| store(seed, value))
}

#[no_mangle]
pub extern "C" fn sc_surface_get_base_address(surface: *const c_void) -> *mut c_void {
    borrow::<Surface>(surface).map_or(std::ptr::null_mut(), |s| s.base_address().cast())
}

/// # Safety
///
/// `out` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn sc_surface_get_base_address_of_plane(
    surface: *const c_void,
    index: usize,
    out: *mut *mut c_void,
) -> i32 {
    let Some(surface) = borrow::<Surface>(surface) else {
        return invalid_parameter();
    };
    surface_status(surface.plane_base_address(index), |ptr| store(out, ptr.cast()))
}

/// Release a surface handle. Buffers sharing the surface keep it alive.
#[no_mangle]
pub extern "C" fn sc_surface_release(surface: *const c_void) {
    release_as::<Surface>(surface);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use capturekit_types::PixelFormat;

    fn buffer(format: PixelFormat) -> *const c_void {
        to_raw(bridge().register(Arc::new(PixelBuffer::allocate(8, 4, format))))
    }

    #[test]
    fn test_plane_out_of_range_leaves_state() {
        let pb = buffer(PixelFormat::Bgra32);
        let mut plane = ScPlaneInfo::default();
        assert_eq!(unsafe { sc_pixel_buffer_get_plane(pb, 3, &mut plane) }, -3);
        assert_eq!(plane, ScPlaneInfo::default());
        assert_eq!(sc_pixel_buffer_get_plane_count(pb), 1);
        assert!(sc_pixel_buffer_get_base_address(pb).is_null());
        sc_pixel_buffer_release(pb);
    }

    #[test]
    fn test_lock_protocol_statuses() {
        let pb = buffer(PixelFormat::YCbCr420Full);
        assert_eq!(sc_pixel_buffer_unlock_base_address(pb, 0), Status::NotLocked.as_raw());
        assert_eq!(sc_pixel_buffer_lock_base_address(pb, 1), 0);
        assert_eq!(sc_pixel_buffer_unlock_base_address(pb, 0), Status::LockMismatch.as_raw());

        let mut luma = std::ptr::null_mut();
        let mut chroma = std::ptr::null_mut();
        unsafe {
            assert_eq!(sc_pixel_buffer_get_base_address_of_plane(pb, 0, &mut luma), 0);
            assert_eq!(sc_pixel_buffer_get_base_address_of_plane(pb, 1, &mut chroma), 0);
        }
        assert!(!luma.is_null() && chroma > luma);

        assert_eq!(sc_pixel_buffer_unlock_base_address(pb, 1), 0);
        assert!(sc_pixel_buffer_get_base_address(pb).is_null());
        sc_pixel_buffer_release(pb);
    }

    #[test]
    fn test_surface_seed_advances_on_write_unlock() {
        let pb = buffer(PixelFormat::Bgra32);
        let surface = sc_pixel_buffer_copy_surface(pb);
        sc_pixel_buffer_release(pb);

        let mut before = 0;
        let mut after = 0;
        unsafe {
            assert_eq!(sc_surface_lock(surface, 0, &mut before), 0);
            assert!(sc_surface_is_locked(surface));
            assert_eq!(sc_surface_unlock(surface, 0, &mut after), 0);
        }
        assert_eq!(after, before + 1);
        assert_eq!(sc_surface_get_plane_count(surface), 1);
        assert_eq!(sc_surface_get_bytes_per_element(surface), 4);
        sc_surface_release(surface);
    }

    #[test]
    fn test_read_write_lock_excludes_other_handles() {
        let pb = buffer(PixelFormat::Bgra32);
        let alias = crate::sc_retain(pb);

        assert_eq!(sc_pixel_buffer_lock_base_address(pb, 0), 0);
        assert_eq!(
            sc_pixel_buffer_lock_base_address(alias, 0),
            Status::InvalidState.as_raw()
        );
        assert_eq!(
            sc_pixel_buffer_lock_base_address(alias, 1),
            Status::InvalidState.as_raw()
        );
        assert_eq!(sc_pixel_buffer_unlock_base_address(pb, 0), 0);

        assert_eq!(sc_pixel_buffer_lock_base_address(alias, 1), 0);
        assert_eq!(
            sc_pixel_buffer_lock_base_address(pb, 0),
            Status::InvalidState.as_raw()
        );
        assert_eq!(sc_pixel_buffer_unlock_base_address(alias, 1), 0);

        crate::sc_release(alias);
        sc_pixel_buffer_release(pb);
    }
}
