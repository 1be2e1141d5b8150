//! Provider-owned pixel memory and its lock protocol.
//!
//! A surface holds every plane of a frame in one allocation. Callers get at
//! the memory only between `lock` and a matching `unlock`; the provider
//! writes only while no lock is outstanding. A lock that arrives during a
//! provider write waits for it to finish, or fails with `Busy` when
//! `LOCK_AVOID_SYNC` is set.
//!
//! Read-only locks nest freely. A read-write lock is exclusive: it is
//! refused while any other lock is outstanding, and no other lock is
//! granted while it is held.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use capturekit_types::{PixelFormat, PlaneLayout};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::SurfaceError;

/// Lock for reading only; unlocking does not bump the seed.
pub const LOCK_READ_ONLY: u32 = 1;

/// Do not wait for an in-progress provider write.
pub const LOCK_AVOID_SYNC: u32 = 2;

const LOCK_OPTIONS_MASK: u32 = LOCK_READ_ONLY | LOCK_AVOID_SYNC;

static NEXT_SURFACE_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Default)]
struct LockState {
    /// Options of every outstanding lock, in lock order.
    locks: Vec<u32>,
    writing: bool,
    seed: u32,
}

/// A block of pixel memory shared between the provider and the caller.
pub struct Surface {
    id: u32,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    planes: Vec<PlaneLayout>,
    memory: Box<[UnsafeCell<u8>]>,
    state: Mutex<LockState>,
    write_done: Condvar,
}

// SAFETY: the memory is only reached through `SurfaceWriter` (exclusive:
// no locks outstanding and no other writer) or through lock-bracketed base
// addresses, and the lock state is guarded by the mutex.
unsafe impl Sync for Surface {}

impl Surface {
    /// Allocate a zeroed surface.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let planes = pixel_format.plane_layouts(width, height);
        let size = planes.iter().map(PlaneLayout::len).sum();
        let bytes = vec![0u8; size].into_boxed_slice();
        // SAFETY: UnsafeCell<u8> has the same layout as u8.
        let memory = unsafe { Box::from_raw(Box::into_raw(bytes) as *mut [UnsafeCell<u8>]) };

        Self {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            pixel_format,
            planes,
            memory,
            state: Mutex::new(LockState::default()),
            write_done: Condvar::new(),
        }
    }

    /// Process-unique surface id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Width of the first plane in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the first plane in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Always at least 1.
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Total allocation size in bytes.
    pub fn alloc_size(&self) -> usize {
        self.memory.len()
    }

    /// Row stride of the first plane.
    pub fn bytes_per_row(&self) -> usize {
        self.planes.first().map_or(0, |p| p.bytes_per_row)
    }

    /// Element size of the first plane.
    pub fn bytes_per_element(&self) -> usize {
        self.planes.first().map_or(0, |p| p.bytes_per_element)
    }

    /// Layout of plane `index`.
    pub fn plane(&self, index: usize) -> Result<PlaneLayout, SurfaceError> {
        self.planes
            .get(index)
            .copied()
            .ok_or(SurfaceError::PlaneOutOfRange {
                index,
                count: self.planes.len(),
            })
    }

    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    /// Modification counter, bumped by every write.
    pub fn seed(&self) -> u32 {
        self.state.lock().seed
    }

    /// Returns true while any lock is outstanding.
    pub fn is_locked(&self) -> bool {
        !self.state.lock().locks.is_empty()
    }

    /// Number of outstanding locks.
    pub fn lock_count(&self) -> usize {
        self.state.lock().locks.len()
    }

    /// Take a lock. Returns the seed at lock time.
    ///
    /// Fails with `Contended` when read-write access would overlap another
    /// lock.
    pub fn lock(&self, options: u32) -> Result<u32, SurfaceError> {
        if options & !LOCK_OPTIONS_MASK != 0 {
            return Err(SurfaceError::InvalidOptions(options));
        }

        let mut state = self.state.lock();
        let read_write = options & LOCK_READ_ONLY == 0;
        let write_held = state.locks.iter().any(|&o| o & LOCK_READ_ONLY == 0);
        if write_held || (read_write && !state.locks.is_empty()) {
            return Err(SurfaceError::Contended);
        }
        if state.writing {
            if options & LOCK_AVOID_SYNC != 0 {
                return Err(SurfaceError::Busy);
            }
            while state.writing {
                self.write_done.wait(&mut state);
            }
        }

        state.locks.push(options);
        trace!(surface = self.id, options, depth = state.locks.len(), "Surface locked");
        Ok(state.seed)
    }

    /// Release one lock taken with exactly `options`. Returns the seed.
    ///
    /// On failure the lock state is unchanged.
    pub fn unlock(&self, options: u32) -> Result<u32, SurfaceError> {
        let mut state = self.state.lock();
        if state.locks.is_empty() {
            return Err(SurfaceError::NotLocked);
        }

        let index = state
            .locks
            .iter()
            .rposition(|&o| o == options)
            .ok_or(SurfaceError::LockMismatch(options))?;
        state.locks.remove(index);

        if options & LOCK_READ_ONLY == 0 {
            state.seed = state.seed.wrapping_add(1);
        }

        trace!(surface = self.id, options, depth = state.locks.len(), "Surface unlocked");
        Ok(state.seed)
    }

    /// Start of the allocation, or null when not locked.
    pub fn base_address(&self) -> *mut u8 {
        if self.is_locked() {
            UnsafeCell::raw_get(self.memory.as_ptr())
        } else {
            std::ptr::null_mut()
        }
    }

    /// Start of a plane, or null when not locked.
    pub fn plane_base_address(&self, index: usize) -> Result<*mut u8, SurfaceError> {
        let plane = self.plane(index)?;
        let base = self.base_address();
        if base.is_null() {
            return Ok(base);
        }
        // SAFETY: plane offsets lie inside the allocation.
        Ok(unsafe { base.add(plane.offset) })
    }

    /// Lock read-only and return a guard that unlocks on drop.
    pub fn read_lock(&self) -> Result<SurfaceReadGuard<'_>, SurfaceError> {
        self.lock(LOCK_READ_ONLY)?;
        Ok(SurfaceReadGuard { surface: self })
    }

    /// Claim the surface for a provider write. None if anyone holds a lock.
    pub(crate) fn try_begin_write(&self) -> Option<SurfaceWriter<'_>> {
        let mut state = self.state.lock();
        if state.writing || !state.locks.is_empty() {
            return None;
        }
        state.writing = true;
        Some(SurfaceWriter { surface: self })
    }

    fn end_write(&self) {
        let mut state = self.state.lock();
        state.writing = false;
        state.seed = state.seed.wrapping_add(1);
        drop(state);
        self.write_done.notify_all();
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .finish_non_exhaustive()
    }
}

/// Read access to a locked surface.
pub struct SurfaceReadGuard<'a> {
    surface: &'a Surface,
}

impl SurfaceReadGuard<'_> {
    /// The whole allocation, including every plane and row padding.
    pub fn bytes(&self) -> &[u8] {
        let base = UnsafeCell::raw_get(self.surface.memory.as_ptr());
        // SAFETY: a lock is held, so the provider cannot write.
        unsafe { std::slice::from_raw_parts(base, self.surface.memory.len()) }
    }

    /// Bytes of plane `index`, including row padding.
    pub fn plane_bytes(&self, index: usize) -> Result<&[u8], SurfaceError> {
        let plane = self.surface.plane(index)?;
        Ok(&self.bytes()[plane.offset..plane.offset + plane.len()])
    }
}

impl Drop for SurfaceReadGuard<'_> {
    fn drop(&mut self) {
        let _ = self.surface.unlock(LOCK_READ_ONLY);
    }
}

/// Exclusive provider access to a surface's memory.
pub(crate) struct SurfaceWriter<'a> {
    surface: &'a Surface,
}

impl SurfaceWriter<'_> {
    pub(crate) fn planes(&self) -> &[PlaneLayout] {
        &self.surface.planes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        let base = UnsafeCell::raw_get(self.surface.memory.as_ptr());
        // SAFETY: `writing` is set and no lock is outstanding, so nothing
        // else can observe the memory until the writer is dropped.
        unsafe { std::slice::from_raw_parts_mut(base, self.surface.memory.len()) }
    }
}

impl Drop for SurfaceWriter<'_> {
    fn drop(&mut self) {
        self.surface.end_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_base_address_only_while_locked() {
        let surface = Surface::new(64, 4, PixelFormat::Bgra32);
        assert!(surface.base_address().is_null());

        surface.lock(LOCK_READ_ONLY).unwrap();
        assert!(!surface.base_address().is_null());
        surface.unlock(LOCK_READ_ONLY).unwrap();

        assert!(surface.base_address().is_null());
    }

    #[test]
    fn test_unlock_without_lock() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        assert_eq!(surface.unlock(0), Err(SurfaceError::NotLocked));
    }

    #[test]
    fn test_mismatched_unlock_leaves_state() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        surface.lock(LOCK_READ_ONLY).unwrap();

        assert_eq!(surface.unlock(0), Err(SurfaceError::LockMismatch(0)));
        assert_eq!(surface.lock_count(), 1);

        surface.unlock(LOCK_READ_ONLY).unwrap();
        assert!(!surface.is_locked());
    }

    #[test]
    fn test_nested_read_locks() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        surface.lock(LOCK_READ_ONLY).unwrap();
        surface.lock(LOCK_READ_ONLY | LOCK_AVOID_SYNC).unwrap();
        surface.unlock(LOCK_READ_ONLY).unwrap();
        assert!(surface.is_locked());
        surface.unlock(LOCK_READ_ONLY | LOCK_AVOID_SYNC).unwrap();
        assert!(!surface.is_locked());
    }

    #[test]
    fn test_read_write_lock_is_exclusive() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        surface.lock(0).unwrap();
        assert_eq!(surface.lock(0), Err(SurfaceError::Contended));
        assert_eq!(surface.lock(LOCK_READ_ONLY), Err(SurfaceError::Contended));
        assert_eq!(surface.lock_count(), 1);
        surface.unlock(0).unwrap();

        surface.lock(LOCK_READ_ONLY).unwrap();
        assert_eq!(surface.lock(LOCK_AVOID_SYNC), Err(SurfaceError::Contended));
        surface.unlock(LOCK_READ_ONLY).unwrap();

        surface.lock(0).unwrap();
        surface.unlock(0).unwrap();
        assert!(!surface.is_locked());
    }

    #[test]
    fn test_seed_bumps_on_read_write_unlock() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        let seed = surface.lock(LOCK_READ_ONLY).unwrap();
        assert_eq!(surface.unlock(LOCK_READ_ONLY).unwrap(), seed);

        surface.lock(0).unwrap();
        assert_eq!(surface.unlock(0).unwrap(), seed + 1);
    }

    #[test]
    fn test_invalid_options() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        assert_eq!(surface.lock(8), Err(SurfaceError::InvalidOptions(8)));
        assert!(!surface.is_locked());
    }

    #[test]
    fn test_plane_out_of_range() {
        let surface = Surface::new(16, 16, PixelFormat::Bgra32);
        assert_eq!(surface.plane_count(), 1);
        assert_eq!(
            surface.plane(3),
            Err(SurfaceError::PlaneOutOfRange { index: 3, count: 1 })
        );
        assert!(surface.plane_base_address(1).is_err());
    }

    #[test]
    fn test_biplanar_addresses() {
        let surface = Surface::new(32, 32, PixelFormat::YCbCr420Video);
        let _guard = surface.read_lock().unwrap();
        let luma = surface.plane_base_address(0).unwrap();
        let chroma = surface.plane_base_address(1).unwrap();
        assert_eq!(chroma as usize - luma as usize, surface.plane(1).unwrap().offset);
    }

    #[test]
    fn test_writer_excluded_by_lock() {
        let surface = Surface::new(8, 8, PixelFormat::Bgra32);
        let guard = surface.read_lock().unwrap();
        assert!(surface.try_begin_write().is_none());
        drop(guard);
        assert!(surface.try_begin_write().is_some());
    }

    #[test]
    fn test_lock_waits_for_writer() {
        let surface = Arc::new(Surface::new(8, 8, PixelFormat::Bgra32));
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        let writer_surface = surface.clone();
        let writer = std::thread::spawn(move || {
            let mut writer = writer_surface.try_begin_write().unwrap();
            writer.bytes_mut().fill(0xAB);
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(surface.lock(LOCK_READ_ONLY | LOCK_AVOID_SYNC), Err(SurfaceError::Busy));

        release_tx.send(()).unwrap();
        let guard = surface.read_lock().unwrap();
        assert!(guard.bytes().iter().all(|&b| b == 0xAB));
        drop(guard);
        writer.join().unwrap();
    }
}
