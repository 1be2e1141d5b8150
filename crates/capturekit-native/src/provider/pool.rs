//! Surface pool for capture sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use capturekit_types::PixelFormat;
use tracing::debug;

use crate::surface::Surface;

/// A fixed set of surfaces reused frame after frame.
///
/// A surface is handed out again only once nothing outside the pool
/// references it, so the provider never writes into memory a consumer can
/// still see. When every surface is busy the frame is dropped.
pub struct SurfacePool {
    surfaces: Vec<Arc<Surface>>,
    capacity: usize,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    next: usize,
    dropped: AtomicU64,
}

impl SurfacePool {
    pub fn new(capacity: usize, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        debug!(capacity, width, height, %pixel_format, "Creating surface pool");
        Self {
            surfaces: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            width,
            height,
            pixel_format,
            next: 0,
            dropped: AtomicU64::new(0),
        }
    }

    /// An unreferenced surface, or None if the consumer holds them all.
    pub fn acquire(&mut self) -> Option<Arc<Surface>> {
        let count = self.surfaces.len();
        for step in 0..count {
            let index = (self.next + step) % count;
            if Arc::strong_count(&self.surfaces[index]) == 1 {
                self.next = (index + 1) % count.max(1);
                return Some(self.surfaces[index].clone());
            }
        }

        if count < self.capacity {
            let surface = Arc::new(Surface::new(self.width, self.height, self.pixel_format));
            self.surfaces.push(surface.clone());
            return Some(surface);
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Change the surface geometry. Surfaces still held by consumers keep
    /// their old geometry and are simply forgotten by the pool.
    pub fn recreate(&mut self, capacity: usize, width: u32, height: u32, pixel_format: PixelFormat) {
        if (capacity, width, height, pixel_format)
            == (self.capacity, self.width, self.height, self.pixel_format)
        {
            return;
        }
        debug!(capacity, width, height, %pixel_format, "Recreating surface pool");
        self.surfaces.clear();
        self.capacity = capacity.max(1);
        self.width = width;
        self.height = height;
        self.pixel_format = pixel_format;
        self.next = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped because no surface was free.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_released_surfaces() {
        let mut pool = SurfacePool::new(2, 8, 8, PixelFormat::Bgra32);
        let first = pool.acquire().unwrap();
        let first_id = first.id();
        drop(first);

        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), first_id);
    }

    #[test]
    fn test_drops_when_exhausted() {
        let mut pool = SurfacePool::new(2, 8, 8, PixelFormat::Bgra32);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.id(), b.id());

        assert!(pool.acquire().is_none());
        assert_eq!(pool.dropped(), 1);

        drop(b);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_recreate_changes_geometry() {
        let mut pool = SurfacePool::new(1, 8, 8, PixelFormat::Bgra32);
        let held = pool.acquire().unwrap();

        pool.recreate(1, 16, 4, PixelFormat::YCbCr420Full);
        let fresh = pool.acquire().unwrap();
        assert_eq!((fresh.width(), fresh.height()), (16, 4));
        assert_eq!(fresh.plane_count(), 2);
        assert_eq!(held.width(), 8);
    }
}
