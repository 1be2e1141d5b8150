//! Content filters.

use std::ffi::c_void;

use capturekit_ffi as ffi;
use capturekit_types::Rect;

use crate::content::{Display, RunningApplication, Window};
use crate::error::Result;
use crate::handle::{adopt, handle_type, HandleType};

handle_type!(
    /// What a stream or screenshot captures.
    ///
    /// Built from snapshot elements but independent of the snapshot: it
    /// stays valid after the snapshot is dropped.
    ContentFilter
);

fn raw_handles<T: HandleType>(items: &[&T]) -> Vec<*const c_void> {
    items.iter().map(|item| item.as_ptr()).collect()
}

impl ContentFilter {
    /// Everything on `display` except `excluded`.
    pub fn display_excluding_windows(display: &Display, excluded: &[&Window]) -> Result<Self> {
        let windows = raw_handles(excluded);
        // SAFETY: `windows` holds `windows.len()` live handles.
        unsafe {
            adopt(
                ffi::sc_content_filter_create_with_display_excluding_windows(
                    display.as_ptr(),
                    windows.as_ptr(),
                    windows.len(),
                ),
                "display filter",
            )
        }
    }

    /// Only `included` windows on `display`.
    pub fn display_including_windows(display: &Display, included: &[&Window]) -> Result<Self> {
        let windows = raw_handles(included);
        // SAFETY: `windows` holds `windows.len()` live handles.
        unsafe {
            adopt(
                ffi::sc_content_filter_create_with_display_including_windows(
                    display.as_ptr(),
                    windows.as_ptr(),
                    windows.len(),
                ),
                "display filter",
            )
        }
    }

    /// Windows of `applications` on `display`, minus `excepted`.
    pub fn display_including_applications(
        display: &Display,
        applications: &[&RunningApplication],
        excepted: &[&Window],
    ) -> Result<Self> {
        let applications = raw_handles(applications);
        let windows = raw_handles(excepted);
        // SAFETY: both vectors hold live handles and their lengths.
        unsafe {
            adopt(
                ffi::sc_content_filter_create_with_display_including_applications_excepting_windows(
                    display.as_ptr(),
                    applications.as_ptr(),
                    applications.len(),
                    windows.as_ptr(),
                    windows.len(),
                ),
                "application filter",
            )
        }
    }

    /// A single window, wherever it is.
    pub fn desktop_independent_window(window: &Window) -> Result<Self> {
        // SAFETY: the C ABI hands us a new reference.
        unsafe {
            adopt(
                ffi::sc_content_filter_create_with_desktop_independent_window(window.as_ptr()),
                "window filter",
            )
        }
    }

    /// Area captured, in points.
    pub fn content_rect(&self) -> Rect {
        ffi::sc_content_filter_get_content_rect(self.as_ptr())
    }

    pub fn point_pixel_scale(&self) -> f64 {
        ffi::sc_content_filter_get_point_pixel_scale(self.as_ptr())
    }
}
