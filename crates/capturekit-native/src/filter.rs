//! Content filters.
//!
//! A filter copies what it needs out of the display, window and application
//! objects it was built from, so it stays valid after the snapshot that
//! produced them is released.

use std::sync::Arc;

use capturekit_types::Rect;

use crate::content::{Display, RunningApplication, Window};

/// What a filter captures.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFilter {
    /// A whole display minus some windows.
    DisplayExcludingWindows {
        display: Display,
        excluded_windows: Vec<u32>,
    },

    /// Only the listed windows of a display.
    DisplayIncludingWindows {
        display: Display,
        included_windows: Vec<u32>,
    },

    /// Windows of the listed applications on a display, minus some windows.
    DisplayIncludingApplications {
        display: Display,
        applications: Vec<RunningApplication>,
        excepting_windows: Vec<u32>,
    },

    /// A single window, wherever it is.
    DesktopIndependentWindow { window: Window },
}

impl ContentFilter {
    /// Capture a display, leaving out `windows`.
    pub fn display_excluding_windows(display: &Display, windows: &[Arc<Window>]) -> Self {
        Self::DisplayExcludingWindows {
            display: display.clone(),
            excluded_windows: windows.iter().map(|w| w.window_id).collect(),
        }
    }

    /// Capture only `windows` as they appear on a display.
    pub fn display_including_windows(display: &Display, windows: &[Arc<Window>]) -> Self {
        Self::DisplayIncludingWindows {
            display: display.clone(),
            included_windows: windows.iter().map(|w| w.window_id).collect(),
        }
    }

    pub fn display_including_applications(
        display: &Display,
        applications: &[Arc<RunningApplication>],
        excepting_windows: &[Arc<Window>],
    ) -> Self {
        Self::DisplayIncludingApplications {
            display: display.clone(),
            applications: applications.iter().map(|a| (**a).clone()).collect(),
            excepting_windows: excepting_windows.iter().map(|w| w.window_id).collect(),
        }
    }

    /// Capture a single window regardless of the display it is on.
    pub fn desktop_independent_window(window: &Window) -> Self {
        Self::DesktopIndependentWindow {
            window: window.clone(),
        }
    }

    /// The captured display, if the filter targets one.
    pub fn display(&self) -> Option<&Display> {
        match self {
            Self::DisplayExcludingWindows { display, .. }
            | Self::DisplayIncludingWindows { display, .. }
            | Self::DisplayIncludingApplications { display, .. } => Some(display),
            Self::DesktopIndependentWindow { .. } => None,
        }
    }

    /// The captured window, if the filter targets one.
    pub fn window(&self) -> Option<&Window> {
        match self {
            Self::DesktopIndependentWindow { window } => Some(window),
            _ => None,
        }
    }

    /// Region of the source being captured, in points.
    pub fn content_rect(&self) -> Rect {
        match self.window() {
            Some(window) => Rect::new(0.0, 0.0, window.frame.width(), window.frame.height()),
            None => self.display().map(|d| d.frame).unwrap_or_default(),
        }
    }

    /// Point-to-pixel scale of the captured content.
    pub fn point_pixel_scale(&self) -> f64 {
        self.display().map_or(1.0, |d| d.scale_factor)
    }

    /// Returns true if the window is part of the filtered output.
    pub fn includes_window(&self, window: &Window) -> bool {
        match self {
            Self::DisplayExcludingWindows {
                excluded_windows, ..
            } => !excluded_windows.contains(&window.window_id),
            Self::DisplayIncludingWindows {
                included_windows, ..
            } => included_windows.contains(&window.window_id),
            Self::DisplayIncludingApplications {
                applications,
                excepting_windows,
                ..
            } => {
                !excepting_windows.contains(&window.window_id)
                    && window.owning_application.as_ref().is_some_and(|owner| {
                        applications
                            .iter()
                            .any(|a| a.process_id == owner.process_id)
                    })
            }
            Self::DesktopIndependentWindow { window: target } => {
                target.window_id == window.window_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> Display {
        Display::new(7, Rect::new(0.0, 0.0, 1920.0, 1080.0), 2.0)
    }

    fn window(id: u32, owner: Option<Arc<RunningApplication>>) -> Arc<Window> {
        Arc::new(Window {
            window_id: id,
            title: Some(format!("Window {id}")),
            frame: Rect::new(100.0, 50.0, 640.0, 480.0),
            window_layer: 0,
            is_on_screen: true,
            is_desktop: false,
            owning_application: owner,
        })
    }

    #[test]
    fn test_display_filter_geometry() {
        let filter = ContentFilter::display_excluding_windows(&display(), &[]);
        assert_eq!(filter.content_rect(), Rect::new(0.0, 0.0, 1920.0, 1080.0));
        assert_eq!(filter.point_pixel_scale(), 2.0);
    }

    #[test]
    fn test_window_filter_geometry() {
        let filter = ContentFilter::desktop_independent_window(&window(3, None));
        assert_eq!(filter.content_rect(), Rect::new(0.0, 0.0, 640.0, 480.0));
        assert_eq!(filter.point_pixel_scale(), 1.0);
        assert!(filter.display().is_none());
    }

    #[test]
    fn test_window_membership() {
        let app = Arc::new(RunningApplication::new("com.example.editor", "Editor", 42));
        let mine = window(1, Some(app.clone()));
        let other = window(2, None);

        let excluding = ContentFilter::display_excluding_windows(&display(), &[mine.clone()]);
        assert!(!excluding.includes_window(&mine));
        assert!(excluding.includes_window(&other));

        let by_app = ContentFilter::display_including_applications(&display(), &[app], &[]);
        assert!(by_app.includes_window(&mine));
        assert!(!by_app.includes_window(&other));
    }
}
