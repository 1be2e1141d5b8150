//! Shareable content: displays, windows and running applications.

use std::sync::Arc;

use capturekit_types::{DiscoveryOptions, Rect};

use crate::handle::HandleId;

/// A display that can be captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    pub display_id: u32,

    /// Frame in global display space, in points.
    pub frame: Rect,

    /// Point-to-pixel scale.
    pub scale_factor: f64,
}

impl Display {
    pub fn new(display_id: u32, frame: Rect, scale_factor: f64) -> Self {
        Self {
            display_id,
            frame,
            scale_factor,
        }
    }

    /// Width in points.
    pub fn width(&self) -> u32 {
        self.frame.width() as u32
    }

    /// Height in points.
    pub fn height(&self) -> u32 {
        self.frame.height() as u32
    }
}

/// A running application that owns windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApplication {
    pub bundle_identifier: String,
    pub application_name: String,
    pub process_id: i32,
}

impl RunningApplication {
    pub fn new(
        bundle_identifier: impl Into<String>,
        application_name: impl Into<String>,
        process_id: i32,
    ) -> Self {
        Self {
            bundle_identifier: bundle_identifier.into(),
            application_name: application_name.into(),
            process_id,
        }
    }
}

/// A window that can be captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub window_id: u32,
    pub title: Option<String>,
    pub frame: Rect,
    pub window_layer: i32,
    pub is_on_screen: bool,

    /// Desktop-level window such as the wallpaper.
    pub is_desktop: bool,

    pub owning_application: Option<Arc<RunningApplication>>,
}

impl Window {
    /// On screen and not part of the desktop.
    pub fn is_active(&self) -> bool {
        self.is_on_screen && !self.is_desktop
    }
}

/// Result of a discovery pass, before it is registered.
#[derive(Debug, Clone, Default)]
pub struct ShareableContent {
    pub displays: Vec<Arc<Display>>,
    pub windows: Vec<Arc<Window>>,
    pub applications: Vec<Arc<RunningApplication>>,
}

impl ShareableContent {
    /// Keep only the windows the options ask for.
    pub fn filtered(mut self, options: &DiscoveryOptions) -> Self {
        self.windows.retain(|w| {
            !(options.exclude_desktop_windows && w.is_desktop)
                && !(options.on_screen_windows_only && !w.is_on_screen)
        });
        self
    }

    pub fn display(&self, display_id: u32) -> Option<&Arc<Display>> {
        self.displays.iter().find(|d| d.display_id == display_id)
    }

    pub fn window(&self, window_id: u32) -> Option<&Arc<Window>> {
        self.windows.iter().find(|w| w.window_id == window_id)
    }
}

/// A registered discovery result.
///
/// Every element was registered alongside the snapshot with a single
/// reference owned by the snapshot, so releasing the snapshot releases them
/// too. Callers that want an element to outlive the snapshot retain it.
#[derive(Debug)]
pub struct ContentSnapshot {
    content: ShareableContent,
    displays: Vec<HandleId>,
    windows: Vec<HandleId>,
    applications: Vec<HandleId>,
}

impl ContentSnapshot {
    pub(crate) fn new(
        content: ShareableContent,
        displays: Vec<HandleId>,
        windows: Vec<HandleId>,
        applications: Vec<HandleId>,
    ) -> Self {
        Self {
            content,
            displays,
            windows,
            applications,
        }
    }

    pub fn content(&self) -> &ShareableContent {
        &self.content
    }

    /// Handles of the snapshot's displays, owned by the snapshot.
    pub fn display_handles(&self) -> &[HandleId] {
        &self.displays
    }

    pub fn window_handles(&self) -> &[HandleId] {
        &self.windows
    }

    pub fn application_handles(&self) -> &[HandleId] {
        &self.applications
    }

    pub(crate) fn element_handles(&self) -> Vec<HandleId> {
        self.displays
            .iter()
            .chain(&self.windows)
            .chain(&self.applications)
            .copied()
            .collect()
    }
}
