#![allow(dead_code)]

use std::time::Duration;

use capturekit::{ContentFilter, ShareableContent, StreamConfiguration, StreamSettings};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn content() -> ShareableContent {
    ShareableContent::get().unwrap().await.unwrap()
}

pub async fn display_filter() -> ContentFilter {
    let content = content().await;
    ContentFilter::display_excluding_windows(&content.displays()[0], &[]).unwrap()
}

/// Small, fast frames so tests see many of them quickly.
pub fn fast_settings() -> StreamSettings {
    StreamSettings {
        width: 320,
        height: 180,
        minimum_frame_interval: 0.005,
        queue_depth: 8,
        ..StreamSettings::default()
    }
}

pub fn configuration(settings: &StreamSettings) -> StreamConfiguration {
    StreamConfiguration::from_settings(settings).unwrap()
}
