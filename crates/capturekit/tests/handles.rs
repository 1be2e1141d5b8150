//! Ownership of handles across the boundary.

mod common;

use capturekit::{ContentFilter, HandleType};

use common::*;

#[tokio::test]
async fn test_retain_release_conservation() {
    let content = content().await;
    assert_eq!(content.handle().retain_count(), 1);

    let aliases: Vec<_> = (0..4).map(|_| content.clone()).collect();
    assert_eq!(content.handle().retain_count(), 5);

    drop(aliases);
    assert_eq!(content.handle().retain_count(), 1);
}

#[tokio::test]
async fn test_retained_display_survives_snapshot() {
    let content = content().await;
    let display = content.displays()[0].retain();
    let width = display.width();
    let id = display.display_id();
    drop(content);

    assert_eq!(display.handle().retain_count(), 1);
    assert_eq!(display.width(), width);
    assert_eq!(display.display_id(), id);

    // Still usable as filter input.
    let filter = ContentFilter::display_excluding_windows(&display, &[]).unwrap();
    assert_eq!(filter.content_rect().width(), width as f64);
}

#[tokio::test]
async fn test_retained_window_keeps_owner() {
    let content = content().await;
    let window = content
        .windows()
        .into_iter()
        .find(|w| !w.is_desktop())
        .unwrap()
        .retain();
    drop(content);

    let owner = window.owning_application().unwrap();
    assert!(!owner.application_name().is_empty());
    assert_eq!(owner.handle().retain_count(), 1);
}

#[tokio::test]
async fn test_discovery_delivers_exactly_one_outcome() {
    for _ in 0..10 {
        let result = capturekit::ShareableContent::get().unwrap().await;
        let content = result.unwrap();
        assert!(!content.displays().is_empty());
    }
}
