//! Stream failures reported by the provider.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use capturekit::{CaptureStream, ErrorKind, OutputType, StreamErrorCode, StreamState};
use capturekit_native::SyntheticProvider;

use common::*;

const FAIL_AFTER: u64 = 5;

fn setup() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let provider = SyntheticProvider::builder().fail_after_frames(FAIL_AFTER).build();
        capturekit_ffi::install_provider(Arc::new(provider)).unwrap();
    });
}

#[tokio::test]
async fn test_error_handler_runs_once_after_outputs() {
    setup();
    let filter = display_filter().await;
    let configuration = configuration(&fast_settings());

    let delivered = Arc::new(AtomicU64::new(0));
    let (error_tx, error_rx) = crossbeam_channel::unbounded();
    let stream = CaptureStream::builder(&filter, &configuration)
        .on_error({
            let delivered = delivered.clone();
            move |e| {
                let _ = error_tx.send((e, delivered.load(Ordering::SeqCst)));
            }
        })
        .build()
        .unwrap();
    stream
        .add_output_handler(OutputType::Screen, {
            let delivered = delivered.clone();
            move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    stream.start().unwrap().await.unwrap();

    let (error, seen_at_error) = error_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(error.kind(), ErrorKind::Stream);
    assert_eq!(error.stream_error_code(), Some(StreamErrorCode::SystemStoppedStream));
    assert_eq!(stream.state(), StreamState::Error);

    // Outputs were drained before the error callback and none follow it.
    assert_eq!(seen_at_error, FAIL_AFTER);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), FAIL_AFTER);
    assert!(error_rx.try_recv().is_err());

    assert!(stream.stop().is_err());
}
