//! Behaviour when capture permission is denied.

use std::sync::{Arc, OnceLock};

use capturekit::{ErrorKind, ShareableContent, StreamErrorCode};
use capturekit_native::SyntheticProvider;

fn setup() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let provider = SyntheticProvider::builder().permission_denied(true).build();
        capturekit_ffi::install_provider(Arc::new(provider)).unwrap();
    });
}

#[tokio::test]
async fn test_discovery_reports_permission_denied() {
    setup();

    let err = ShareableContent::get().unwrap().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(err.requires_user_action());
    assert_eq!(err.stream_error_code(), Some(StreamErrorCode::UserDeclined));
}

#[tokio::test]
async fn test_every_discovery_fails_exactly_once() {
    setup();

    for _ in 0..5 {
        let result = ShareableContent::get().unwrap().await;
        assert!(result.is_err());
    }
}
