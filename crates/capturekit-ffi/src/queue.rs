//! Caller-constructed dispatch queues.

use std::ffi::{c_char, c_void};

use capturekit_native::{DispatchQueue, QosClass, QueueKind};
use tracing::warn;

use crate::{borrowed_str, bridge, release_as, to_raw};

/// Create a dispatch queue with `concurrency` workers (0 or 1 for a serial
/// queue) and a QoS class (background 0 ... user-interactive 4). Null on an
/// unknown QoS class or a label that is not UTF-8.
///
/// # Safety
///
/// `label` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn sc_dispatch_queue_create(
    label: *const c_char,
    concurrency: u32,
    qos: i32,
) -> *const c_void {
    let Some(qos) = QosClass::from_raw(qos) else {
        return std::ptr::null();
    };
    let label = if label.is_null() {
        "capturekit.queue"
    } else {
        match borrowed_str(label) {
            Some(label) => label,
            None => return std::ptr::null(),
        }
    };
    let kind = match concurrency {
        0 | 1 => QueueKind::Serial,
        n => QueueKind::Concurrent(n as usize),
    };

    match bridge().create_queue(label, kind, qos) {
        Ok(id) => to_raw(id),
        Err(e) => {
            warn!(error = %e, label, "Failed to create dispatch queue");
            std::ptr::null()
        }
    }
}

/// Release a queue. Streams using it keep it alive.
#[no_mangle]
pub extern "C" fn sc_dispatch_queue_release(queue: *const c_void) {
    release_as::<DispatchQueue>(queue);
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;
    use crate::borrow;

    #[test]
    fn test_create_serial_and_concurrent() {
        let label = CString::new("test.queue").unwrap();
        let serial = unsafe { sc_dispatch_queue_create(label.as_ptr(), 1, 2) };
        let concurrent = unsafe { sc_dispatch_queue_create(label.as_ptr(), 4, 2) };

        assert!(borrow::<DispatchQueue>(serial).unwrap().is_serial());
        let queue = borrow::<DispatchQueue>(concurrent).unwrap();
        assert_eq!(queue.kind(), QueueKind::Concurrent(4));
        assert_eq!(queue.label(), "test.queue");

        sc_dispatch_queue_release(serial);
        sc_dispatch_queue_release(concurrent);
    }

    #[test]
    fn test_unknown_qos() {
        assert!(unsafe { sc_dispatch_queue_create(std::ptr::null(), 1, 9) }.is_null());
    }
}
