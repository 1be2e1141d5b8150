//! Caller-constructed dispatch queues.

use std::ffi::CString;

use capturekit_ffi as ffi;
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::handle::{adopt, handle_type};

/// Scheduling priority of a queue's workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QosClass {
    Background,
    Utility,
    #[default]
    Default,
    UserInitiated,
    UserInteractive,
}

impl QosClass {
    const fn as_raw(self) -> i32 {
        match self {
            Self::Background => 0,
            Self::Utility => 1,
            Self::Default => 2,
            Self::UserInitiated => 3,
            Self::UserInteractive => 4,
        }
    }
}

handle_type!(
    /// An execution context for output callbacks.
    ///
    /// Output handlers must run on a serial queue; a concurrent queue is
    /// only useful for caller work.
    DispatchQueue
);

impl DispatchQueue {
    /// A serial queue, the only kind output handlers accept.
    pub fn serial(label: &str, qos: QosClass) -> Result<Self> {
        Self::new(label, 1, qos)
    }

    /// A queue with `concurrency` workers (0 or 1 for serial).
    pub fn new(label: &str, concurrency: u32, qos: QosClass) -> Result<Self> {
        let label = CString::new(label).map_err(|_| CaptureError::InteriorNul("queue label"))?;
        // SAFETY: `label` is a NUL-terminated string alive for the call.
        unsafe {
            adopt(
                ffi::sc_dispatch_queue_create(label.as_ptr(), concurrency, qos.as_raw()),
                "dispatch queue",
            )
        }
    }
}
