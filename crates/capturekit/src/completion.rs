//! Single-resolution futures over the C ABI's one-shot completions.
//!
//! Each pending operation boxes a oneshot sender and passes the box as the
//! callback context. The C side calls the completion exactly once when it
//! accepted the call and never when it rejected it, so the box is either
//! consumed by the trampoline or reclaimed by the caller, never both.

use std::ffi::c_void;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{CaptureError, Result};
use crate::handle::{ErrorObject, HandleType, OwnedHandle};

type Outcome<T> = Result<T>;

/// The eventual result of an asynchronous operation.
///
/// Resolves exactly once. Dropping it does not cancel the operation; the
/// result is discarded when it arrives.
#[must_use = "a completion does nothing unless awaited or waited on"]
#[derive(Debug)]
pub struct Completion<T> {
    operation: &'static str,
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Completion<T> {
    /// Block the current thread until the operation completes.
    ///
    /// Must not be called from inside an async runtime; `.await` instead.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or(Err(CaptureError::Abandoned))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        let operation = self.operation;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| {
                warn!(error = %e, "Failed to build a wait runtime");
                CaptureError::Abandoned
            })?;
        runtime
            .block_on(async { tokio::time::timeout(timeout, self).await })
            .unwrap_or(Err(CaptureError::Timeout(operation)))
    }

    /// Wait with an optional timeout.
    pub fn wait_for(self, timeout: Option<Duration>) -> Result<T> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CaptureError::Abandoned)))
    }
}

/// Sender half handed to the C side as a context pointer.
pub(crate) struct Pending<T> {
    tx: oneshot::Sender<Outcome<T>>,
}

impl<T> Pending<T> {
    /// A completion and the raw context that resolves it.
    pub(crate) fn new(operation: &'static str) -> (Completion<T>, *mut c_void) {
        let (tx, rx) = oneshot::channel();
        let context = Box::into_raw(Box::new(Self { tx })).cast::<c_void>();
        (Completion { operation, rx }, context)
    }

    /// Reclaim a context the C side rejected without calling back.
    ///
    /// # Safety
    ///
    /// `context` must come from [`Pending::new`] and not have been consumed.
    pub(crate) unsafe fn reclaim(context: *mut c_void) {
        drop(Box::from_raw(context.cast::<Self>()));
    }

    /// # Safety
    ///
    /// `context` must come from [`Pending::new`] and not have been consumed.
    unsafe fn resolve(context: *mut c_void, outcome: Outcome<T>) {
        let pending = Box::from_raw(context.cast::<Self>());
        // The receiver may be gone; the result is simply discarded.
        let _ = pending.tx.send(outcome);
    }
}

/// Convert an owned error handle into an error.
///
/// # Safety
///
/// `error` must be a non-null error handle the caller owns.
unsafe fn take_error(error: *const c_void) -> CaptureError {
    match OwnedHandle::from_raw(error) {
        Some(handle) => CaptureError::from_error_object(&ErrorObject::from_owned(handle)),
        None => CaptureError::Abandoned,
    }
}

/// `(context, error)` completion for operations without a result.
pub(crate) unsafe extern "C" fn unit_trampoline(context: *mut c_void, error: *const c_void) {
    let outcome = if error.is_null() { Ok(()) } else { Err(take_error(error)) };
    Pending::<()>::resolve(context, outcome);
}

/// `(context, result, error)` completion for operations producing a handle.
pub(crate) unsafe extern "C" fn handle_trampoline<T: HandleType>(
    context: *mut c_void,
    result: *const c_void,
    error: *const c_void,
) {
    let outcome = if error.is_null() {
        OwnedHandle::from_raw(result)
            .map(T::from_owned)
            .ok_or(CaptureError::NullHandle(T::NAME))
    } else {
        Err(take_error(error))
    };
    Pending::<T>::resolve(context, outcome);
}

/// Submit a call taking a completion, reclaiming the context on rejection.
pub(crate) fn submit<T>(
    operation: &'static str,
    call: impl FnOnce(*mut c_void) -> i32,
) -> Result<Completion<T>> {
    let (completion, context) = Pending::<T>::new(operation);
    let code = call(context);
    if let Err(e) = crate::error::check(operation, code) {
        // SAFETY: a rejected call never invokes the completion.
        unsafe { Pending::<T>::reclaim(context) };
        return Err(e);
    }
    Ok(completion)
}
