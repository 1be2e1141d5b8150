//! Dispatch queues: explicit execution contexts for callbacks.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_QUEUE: Cell<u64> = const { Cell::new(0) };
}

/// Scheduling priority of a queue's workers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QosClass {
    Background = 0,
    Utility = 1,
    #[default]
    Default = 2,
    UserInitiated = 3,
    UserInteractive = 4,
}

impl QosClass {
    /// Maps the C ABI values 0 (background) through 4 (user-interactive).
    pub const fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Background),
            1 => Some(Self::Utility),
            2 => Some(Self::Default),
            3 => Some(Self::UserInitiated),
            4 => Some(Self::UserInteractive),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Utility => "utility",
            Self::Default => "default",
            Self::UserInitiated => "user-initiated",
            Self::UserInteractive => "user-interactive",
        }
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How many tasks a queue runs at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// One worker; tasks run in submission order, never overlapping.
    Serial,

    /// `n` workers; tasks may overlap.
    Concurrent(usize),
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// A labelled pool of worker threads fed from a channel.
///
/// Dropping the queue lets already-submitted tasks finish; the workers exit
/// once the channel is empty. Nothing joins them, so a queue may be dropped
/// from one of its own tasks.
pub struct DispatchQueue {
    id: u64,
    label: String,
    qos: QosClass,
    kind: QueueKind,
    sender: Sender<Job>,
    pending: Arc<Pending>,
}

impl DispatchQueue {
    /// Spawn the queue's workers: one for a serial queue, `n` for a
    /// concurrent one.
    pub fn new(label: impl Into<String>, kind: QueueKind, qos: QosClass) -> std::io::Result<Self> {
        let label = label.into();
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let workers = match kind {
            QueueKind::Serial => 1,
            QueueKind::Concurrent(n) => n.max(1),
        };

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let pending = Arc::new(Pending::default());

        for index in 0..workers {
            let receiver = receiver.clone();
            let pending = pending.clone();
            let worker_label = label.clone();
            thread::Builder::new()
                .name(format!("{label}.{qos}.{index}"))
                .spawn(move || run_worker(id, &worker_label, receiver, pending))?;
        }

        debug!(queue = %label, ?kind, %qos, "Dispatch queue created");

        Ok(Self {
            id,
            label,
            qos,
            kind,
            sender,
            pending,
        })
    }

    /// A serial queue at default priority.
    pub fn serial(label: impl Into<String>) -> std::io::Result<Self> {
        Self::new(label, QueueKind::Serial, QosClass::Default)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn qos(&self) -> QosClass {
        self.qos
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn is_serial(&self) -> bool {
        self.kind == QueueKind::Serial
    }

    /// Returns true when called from one of this queue's workers.
    pub fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == self.id)
    }

    /// Submit a task without waiting for it.
    pub fn exec_async<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.add();
        if self.sender.send(Box::new(job)).is_err() {
            self.pending.finish();
            warn!(queue = %self.label, "Dispatch queue closed, task dropped");
        }
    }

    /// Block until every task submitted before this call has run.
    ///
    /// Returns immediately on the queue's own worker. On a concurrent queue
    /// this waits for the queue to go idle.
    pub fn barrier(&self) {
        if self.is_current() {
            return;
        }

        match self.kind {
            QueueKind::Serial => {
                let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
                self.exec_async(move || {
                    let _ = done_tx.send(());
                });
                let _ = done_rx.recv();
            }
            QueueKind::Concurrent(_) => self.pending.wait_idle(),
        }
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("qos", &self.qos)
            .finish()
    }
}

fn run_worker(queue_id: u64, label: &str, receiver: Receiver<Job>, pending: Arc<Pending>) {
    CURRENT_QUEUE.with(|current| current.set(queue_id));

    for job in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(queue = %label, "Dispatch queue task panicked");
        }
        pending.finish();
    }
}
