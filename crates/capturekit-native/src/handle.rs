//! Reference-counted handle table.
//!
//! Every object that crosses the boundary is stored here under a
//! [`HandleId`]. The caller owns one reference per `insert` or `retain`
//! and must give each back with exactly one `release`. Ids are never
//! reused, so a stale id is always detected instead of silently aliasing a
//! newer object.
//!
//! Destruction happens outside the table lock, in order: the object's
//! [`Retainable::on_final_release`] hook, the release of every handle the
//! object owns, then the drop itself.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::ContractViolation;

/// Opaque identifier of a table entry. Never zero, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(NonZeroU64);

impl HandleId {
    /// The first id a table hands out.
    pub const MIN: HandleId = HandleId(NonZeroU64::MIN);

    /// Returns None for zero.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw value; never zero.
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Objects that can live in a [`HandleTable`].
pub trait Retainable: Clone + Send + Sync + 'static {
    /// Name of the object kind, used in diagnostics.
    fn type_name(&self) -> &'static str;

    /// Runs once, when the last reference is released.
    fn on_final_release(&self) {}

    /// Handles owned by this object, released after `on_final_release`.
    fn owned_handles(&self) -> Vec<HandleId> {
        Vec::new()
    }
}

struct Entry<T> {
    object: T,
    refs: usize,
}

/// Map from handle ids to reference-counted objects.
pub struct HandleTable<T: Retainable> {
    entries: Mutex<HashMap<HandleId, Entry<T>>>,
    issued: AtomicU64,
    destroyed: AtomicU64,
}

impl<T: Retainable> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            issued: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    /// Store `object` with one reference owned by the caller.
    pub fn insert(&self, object: T) -> HandleId {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let id = HandleId(NonZeroU64::MIN.saturating_add(n));
        trace!(handle = %id, kind = object.type_name(), "Handle created");
        self.entries.lock().insert(id, Entry { object, refs: 1 });
        id
    }

    /// Borrow the object behind `id` without changing its count.
    pub fn get(&self, id: HandleId) -> Result<T, ContractViolation> {
        match self.entries.lock().get(&id) {
            Some(entry) => Ok(entry.object.clone()),
            None => Err(self.missing(id)),
        }
    }

    /// Add a reference. The returned id is the same handle, now owned once more.
    pub fn retain(&self, id: HandleId) -> Result<HandleId, ContractViolation> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or_else(|| self.missing(id))?;
        entry.refs += 1;
        trace!(handle = %id, refs = entry.refs, "Handle retained");
        Ok(id)
    }

    /// Drop a reference. Returns true if this destroyed the object.
    pub fn release(&self, id: HandleId) -> Result<bool, ContractViolation> {
        let removed = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(&id).ok_or_else(|| self.missing(id))?;
            entry.refs -= 1;
            trace!(handle = %id, refs = entry.refs, "Handle released");
            if entry.refs == 0 {
                entries.remove(&id)
            } else {
                None
            }
        };

        let Some(entry) = removed else {
            return Ok(false);
        };

        let object = entry.object;
        object.on_final_release();
        for owned in object.owned_handles() {
            if let Err(e) = self.release(owned) {
                warn!(handle = %id, error = %e, "Owned handle already gone");
            }
        }
        trace!(handle = %id, kind = object.type_name(), "Handle destroyed");
        drop(object);
        self.destroyed.fetch_add(1, Ordering::SeqCst);

        Ok(true)
    }

    /// Current reference count of `id`.
    pub fn ref_count(&self, id: HandleId) -> Result<usize, ContractViolation> {
        match self.entries.lock().get(&id) {
            Some(entry) => Ok(entry.refs),
            None => Err(self.missing(id)),
        }
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of entries destroyed so far.
    pub fn destroyed_count(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn missing(&self, id: HandleId) -> ContractViolation {
        if id.as_raw() <= self.issued.load(Ordering::SeqCst) {
            ContractViolation::Released(id)
        } else {
            ContractViolation::Unknown(id)
        }
    }
}

impl<T: Retainable> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
