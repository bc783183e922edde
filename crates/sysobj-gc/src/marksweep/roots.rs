//! Thread-local root list.
//!
//! A root is the address of a pointer variable that may reference a
//! tracked block. Each thread owns its own list; a collection pass only
//! consults the list of the thread running it.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::defaults::UNINIT_ROOT;
use crate::{GcError, GcResult};

/// Value held by a root that has not been assigned yet.
pub const UNINIT: *mut u8 = UNINIT_ROOT as *mut u8;

/// Handle to a registered root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u64);

struct RootEntry {
    id: u64,
    addr: *mut *mut u8,
    name: &'static str,
}

static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ROOTS: RefCell<Vec<RootEntry>> = const { RefCell::new(Vec::new()) };
}

/// Register the address of a pointer variable as a root on this thread.
///
/// # Safety
/// `addr` must stay valid for reads until [`unregister_var`] is called
/// with the returned id.
pub unsafe fn register_var(addr: *mut *mut u8, name: &'static str) -> RootId {
    let id = NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed);
    ROOTS.with(|roots| roots.borrow_mut().push(RootEntry { id, addr, name }));
    tracing::trace!(target: "sysobj::gc", root = name, "root registered");
    RootId(id)
}

/// Remove a root from this thread's list.
pub fn unregister_var(id: RootId) -> GcResult<()> {
    ROOTS.with(|roots| {
        let mut roots = roots.borrow_mut();
        // Scopes exit in reverse order, so the entry is almost always last.
        match roots.iter().rposition(|entry| entry.id == id.0) {
            Some(index) => {
                roots.remove(index);
                Ok(())
            }
            None => {
                tracing::error!(target: "sysobj::gc", ?id, "unbalanced root unregistration");
                Err(GcError::UnbalancedRoot(id))
            }
        }
    })
}

/// Number of roots registered on this thread.
pub fn root_count() -> usize {
    ROOTS.with(|roots| roots.borrow().len())
}

/// Current value and name of every root on this thread, newest first.
pub(crate) fn snapshot() -> Vec<(*mut u8, &'static str)> {
    ROOTS.with(|roots| {
        roots
            .borrow()
            .iter()
            .rev()
            // SAFETY: registration requires the address to stay readable.
            .map(|entry| (unsafe { entry.addr.read() }, entry.name))
            .collect()
    })
}

/// A scoped root.
///
/// The guard owns the pointer slot the collector reads, so the slot's
/// address is stable for the guard's whole life. Dropping the guard clears
/// the slot and unregisters it.
///
/// ```
/// use sysobj_gc::{Collector, Rooted, TrackMode};
///
/// let collector = Collector::new();
/// let block = collector.malloc(64).unwrap();
/// unsafe { collector.set_track(block, TrackMode::Auto).unwrap() };
///
/// let root = Rooted::new("block");
/// root.set(block);
/// assert_eq!(collector.collect().freed, 0);
///
/// drop(root);
/// assert_eq!(collector.collect().freed, 1);
/// ```
pub struct Rooted {
    slot: Box<Cell<*mut u8>>,
    id: RootId,
    _not_send: PhantomData<*const ()>,
}

impl Rooted {
    /// Register an unassigned root.
    pub fn new(name: &'static str) -> Self {
        let slot = Box::new(Cell::new(UNINIT));
        // SAFETY: the slot lives on the heap until Drop unregisters it.
        let id = unsafe { register_var(slot.as_ptr(), name) };
        Self {
            slot,
            id,
            _not_send: PhantomData,
        }
    }

    /// Register a root already pointing at `ptr`.
    pub fn with(name: &'static str, ptr: NonNull<u8>) -> Self {
        let root = Self::new(name);
        root.set(ptr);
        root
    }

    pub fn set(&self, ptr: NonNull<u8>) {
        self.slot.set(ptr.as_ptr());
    }

    /// Make the root explicitly null.
    pub fn clear(&self) {
        self.slot.set(ptr::null_mut());
    }

    /// The referenced block, if the root has been assigned a non-null value.
    pub fn get(&self) -> Option<NonNull<u8>> {
        match self.slot.get() {
            p if p == UNINIT => None,
            p => NonNull::new(p),
        }
    }

    pub fn is_uninit(&self) -> bool {
        self.slot.get() == UNINIT
    }

    pub fn id(&self) -> RootId {
        self.id
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        self.slot.set(ptr::null_mut());
        let _ = unregister_var(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_starts_uninit() {
        let root = Rooted::new("fresh");
        assert!(root.is_uninit());
        assert_eq!(root.get(), None);
        root.clear();
        assert!(!root.is_uninit());
        assert_eq!(root.get(), None);
    }

    #[test]
    fn test_rooted_registers_and_unregisters() {
        let before = root_count();
        {
            let _a = Rooted::new("a");
            let _b = Rooted::new("b");
            assert_eq!(root_count(), before + 2);
        }
        assert_eq!(root_count(), before);
    }

    #[test]
    fn test_snapshot_reads_current_value() {
        let mut value = 0u64;
        let root = Rooted::new("value");
        let ptr = NonNull::from(&mut value).cast::<u8>();
        root.set(ptr);
        let snapshot = snapshot();
        assert_eq!(snapshot[0], (ptr.as_ptr(), "value"));
    }

    #[test]
    fn test_unbalanced_unregister_is_reported() {
        let mut slot: *mut u8 = ptr::null_mut();
        let id = unsafe { register_var(&mut slot, "slot") };
        assert!(unregister_var(id).is_ok());
        assert_eq!(unregister_var(id), Err(GcError::UnbalancedRoot(id)));
    }

    #[test]
    fn test_roots_are_per_thread() {
        let _root = Rooted::new("main");
        let other = std::thread::spawn(root_count).join().unwrap();
        assert_eq!(other, 0);
    }
}
