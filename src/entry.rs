//! Per-entry record: the cached value plus its bookkeeping cells.
//!
//! Every entry lives in its own heap allocation owned by the store, so
//! the value's address is stable for as long as the entry is loaded:
//! index rehashes and slot-table growth move the pointer to the cell,
//! never the cell itself. Scoped handles and peek guards point straight
//! at the cell.
//!
//! Two counters, both plain `Cell`s (single-threaded, or serialized by
//! the mutex adapter):
//! - `count`: the reference count of the counted cache. The basic cache
//!   leaves it at zero.
//! - `borrows`: outstanding guard objects (scoped handles and peek
//!   guards) whose `Deref` must stay valid. Removal paths assert this
//!   is zero before freeing the value, which turns a mis-paired release
//!   under a live borrow into a panic instead of a dangling reference.

use core::cell::Cell;
use core::marker::PhantomData;
use core::ops::Deref;
use std::ptr::NonNull;

#[derive(Debug)]
pub(crate) struct EntryCell<V> {
    pub(crate) value: V,
    pub(crate) count: Cell<usize>,
    borrows: Cell<usize>,
}

impl<V> EntryCell<V> {
    pub(crate) fn new(value: V) -> Self {
        Self {
            value,
            count: Cell::new(0),
            borrows: Cell::new(0),
        }
    }

    /// Bump the reference count. Follows `Rc` semantics on overflow:
    /// abort rather than continue with a wrapped count.
    #[inline]
    pub(crate) fn retain(&self) {
        let n = self.count.get().wrapping_add(1);
        if n == 0 {
            std::process::abort();
        }
        self.count.set(n);
    }

    #[inline]
    pub(crate) fn acquire_borrow(&self) {
        let n = self.borrows.get().wrapping_add(1);
        if n == 0 {
            std::process::abort();
        }
        self.borrows.set(n);
    }

    #[inline]
    pub(crate) fn release_borrow(&self) {
        let n = self.borrows.get();
        debug_assert!(n > 0, "borrow count underflow");
        self.borrows.set(n - 1);
    }

    #[inline]
    pub(crate) fn outstanding_borrows(&self) -> usize {
        self.borrows.get()
    }
}

/// Borrow of a cached value returned by `peek`.
///
/// Holding a `ValueRef` marks the entry as borrowed; a release that
/// would destroy the value while the guard is live panics instead of
/// invalidating it. The guard is `!Send` and cannot outlive the cache
/// it came from.
pub struct ValueRef<'c, V> {
    cell: NonNull<EntryCell<V>>,
    _cache: PhantomData<&'c V>,
    _nosend: PhantomData<*mut ()>,
}

impl<'c, V> ValueRef<'c, V> {
    /// Caller must have called `acquire_borrow` on the cell, and the
    /// cell must stay allocated while any borrow is outstanding (the
    /// store's removal assertion upholds this).
    pub(crate) fn new(cell: NonNull<EntryCell<V>>) -> Self {
        Self {
            cell,
            _cache: PhantomData,
            _nosend: PhantomData,
        }
    }
}

impl<V> Deref for ValueRef<'_, V> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        // Safety: the entry cannot be freed while `borrows > 0`; this
        // guard holds one borrow until dropped.
        unsafe { &self.cell.as_ref().value }
    }
}

impl<V> Drop for ValueRef<'_, V> {
    fn drop(&mut self) {
        unsafe { self.cell.as_ref() }.release_borrow();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_accumulates() {
        let cell = EntryCell::new(5u32);
        assert_eq!(cell.count.get(), 0);
        cell.retain();
        cell.retain();
        assert_eq!(cell.count.get(), 2);
    }

    #[test]
    fn borrow_counter_balances() {
        let cell = EntryCell::new(());
        cell.acquire_borrow();
        cell.acquire_borrow();
        assert_eq!(cell.outstanding_borrows(), 2);
        cell.release_borrow();
        cell.release_borrow();
        assert_eq!(cell.outstanding_borrows(), 0);
    }

    #[test]
    fn value_ref_releases_borrow_on_drop() {
        let boxed = Box::new(EntryCell::new(42i32));
        let cell = NonNull::from(Box::leak(boxed));
        unsafe { cell.as_ref() }.acquire_borrow();
        {
            let guard = ValueRef::new(cell);
            assert_eq!(*guard, 42);
        }
        let cell_ref = unsafe { cell.as_ref() };
        assert_eq!(cell_ref.outstanding_borrows(), 0);
        drop(unsafe { Box::from_raw(cell.as_ptr()) });
    }
}
