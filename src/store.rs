//! Identity-stable keyed storage: a hash index over generational slots.
//!
//! The store keeps a `hashbrown::HashTable` of slot keys indexed by the
//! key's [`CacheKey`] hash, and the entries themselves in a
//! `slotmap::SlotMap`. Each entry records its precomputed hash (the key
//! is never re-hashed after insertion) and owns its value's
//! [`EntryCell`] through a raw pointer, so the cell's address survives
//! both index rehashes and slot-table growth.
//!
//! Handles are generational: a handle to a removed entry never resolves
//! to a later occupant of the same physical slot.

use crate::entry::EntryCell;
use crate::hash::CacheKey;
use core::borrow::Borrow;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::ptr::NonNull;

/// Opaque, generational reference to a loaded entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }

    pub(crate) fn raw(&self) -> DefaultKey {
        self.0
    }
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    hash: u64,
    cell: NonNull<EntryCell<V>>,
}

pub(crate) struct EntryStore<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
}

// The store owns the cells behind its `NonNull` pointers, Box-style;
// they are only ever reached through the store or through guards that
// borrow the enclosing cache.
unsafe impl<K: Send, V: Send, S: Send> Send for EntryStore<K, V, S> {}

#[derive(Debug, Eq, PartialEq)]
pub(crate) struct DuplicateKey;

impl<K, V, S> EntryStore<K, V, S>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            slots: SlotMap::with_key(),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + CacheKey,
    {
        q.cache_hash(&self.hasher)
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let hash = self.make_hash(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle::new(k))
    }

    pub(crate) fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.find(q).is_some()
    }

    /// Insert a new entry, allocating its cell. The key must be absent.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Result<Handle, DuplicateKey> {
        let hash = self.make_hash(&key);
        match self.index.entry(
            hash,
            |&k| self.slots.get(k).map(|e| e.key == key).unwrap_or(false),
            |&k| self.slots.get(k).map(|e| e.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(_) => Err(DuplicateKey),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let cell = NonNull::from(Box::leak(Box::new(EntryCell::new(value))));
                let k = self.slots.insert(Entry { key, hash, cell });
                v.insert(k);
                Ok(Handle::new(k))
            }
        }
    }
}

// Structural operations below use the stored per-entry hash and never
// invoke `CacheKey`, so they stay available without hasher bounds (the
// caches' `Drop` impls rely on this).
impl<K, V, S> EntryStore<K, V, S> {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Unlink an entry and hand back its key and owned cell.
    ///
    /// Panics if the entry still has outstanding borrows: freeing it
    /// would invalidate a live scoped handle or peek guard, so the
    /// mis-paired release is reported instead. The structure is left
    /// untouched in that case.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<(K, Box<EntryCell<V>>)> {
        let k = handle.raw();
        let entry = self.slots.get(k)?;
        let borrows = unsafe { entry.cell.as_ref() }.outstanding_borrows();
        assert!(
            borrows == 0,
            "entry released while {borrows} scoped or peek reference(s) are outstanding"
        );
        let entry = self
            .slots
            .remove(k)
            .expect("slot checked to be occupied above");
        if let Ok(occupied) = self.index.find_entry(entry.hash, |&kk| kk == k) {
            occupied.remove();
        }
        // Safety: the pointer came from `Box::leak` in `insert` and the
        // entry has just been unlinked, so ownership transfers back.
        let cell = unsafe { Box::from_raw(entry.cell.as_ptr()) };
        Some((entry.key, cell))
    }

    /// Remove every entry, returning the owned cells for deleter runs.
    pub(crate) fn drain(&mut self) -> Vec<(K, Box<EntryCell<V>>)> {
        self.index.clear();
        self.slots
            .drain()
            .map(|(_k, entry)| {
                let borrows = unsafe { entry.cell.as_ref() }.outstanding_borrows();
                assert!(
                    borrows == 0,
                    "cache cleared while {borrows} scoped or peek reference(s) are outstanding"
                );
                let cell = unsafe { Box::from_raw(entry.cell.as_ptr()) };
                (entry.key, cell)
            })
            .collect()
    }

    pub(crate) fn cell(&self, handle: Handle) -> Option<NonNull<EntryCell<V>>> {
        self.slots.get(handle.raw()).map(|e| e.cell)
    }

    pub(crate) fn value(&self, handle: Handle) -> Option<&V> {
        // Safety: the cell is owned by this entry and only guards that
        // borrow the cache read it; nothing mutates the value while the
        // entry is loaded.
        self.slots
            .get(handle.raw())
            .map(|e| unsafe { &e.cell.as_ref().value })
    }

    /// Exclusive access to a stored value. Callers hold `&mut` over the
    /// enclosing cache (or its lock), so no guard can alias the value.
    pub(crate) fn value_mut(&mut self, handle: Handle) -> Option<&mut V> {
        self.slots
            .get(handle.raw())
            .map(|e| unsafe { &mut (*e.cell.as_ptr()).value })
    }
}

impl<K, V, S> Drop for EntryStore<K, V, S> {
    fn drop(&mut self) {
        // Reclaim any cells the cache did not drain (the caches run
        // their deleters first; this only frees the memory).
        for (_k, entry) in self.slots.drain() {
            unsafe { drop(Box::from_raw(entry.cell.as_ptr())) };
        }
    }
}
