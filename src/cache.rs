//! The basic flyweight cache: one value per distinct key with
//! insertion-or-lookup semantics and explicit release.

use crate::entry::{EntryCell, ValueRef};
use crate::hash::CacheKey;
use crate::hooks::{FactoryError, Hooks};
use crate::store::{EntryStore, Handle};
use core::borrow::Borrow;
use core::cell::RefCell;
use core::marker::PhantomData;
use core::ops::Deref;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::ptr::NonNull;

/// A keyed cache that constructs each value at most once per loaded
/// lifetime and keeps it at a stable address until released.
///
/// `get` returns a plain reference and requires `&mut self`; the borrow
/// checker then guarantees the reference is not used past the matching
/// `release`/`clear`. [`get_scoped`](Flyweight::get_scoped) takes
/// `&self` and returns a [`Scoped`] handle that releases the entry when
/// dropped; handles cannot outlive the cache.
///
/// Entries live until explicitly released or the cache is dropped; the
/// cache never evicts on its own.
pub struct Flyweight<K, V, S = RandomState> {
    pub(crate) store: RefCell<EntryStore<K, V, S>>,
    pub(crate) hooks: Hooks<K, V>,
}

impl<K, V> Flyweight<K, V>
where
    K: CacheKey + Eq + Clone,
    V: From<K>,
{
    /// Cache with the default factory (`V::from(key)`) and a no-op
    /// deleter.
    pub fn new() -> Self {
        Self::with_parts(RandomState::new(), Hooks::from_key())
    }
}

impl<K, V> Default for Flyweight<K, V>
where
    K: CacheKey + Eq + Clone,
    V: From<K>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Flyweight<K, V>
where
    K: CacheKey + Eq,
{
    /// Cache with a user factory and a no-op deleter.
    pub fn with_factory(factory: impl Fn(&K) -> V + Send + 'static) -> Self {
        Self::with_try_factory(move |key: &K| Ok(factory(key)))
    }

    /// Cache with a fallible user factory; failures surface from `get`
    /// and `get_scoped` without inserting anything.
    pub fn with_try_factory(
        factory: impl Fn(&K) -> Result<V, FactoryError> + Send + 'static,
    ) -> Self {
        Self::with_parts(
            RandomState::new(),
            Hooks::new(Box::new(factory), Hooks::<K, V>::noop_deleter()),
        )
    }

    /// Cache with a user factory and a deleter that runs on every value
    /// exactly once before it is dropped.
    pub fn with_factory_and_deleter(
        factory: impl Fn(&K) -> V + Send + 'static,
        deleter: impl Fn(&mut V) + Send + 'static,
    ) -> Self {
        Self::with_try_factory_and_deleter(move |key: &K| Ok(factory(key)), deleter)
    }

    /// Fallible-factory variant of
    /// [`with_factory_and_deleter`](Flyweight::with_factory_and_deleter).
    pub fn with_try_factory_and_deleter(
        factory: impl Fn(&K) -> Result<V, FactoryError> + Send + 'static,
        deleter: impl Fn(&mut V) + Send + 'static,
    ) -> Self {
        Self::with_parts(
            RandomState::new(),
            Hooks::new(Box::new(factory), Box::new(deleter)),
        )
    }
}

impl<K, V, S> Flyweight<K, V, S>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    /// Cache with an explicit hash builder and default hooks.
    pub fn with_hasher(hasher: S) -> Self
    where
        K: Clone,
        V: From<K>,
    {
        Self::with_parts(hasher, Hooks::from_key())
    }

    pub(crate) fn with_parts(hasher: S, hooks: Hooks<K, V>) -> Self {
        Self {
            store: RefCell::new(EntryStore::with_hasher(hasher)),
            hooks,
        }
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }

    /// Return the cached value for `key`, constructing it with the
    /// factory on a miss.
    ///
    /// The reference stays valid (same address) until the matching
    /// [`release`](Flyweight::release) or [`clear`](Flyweight::clear);
    /// with `&mut self` in the signature, the borrow checker enforces
    /// exactly that.
    pub fn get(&mut self, key: K) -> Result<&V, FactoryError> {
        let handle = self.load(key)?;
        Ok(self
            .store
            .get_mut()
            .value(handle)
            .expect("entry present immediately after load"))
    }

    /// Ensure `key` is loaded and return its handle. Used by `get` and
    /// the mutex adapter.
    pub(crate) fn load(&mut self, key: K) -> Result<Handle, FactoryError> {
        if let Some(handle) = self.store.get_mut().find(&key) {
            return Ok(handle);
        }
        let value = (self.hooks.factory)(&key)?;
        match self.store.get_mut().insert(key, value) {
            Ok(handle) => Ok(handle),
            // The factory has no `&mut` path back into this cache.
            Err(_) => unreachable!("key inserted while the factory ran"),
        }
    }

    /// As `get`, but returns a handle that releases the entry when it
    /// goes out of scope.
    ///
    /// Overlapping handles for the same key share the entry; the value
    /// is destroyed when the last of them drops. The handles are
    /// move-only (cloning one would not acquire anything the clone
    /// could give back).
    pub fn get_scoped(&self, key: K) -> Result<Scoped<'_, K, V, S>, FactoryError> {
        let found = self.store.borrow().find(&key);
        let handle = match found {
            Some(handle) => handle,
            None => {
                // User code runs only while the structure is consistent
                // and unborrowed.
                let value = (self.hooks.factory)(&key)?;
                match self.store.borrow_mut().insert(key, value) {
                    Ok(handle) => handle,
                    Err(_) => panic!("factory re-entered the cache and loaded the same key"),
                }
            }
        };
        let cell = self
            .store
            .borrow()
            .cell(handle)
            .expect("entry present immediately after load");
        unsafe { cell.as_ref() }.acquire_borrow();
        Ok(Scoped {
            owner: self,
            handle,
            cell,
            _nosend: PhantomData,
        })
    }

    /// Look up `key` without constructing. The guard borrows the entry;
    /// releasing the entry while the guard is live panics.
    pub fn peek<Q>(&self, key: &Q) -> Option<ValueRef<'_, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let store = self.store.borrow();
        let handle = store.find(key)?;
        let cell = store.cell(handle)?;
        drop(store);
        unsafe { cell.as_ref() }.acquire_borrow();
        Some(ValueRef::new(cell))
    }

    pub fn is_loaded<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.store.borrow().contains_key(key)
    }

    /// Unload `key`: run the deleter and drop the value. Returns false
    /// if the key was absent.
    pub fn release<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let store = self.store.get_mut();
        let Some(handle) = store.find(key) else {
            return false;
        };
        let (_key, mut cell) = store
            .remove(handle)
            .expect("found handle resolves to a live entry");
        (self.hooks.deleter)(&mut cell.value);
        true
    }

    /// Unload everything, running the deleter once per entry. Per-entry
    /// order is unspecified.
    pub fn clear(&mut self) {
        let drained = self.store.get_mut().drain();
        for (_key, mut cell) in drained {
            (self.hooks.deleter)(&mut cell.value);
        }
    }

    pub(crate) fn release_handle(&mut self, handle: Handle) -> bool {
        let Some((_key, mut cell)) = self.store.get_mut().remove(handle) else {
            return false;
        };
        (self.hooks.deleter)(&mut cell.value);
        true
    }

    pub(crate) fn peek_value_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let store = self.store.get_mut();
        let handle = store.find(key)?;
        store.value_mut(handle)
    }

    pub(crate) fn handle_value_mut(&mut self, handle: Handle) -> Option<&mut V> {
        self.store.get_mut().value_mut(handle)
    }
}

impl<K, V, S> Drop for Flyweight<K, V, S> {
    fn drop(&mut self) {
        // Same contract as `clear`: every loaded value sees its deleter
        // before it is dropped. The store then frees the cells.
        let drained = self.store.get_mut().drain();
        for (_key, mut cell) in drained {
            (self.hooks.deleter)(&mut cell.value);
        }
    }
}

/// Scoped handle returned by [`Flyweight::get_scoped`]: dereferences to
/// the cached value, and the entry is unloaded (deleter included) by
/// the handle drop that leaves no other handle or peek guard borrowing
/// it. If a peek guard is the final borrower, the entry stays loaded
/// until an explicit `release` or `clear`.
///
/// Move-only; a moved-from handle performs no release.
pub struct Scoped<'c, K, V, S = RandomState> {
    owner: &'c Flyweight<K, V, S>,
    handle: Handle,
    cell: NonNull<EntryCell<V>>,
    _nosend: PhantomData<*mut ()>,
}

impl<K, V, S> Deref for Scoped<'_, K, V, S> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        // Safety: this handle holds one borrow on the entry, and every
        // removal path refuses to free a borrowed entry.
        unsafe { &self.cell.as_ref().value }
    }
}

impl<K, V, S> Drop for Scoped<'_, K, V, S> {
    fn drop(&mut self) {
        let cell_ref = unsafe { self.cell.as_ref() };
        cell_ref.release_borrow();
        // Another handle or a peek guard still borrows the entry; the
        // last one to drop performs the removal.
        if cell_ref.outstanding_borrows() > 0 {
            return;
        }
        let removed = {
            let mut store = self.owner.store.borrow_mut();
            store.remove(self.handle)
        };
        let Some((_key, mut cell)) = removed else {
            return;
        };
        (self.owner.hooks.deleter)(&mut cell.value);
    }
}
