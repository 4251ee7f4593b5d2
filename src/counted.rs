//! The reference-counted flyweight cache: same interface as the basic
//! cache plus a per-entry count. `get` and `get_scoped` increment,
//! `release` decrements, and the value is destroyed only when the count
//! reaches zero.

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

/// A keyed cache with reference-counted entries.
///
/// [`reference_count`](RcFlyweight::reference_count) reports the number
/// of un-released acquisitions for a key. An entry is removed (and its
/// deleter run) exactly when a release brings the count to zero;
/// `clear` and drop ignore residual counts and unload everything.
///
/// The recommended pattern for shared use is
/// [`get_scoped`](RcFlyweight::get_scoped): each [`RcScoped`] handle
/// owns one unit of the count and returns it on drop, and cloning a
/// handle is equivalent to another `get`.
pub struct RcFlyweight<K, V, S = RandomState> {
    pub(crate) store: RefCell<EntryStore<K, V, S>>,
    pub(crate) hooks: Hooks<K, V>,
}

impl<K, V> RcFlyweight<K, V>
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

impl<K, V> Default for RcFlyweight<K, V>
where
    K: CacheKey + Eq + Clone,
    V: From<K>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RcFlyweight<K, V>
where
    K: CacheKey + Eq,
{
    /// Cache with a user factory and a no-op deleter.
    pub fn with_factory(factory: impl Fn(&K) -> V + Send + 'static) -> Self {
        Self::with_try_factory(move |key: &K| Ok(factory(key)))
    }

    /// Cache with a fallible user factory; failures surface from `get`
    /// and `get_scoped` without inserting anything or counting.
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
    /// [`with_factory_and_deleter`](RcFlyweight::with_factory_and_deleter).
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

impl<K, V, S> RcFlyweight<K, V, S>
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

    /// Return the cached value for `key` and increment its reference
    /// count (a miss constructs the value with count 1).
    ///
    /// Every `get` must be balanced by one
    /// [`release`](RcFlyweight::release) for the entry to unload.
    pub fn get(&mut self, key: K) -> Result<&V, FactoryError> {
        let handle = self.load(key)?;
        Ok(self
            .store
            .get_mut()
            .value(handle)
            .expect("entry present immediately after load"))
    }

    /// Ensure `key` is loaded, count the acquisition, and return the
    /// handle. Used by `get` and the mutex adapter.
    pub(crate) fn load(&mut self, key: K) -> Result<Handle, FactoryError> {
        let handle = match self.store.get_mut().find(&key) {
            Some(handle) => handle,
            None => {
                let value = (self.hooks.factory)(&key)?;
                match self.store.get_mut().insert(key, value) {
                    Ok(handle) => handle,
                    // The factory has no `&mut` path back into this cache.
                    Err(_) => unreachable!("key inserted while the factory ran"),
                }
            }
        };
        let cell = self
            .store
            .get_mut()
            .cell(handle)
            .expect("entry present immediately after load");
        unsafe { cell.as_ref() }.retain();
        Ok(handle)
    }

    /// As `get`, but returns a handle that releases its count unit when
    /// it goes out of scope. Cloning the handle is an additional `get`.
    pub fn get_scoped(&self, key: K) -> Result<RcScoped<'_, K, V, S>, FactoryError> {
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
        let cell_ref = unsafe { cell.as_ref() };
        cell_ref.retain();
        cell_ref.acquire_borrow();
        Ok(RcScoped {
            owner: self,
            handle,
            cell,
            _nosend: PhantomData,
        })
    }

    /// Look up `key` without constructing or counting.
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

    /// Current reference count for `key`, or 0 if it is not loaded.
    pub fn reference_count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let store = self.store.borrow();
        match store.find(key) {
            Some(handle) => store
                .cell(handle)
                .map(|cell| unsafe { cell.as_ref() }.count.get())
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Decrement the count for `key`. Returns true only when this
    /// release reached zero and destroyed the value (deleter included).
    ///
    /// Releasing an absent key is a reported no-op (`false`), never an
    /// error.
    pub fn release<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let store = self.store.get_mut();
        let Some(handle) = store.find(key) else {
            return false;
        };
        self.release_handle(handle)
    }

    /// Unload everything regardless of residual counts, running the
    /// deleter once per entry. Per-entry order is unspecified.
    pub fn clear(&mut self) {
        let drained = self.store.get_mut().drain();
        for (_key, mut cell) in drained {
            (self.hooks.deleter)(&mut cell.value);
        }
    }

    pub(crate) fn release_handle(&mut self, handle: Handle) -> bool {
        let store = self.store.get_mut();
        let Some(cell) = store.cell(handle) else {
            return false;
        };
        let count = unsafe { cell.as_ref() }.count.get();
        if count > 1 {
            unsafe { cell.as_ref() }.count.set(count - 1);
            return false;
        }
        if count == 0 {
            // Normalized mis-pair handling: release at zero is a no-op.
            return false;
        }
        let (_key, mut cell) = store
            .remove(handle)
            .expect("handle resolved to a live entry above");
        (self.hooks.deleter)(&mut cell.value);
        true
    }

    /// Count an extra acquisition for an already-loaded entry. Used by
    /// the mutex adapter's handle clone.
    pub(crate) fn retain_handle(&mut self, handle: Handle) -> bool {
        match self.store.get_mut().cell(handle) {
            Some(cell) => {
                unsafe { cell.as_ref() }.retain();
                true
            }
            None => false,
        }
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

impl<K, V, S> Drop for RcFlyweight<K, V, S> {
    fn drop(&mut self) {
        // Same contract as `clear`: residual counts do not keep values
        // alive past the cache, but every value sees its deleter.
        let drained = self.store.get_mut().drain();
        for (_key, mut cell) in drained {
            (self.hooks.deleter)(&mut cell.value);
        }
    }
}

/// Scoped handle returned by [`RcFlyweight::get_scoped`]: dereferences
/// to the cached value and returns its count unit exactly once when
/// dropped.
///
/// Cloning increments the count; the clone owns its own pending
/// release. A moved-from handle performs no release.
pub struct RcScoped<'c, K, V, S = RandomState> {
    owner: &'c RcFlyweight<K, V, S>,
    handle: Handle,
    cell: NonNull<EntryCell<V>>,
    _nosend: PhantomData<*mut ()>,
}

impl<K, V, S> Deref for RcScoped<'_, K, V, S> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        // Safety: this handle owns one count unit and one borrow, so
        // the entry cannot be freed while the handle is live.
        unsafe { &self.cell.as_ref().value }
    }
}

impl<K, V, S> Clone for RcScoped<'_, K, V, S> {
    fn clone(&self) -> Self {
        let cell_ref = unsafe { self.cell.as_ref() };
        cell_ref.retain();
        cell_ref.acquire_borrow();
        Self {
            owner: self.owner,
            handle: self.handle,
            cell: self.cell,
            _nosend: PhantomData,
        }
    }
}

impl<K, V, S> Drop for RcScoped<'_, K, V, S> {
    fn drop(&mut self) {
        let last = {
            let cell_ref = unsafe { self.cell.as_ref() };
            cell_ref.release_borrow();
            let count = cell_ref.count.get();
            if count > 1 {
                cell_ref.count.set(count - 1);
                false
            } else {
                true
            }
        };
        if !last {
            return;
        }
        let removed = {
            let mut store = self.owner.store.borrow_mut();
            store.remove(self.handle)
        };
        let (_key, mut cell) = removed.expect("scoped handle entry is live until its release");
        (self.owner.hooks.deleter)(&mut cell.value);
    }
}
