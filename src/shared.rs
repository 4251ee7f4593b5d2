//! Mutex adapter: serializes every public operation of a wrapped cache,
//! factory and deleter invocations included.
//!
//! `Shared<C>` holds the inner cache behind a single
//! `parking_lot::Mutex`; operations are linearizable in lock order.
//! Value access comes back as lock-mapped guards
//! ([`SharedValueRef`]) rather than raw references, so the borrow and
//! the critical section are the same thing. [`SharedScoped`] handles
//! carry only a generational [`Handle`] and re-lock on access and on
//! drop: a `clear` racing with an outstanding handle turns the handle
//! into a reported no-op instead of a dangling pointer.
//!
//! The factory must not call back into the same `Shared` cache (the
//! mutex is not reentrant) and should complete in bounded time, since
//! it blocks every other operation.

use crate::cache::Flyweight;
use crate::counted::RcFlyweight;
use crate::hash::CacheKey;
use crate::hooks::FactoryError;
use crate::store::Handle;
use core::borrow::Borrow;
use core::ops::Deref;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

/// Thread-safe basic cache.
pub type SyncFlyweight<K, V, S = RandomState> = Shared<Flyweight<K, V, S>>;

/// Thread-safe reference-counted cache.
pub type SyncRcFlyweight<K, V, S = RandomState> = Shared<RcFlyweight<K, V, S>>;

mod sealed {
    pub trait Sealed {}
    impl<K, V, S> Sealed for crate::cache::Flyweight<K, V, S> {}
    impl<K, V, S> Sealed for crate::counted::RcFlyweight<K, V, S> {}
}

/// Cache types that [`Shared`] can wrap. Sealed; implemented by
/// [`Flyweight`] and [`RcFlyweight`].
pub trait CacheCore: sealed::Sealed {
    /// Value type stored by the cache.
    type Value;

    #[doc(hidden)]
    fn release_entry(&mut self, handle: Handle) -> bool;

    #[doc(hidden)]
    fn entry_value_mut(&mut self, handle: Handle) -> Option<&mut Self::Value>;
}

impl<K, V, S> CacheCore for Flyweight<K, V, S>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    type Value = V;

    fn release_entry(&mut self, handle: Handle) -> bool {
        self.release_handle(handle)
    }

    fn entry_value_mut(&mut self, handle: Handle) -> Option<&mut V> {
        self.handle_value_mut(handle)
    }
}

impl<K, V, S> CacheCore for RcFlyweight<K, V, S>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    type Value = V;

    fn release_entry(&mut self, handle: Handle) -> bool {
        self.release_handle(handle)
    }

    fn entry_value_mut(&mut self, handle: Handle) -> Option<&mut V> {
        self.handle_value_mut(handle)
    }
}

/// A cache wrapped in a single exclusive mutex.
pub struct Shared<C> {
    inner: Mutex<C>,
}

impl<C: CacheCore> Shared<C> {
    /// Wrap an already-configured cache.
    pub fn new(cache: C) -> Self {
        Self {
            inner: Mutex::new(cache),
        }
    }
}

impl<K, V, S> Shared<Flyweight<K, V, S>>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    /// Return the cached value for `key`, constructing on a miss. The
    /// guard holds the lock; drop it promptly.
    pub fn get(&self, key: K) -> Result<SharedValueRef<'_, V>, FactoryError> {
        let mut guard = self.inner.lock();
        let handle = guard.load(key)?;
        Ok(SharedValueRef {
            guard: MutexGuard::map(guard, |cache| {
                cache
                    .handle_value_mut(handle)
                    .expect("entry present immediately after load")
            }),
        })
    }

    /// As `get`, but returns a handle whose drop releases the entry.
    pub fn get_scoped(&self, key: K) -> Result<SharedScoped<'_, Flyweight<K, V, S>>, FactoryError> {
        let handle = self.inner.lock().load(key)?;
        Ok(SharedScoped {
            owner: self,
            handle,
        })
    }

    /// Look up `key` without constructing.
    pub fn peek<Q>(&self, key: &Q) -> Option<SharedValueRef<'_, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let guard = self.inner.lock();
        MutexGuard::try_map(guard, |cache| cache.peek_value_mut(key))
            .ok()
            .map(|guard| SharedValueRef { guard })
    }

    pub fn is_loaded<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.inner.lock().is_loaded(key)
    }

    /// Unload `key`; the deleter runs under the lock.
    pub fn release<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.inner.lock().release(key)
    }

    /// Unload everything; deleters run under the lock.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<K, V, S> Shared<RcFlyweight<K, V, S>>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    /// Return the cached value for `key`, incrementing its reference
    /// count (a miss constructs with count 1). The guard holds the
    /// lock; drop it promptly.
    pub fn get(&self, key: K) -> Result<SharedValueRef<'_, V>, FactoryError> {
        let mut guard = self.inner.lock();
        let handle = guard.load(key)?;
        Ok(SharedValueRef {
            guard: MutexGuard::map(guard, |cache| {
                cache
                    .handle_value_mut(handle)
                    .expect("entry present immediately after load")
            }),
        })
    }

    /// As `get`, but the count unit is owned by the returned handle and
    /// released on its drop. Cloning the handle is an additional `get`.
    pub fn get_scoped(
        &self,
        key: K,
    ) -> Result<SharedScoped<'_, RcFlyweight<K, V, S>>, FactoryError> {
        let handle = self.inner.lock().load(key)?;
        Ok(SharedScoped {
            owner: self,
            handle,
        })
    }

    /// Look up `key` without constructing or counting.
    pub fn peek<Q>(&self, key: &Q) -> Option<SharedValueRef<'_, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        let guard = self.inner.lock();
        MutexGuard::try_map(guard, |cache| cache.peek_value_mut(key))
            .ok()
            .map(|guard| SharedValueRef { guard })
    }

    pub fn is_loaded<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.inner.lock().is_loaded(key)
    }

    /// Current reference count for `key`, or 0 if it is not loaded.
    pub fn reference_count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.inner.lock().reference_count(key)
    }

    /// Decrement the count for `key`; destroys the value at zero. The
    /// deleter runs under the lock.
    pub fn release<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + CacheKey + Eq,
    {
        self.inner.lock().release(key)
    }

    /// Unload everything regardless of residual counts; deleters run
    /// under the lock. Outstanding [`SharedScoped`] handles degrade to
    /// no-ops.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Lock-mapped borrow of a cached value. Holding it keeps the cache's
/// mutex locked.
pub struct SharedValueRef<'c, V> {
    guard: MappedMutexGuard<'c, V>,
}

impl<V> Deref for SharedValueRef<'_, V> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        &self.guard
    }
}

/// Scoped handle over a [`Shared`] cache.
///
/// Unlike the single-threaded handles it does not borrow the value:
/// [`value`](SharedScoped::value) re-locks per access, and drop
/// re-locks to issue exactly one release. If the entry was already
/// unloaded by `clear`, both degrade to no-ops (generational handles
/// never alias a later entry).
pub struct SharedScoped<'c, C: CacheCore> {
    owner: &'c Shared<C>,
    handle: Handle,
}

impl<'c, C: CacheCore> SharedScoped<'c, C> {
    /// Borrow the value under the lock, or `None` if the entry has been
    /// unloaded out from under the handle.
    pub fn value(&self) -> Option<SharedValueRef<'_, C::Value>> {
        let guard = self.owner.inner.lock();
        MutexGuard::try_map(guard, |cache| cache.entry_value_mut(self.handle))
            .ok()
            .map(|guard| SharedValueRef { guard })
    }
}

impl<K, V, S> Clone for SharedScoped<'_, RcFlyweight<K, V, S>>
where
    K: CacheKey + Eq,
    S: BuildHasher,
{
    fn clone(&self) -> Self {
        self.owner.inner.lock().retain_handle(self.handle);
        Self {
            owner: self.owner,
            handle: self.handle,
        }
    }
}

impl<C: CacheCore> Drop for SharedScoped<'_, C> {
    fn drop(&mut self) {
        let mut guard = self.owner.inner.lock();
        let _ = guard.release_entry(self.handle);
    }
}
