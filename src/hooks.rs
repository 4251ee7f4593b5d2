//! Type-erased factory and deleter callbacks.
//!
//! A cache owns one factory and one deleter for its whole lifetime. The
//! factory builds a value from a borrowed key on a miss; the deleter
//! runs on every value exactly once, right before it is dropped
//! (explicit release, `clear`, or cache drop). Both are stored boxed so
//! one cache type accepts any compatible callable, and both are `Send`
//! so the mutex adapter can be `Sync`.

use thiserror::Error;

/// The factory failed to construct a value.
///
/// The only signaled error in the crate: absence is reported through
/// `Option`/`bool` returns, never as an error. When a `get` surfaces
/// this, nothing was inserted and the cache is exactly as it was before
/// the call.
#[derive(Debug, Error)]
#[error("value construction failed: {source}")]
pub struct FactoryError {
    #[from]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl FactoryError {
    /// Wrap an arbitrary error raised inside a factory.
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Build a failure from a bare message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            source: message.into().into(),
        }
    }
}

pub(crate) type Factory<K, V> = Box<dyn Fn(&K) -> Result<V, FactoryError> + Send>;
pub(crate) type Deleter<V> = Box<dyn Fn(&mut V) + Send>;

pub(crate) struct Hooks<K, V> {
    pub(crate) factory: Factory<K, V>,
    pub(crate) deleter: Deleter<V>,
}

impl<K, V> Hooks<K, V> {
    /// Default hooks: construct the value from the key, no-op deleter.
    pub(crate) fn from_key() -> Self
    where
        K: Clone,
        V: From<K>,
    {
        Self {
            factory: Box::new(|key: &K| Ok(V::from(key.clone()))),
            deleter: Box::new(|_| {}),
        }
    }

    pub(crate) fn new(factory: Factory<K, V>, deleter: Deleter<V>) -> Self {
        Self { factory, deleter }
    }

    pub(crate) fn noop_deleter() -> Deleter<V> {
        Box::new(|_| {})
    }
}
