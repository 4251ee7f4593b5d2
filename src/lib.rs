//! flyweight: keyed caches that hand out shared, identity-stable
//! values, constructed on demand and destroyed through explicit or
//! scoped release.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: build the caches in verifiable layers so each piece can be
//!   reasoned about independently.
//! - Layers:
//!   - EntryStore<K, V, S>: structural index that maps keys to boxed
//!     entry cells and returns stable generational handles; O(1)
//!     average access without re-hashing.
//!   - Flyweight<K, V, S>: basic cache over the store; `get` constructs
//!     on miss, `release`/`clear` destroy unconditionally.
//!   - RcFlyweight<K, V, S>: adds per-entry reference counting;
//!     `release` destroys only when the count reaches zero.
//!   - Shared<C>: mutex adapter that serializes either cache, factory
//!     and deleter calls included.
//!
//! Constraints
//! - Pointer identity: a loaded value never moves until it is
//!   unloaded. Entry cells are individually boxed; the index may
//!   reallocate freely around them.
//! - Stable, generational handles: a handle to an unloaded entry can
//!   never alias a later one.
//! - Composite keys hash by folding per-component hashes through
//!   [`hash_combine`]; scalar keys defer to the cache's `BuildHasher`.
//! - Duplicate inserts are impossible by construction: every insert is
//!   preceded by a probe under the same borrow.
//!
//! Reentrancy policy and interior mutability
//! - The store never calls into user code while its structure is
//!   transiently inconsistent; only `K: Eq` and hashing run during
//!   probing. Factories and deleters run strictly outside store
//!   operations.
//! - `&self` entry points (`get_scoped`, `peek`) go through a
//!   `RefCell` whose borrows never cross into user code; a factory
//!   that reenters the same cache therefore observes a consistent
//!   structure, and at worst trips the borrow check with a panic
//!   rather than corrupting the index.
//!
//! Overflow semantics
//! - Reference-count overflow aborts the process, matching `Rc`. The
//!   count lives in a `Cell<usize>`; no atomics anywhere in the
//!   single-threaded types.
//!
//! Hasher and rehashing invariants
//! - Each entry stores its precomputed `u64` hash and indexing always
//!   uses the stored hash; key hashing is never invoked after
//!   insertion.
//!
//! Notes and non-goals
//! - The single-threaded types are `!Send`/`!Sync` through their
//!   scoped handles; cross-thread use goes through [`Shared`].
//! - No eviction policy: values live until released, cleared, or the
//!   cache drops.
//! - Keys are immutable post-insert; there is no `key_mut`.
//! - Public surface is the three cache types, their handles and
//!   guards, and the [`CacheKey`] hashing seam; [`Handle`] is exposed
//!   only as an opaque token.

pub mod hash;

mod cache;
mod counted;
mod entry;
mod hooks;
mod shared;
mod store;

// Public surface
pub use cache::{Flyweight, Scoped};
pub use counted::{RcFlyweight, RcScoped};
pub use entry::ValueRef;
pub use hash::{hash_combine, CacheKey};
pub use hooks::FactoryError;
pub use shared::{
    CacheCore, Shared, SharedScoped, SharedValueRef, SyncFlyweight, SyncRcFlyweight,
};
pub use store::Handle;
