//! Key hashing: scalar keys hash through the cache's `BuildHasher`,
//! composite (tuple) keys fold componentwise hashes with `hash_combine`.
//!
//! The fold is right-to-left: for components (c0, c1, c2) the composite
//! hash is `combine(h0, combine(h1, h2))`. `hash_combine` is the
//! boost-style seeded mix; it is deterministic, order-dependent, and a
//! single-component change perturbs the result. Equality on composite
//! keys is the componentwise `Eq` the tuple already carries.

use core::hash::BuildHasher;

/// Combine two 64-bit hash values.
///
/// Uses the canonical parenthesization of the boost `hash_combine`
/// expression; `a ^ b + seed` would bind as `a ^ (b + seed)` in C and
/// silently weaken the mix, so the grouping is explicit here.
#[inline]
pub const fn hash_combine(a: u64, b: u64) -> u64 {
    a ^ (b
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(a << 6)
        .wrapping_add(a >> 2))
}

/// Hashing strategy for cache keys.
///
/// Scalar keys defer to the cache's `BuildHasher`. Tuples combine their
/// components with [`hash_combine`]. Implementations must agree with
/// `Eq`: equal keys produce equal hashes under the same builder, and a
/// borrowed form used for lookup (`K: Borrow<Q>`) must hash like the
/// owned key does.
pub trait CacheKey {
    /// Hash this key using `build` for any scalar components.
    fn cache_hash<S: BuildHasher>(&self, build: &S) -> u64;
}

/// Implement [`CacheKey`] for scalar types by hashing the whole value
/// through the cache's `BuildHasher`.
///
/// The crate already covers the primitive integers, `bool`, `char`,
/// `str`/`String`, and `Path`/`PathBuf`. Downstream key types opt in
/// with one line:
///
/// ```
/// use flyweight::scalar_key;
///
/// #[derive(Hash, PartialEq, Eq, Clone)]
/// struct TextureId(u32);
/// scalar_key!(TextureId);
/// ```
#[macro_export]
macro_rules! scalar_key {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::hash::CacheKey for $t {
                #[inline]
                fn cache_hash<S: ::core::hash::BuildHasher>(&self, build: &S) -> u64 {
                    build.hash_one(self)
                }
            }
        )+
    };
}

scalar_key!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char
);
scalar_key!(str, String, std::path::Path, std::path::PathBuf);

impl<T: CacheKey + ?Sized> CacheKey for &T {
    #[inline]
    fn cache_hash<S: BuildHasher>(&self, build: &S) -> u64 {
        (**self).cache_hash(build)
    }
}

// Tuple keys: componentwise hashes folded right-to-left.
macro_rules! tuple_key {
    ($($T:ident),+) => {
        impl<$($T: CacheKey),+> CacheKey for ($($T,)+) {
            #[allow(non_snake_case)]
            fn cache_hash<S: BuildHasher>(&self, build: &S) -> u64 {
                let ($($T,)+) = self;
                let hashes = [$($T.cache_hash(build)),+];
                hashes
                    .iter()
                    .copied()
                    .rev()
                    .reduce(|acc, h| hash_combine(h, acc))
                    .expect("tuple has at least one component")
            }
        }
    };
}

tuple_key!(A);
tuple_key!(A, B);
tuple_key!(A, B, C);
tuple_key!(A, B, C, D);
tuple_key!(A, B, C, D, E);
tuple_key!(A, B, C, D, E, F);
tuple_key!(A, B, C, D, E, F, G);
tuple_key!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    /// Invariant: the mix matches the documented formula, with the
    /// addition grouped before the xor.
    #[test]
    fn combine_matches_parenthesized_formula() {
        let (a, b) = (0x0123_4567_89ab_cdefu64, 0xfedc_ba98_7654_3210u64);
        let expected = a ^ (b
            .wrapping_add(0x9e37_79b9)
            .wrapping_add(a << 6)
            .wrapping_add(a >> 2));
        assert_eq!(hash_combine(a, b), expected);
    }

    /// Invariant: the mix is order-dependent (not commutative).
    #[test]
    fn combine_is_order_dependent() {
        let (a, b) = (1u64, 2u64);
        assert_ne!(hash_combine(a, b), hash_combine(b, a));
    }

    /// Invariant: tuple hashes fold right-to-left over componentwise
    /// hashes. Verified against a manual fold with the same builder.
    #[test]
    fn tuple_hash_is_right_fold() {
        let build = RandomState::new();
        let key = ("sprite".to_string(), 3u32, true);
        let h0 = key.0.cache_hash(&build);
        let h1 = key.1.cache_hash(&build);
        let h2 = key.2.cache_hash(&build);
        assert_eq!(key.cache_hash(&build), hash_combine(h0, hash_combine(h1, h2)));
    }

    /// Invariant: a single-component tuple hashes as its component (the
    /// fold base case has nothing to combine with).
    #[test]
    fn single_component_tuple_hashes_as_component() {
        let build = RandomState::new();
        assert_eq!((7u32,).cache_hash(&build), 7u32.cache_hash(&build));
    }

    /// Invariant: perturbing any single component changes the composite
    /// hash, and the hash is deterministic for a fixed builder.
    #[test]
    fn component_perturbation_changes_hash() {
        let build = RandomState::new();
        let base = ("a".to_string(), 1u32);
        assert_eq!(base.cache_hash(&build), base.cache_hash(&build));
        assert_ne!(base.cache_hash(&build), ("b".to_string(), 1u32).cache_hash(&build));
        assert_ne!(base.cache_hash(&build), ("a".to_string(), 2u32).cache_hash(&build));
    }

    /// Invariant: borrowed scalar forms hash like their owned key, so
    /// `K: Borrow<Q>` lookups resolve to the same bucket.
    #[test]
    fn borrowed_form_hashes_like_owned() {
        let build = RandomState::new();
        let owned = "hello".to_string();
        assert_eq!(owned.cache_hash(&build), "hello".cache_hash(&build));
    }
}
