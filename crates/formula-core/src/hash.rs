use core::hash::Hash;
use std::hash::Hasher;

#[cfg(feature = "std-hash")]
pub mod default {
    pub use std::collections::hash_map::DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
pub mod default {
    pub use ahash::AHasher as DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// Hash a caller-supplied key with whichever default hasher is active.
///
/// Keys only need to be stable within one process, so the unseeded default
/// of either backend is fine.
#[inline]
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut h = default::new();
    key.hash(&mut h);
    h.finish()
}
