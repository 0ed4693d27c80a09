//! A `HashMap` keyed with `ahash`, the way the teacher workspace pulls
//! `ahash` in purely for the speed of its `BuildHasher` on short keys
//! (endpoint tuples, 16-bit object ids) rather than for DoS resistance.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use ahash::AHasher;

/// A `HashMap` using `ahash` as its hasher.
pub type Map<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

#[inline]
pub fn new<K, V>() -> Map<K, V> {
	Map::default()
}
