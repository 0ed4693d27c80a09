//! Fixed-size ring storage indexed by `idx % N`.
//!
//! Used for the reliable-output send window (16 slots, §4.3) and the
//! reliable-input reassembly buffer. Modeled on the teacher's sparse
//! `Ring<T, N>`, but with a safe backing store instead of the teacher's
//! unsafe tagged-union slot representation: the ordering invariants the
//! stream layer relies on (insert/remove by absolute index) are identical.

pub struct Ring<T, const N: usize> {
	slots: [Option<T>; N],
}

impl<T, const N: usize> Ring<T, N> {
	#[inline]
	pub fn get(&self, idx: usize) -> Option<&T> {
		self.slots[idx % N].as_ref()
	}

	#[inline]
	pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
		self.slots[idx % N].as_mut()
	}

	#[inline]
	pub fn contains(&self, idx: usize) -> bool {
		self.slots[idx % N].is_some()
	}

	#[inline]
	pub fn remove(&mut self, idx: usize) -> Option<T> {
		self.slots[idx % N].take()
	}

	/// Insert `t` at `idx`, returning whatever was previously stored there.
	#[inline]
	pub fn insert(&mut self, idx: usize, t: T) -> Option<T> {
		self.slots[idx % N].replace(t)
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
		self.slots.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
	}
}

impl<T, const N: usize> Default for Ring<T, N> {
	fn default() -> Self {
		Self { slots: std::array::from_fn(|_| None) }
	}
}
