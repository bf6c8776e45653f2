//! Memory accounting for stores.

use std::mem::size_of;
use std::ops::{Add, AddAssign};

/// Bytes used and reserved by one or more vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorMemoryUsage {
	/// Bytes occupied by live elements.
	pub size: usize,
	/// Bytes reserved, including `size`.
	pub capacity: usize,
}

impl VectorMemoryUsage {
	/// Usage of a single vector.
	pub fn of<T>(vec: &Vec<T>) -> Self {
		Self {
			size: vec.len() * size_of::<T>(),
			capacity: vec.capacity() * size_of::<T>(),
		}
	}
}

impl Add for VectorMemoryUsage {
	type Output = Self;

	fn add(self, rhs: Self) -> Self {
		Self {
			size: self.size + rhs.size,
			capacity: self.capacity + rhs.capacity,
		}
	}
}

impl AddAssign for VectorMemoryUsage {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

/// Memory used by a store, split into column data and identifier bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageMemoryUsage {
	/// Column vectors.
	pub heavy_data: VectorMemoryUsage,
	/// Index array plus the shared row cells it points to.
	pub stable_identifiers: VectorMemoryUsage,
}

impl StorageMemoryUsage {
	/// Total across both categories.
	pub fn total(&self) -> VectorMemoryUsage {
		self.heavy_data + self.stable_identifiers
	}
}

impl Add for StorageMemoryUsage {
	type Output = Self;

	fn add(self, rhs: Self) -> Self {
		Self {
			heavy_data: self.heavy_data + rhs.heavy_data,
			stable_identifiers: self.stable_identifiers + rhs.stable_identifiers,
		}
	}
}

impl AddAssign for StorageMemoryUsage {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}
