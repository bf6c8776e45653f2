//! Column storage.
//!
//! Each column is a contiguous `Vec<T>` behind its own lock, shared through an
//! `Arc` so that handles can keep referring to the column even when the vector
//! reallocates. Row `r` of a column with array dimension `d` occupies elements
//! `r * d .. (r + 1) * d`.

use std::any::{Any, TypeId};
use std::mem::size_of;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::memory::VectorMemoryUsage;

/// Process-unique identity of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub(crate) u64);

impl StoreId {
	/// Raw numeric value.
	pub fn get(self) -> u64 {
		self.0
	}
}

/// Descriptive metadata shared by all columns.
#[derive(Debug, Clone)]
pub(crate) struct ColumnMeta {
	pub store_id: StoreId,
	pub store_name: Arc<str>,
	pub field_name: String,
	pub array_dim: usize,
	pub optional: bool,
}

/// One typed column.
pub(crate) struct Column<T> {
	meta: ColumnMeta,
	default: T,
	active: AtomicBool,
	data: RwLock<Vec<T>>,
}

impl<T: Clone + Send + Sync + 'static> Column<T> {
	pub fn new(meta: ColumnMeta, default: T, active: bool, rows: usize) -> Self {
		let len = if active { rows * meta.array_dim } else { 0 };
		Self {
			data: RwLock::new(vec![default.clone(); len]),
			active: AtomicBool::new(active),
			default,
			meta,
		}
	}

	pub fn meta(&self) -> &ColumnMeta {
		&self.meta
	}

	pub fn array_dim(&self) -> usize {
		self.meta.array_dim
	}

	pub fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
		self.data.read()
	}

	pub fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
		self.data.write()
	}
}

/// Type-erased column operations the store applies to every column in lockstep.
pub(crate) trait ErasedColumn: Send + Sync {
	fn meta(&self) -> &ColumnMeta;
	fn value_type(&self) -> TypeId;
	fn is_active(&self) -> bool;
	/// Number of logical rows currently stored.
	fn rows(&self) -> usize;
	/// Like [`Self::rows`], but gives up instead of blocking on a held write guard.
	fn try_rows(&self) -> Option<usize>;
	fn reserve_rows(&self, rows: usize);
	fn push_rows(&self, count: usize);
	fn resize_rows(&self, rows: usize);
	/// Moves the last row into `row` and drops the last row.
	fn swap_remove_row(&self, row: usize);
	fn apply_swaps(&self, swaps: &[(usize, usize)]);
	fn set_active(&self, active: bool, rows: usize);
	fn shrink_to_fit(&self);
	fn memory(&self) -> VectorMemoryUsage;
	/// Maps an element address to `(row, array_index)` if it lies inside this column.
	fn locate(&self, addr: usize) -> Option<(usize, usize)>;
}

impl<T: Clone + Send + Sync + 'static> ErasedColumn for Column<T> {
	fn meta(&self) -> &ColumnMeta {
		&self.meta
	}

	fn value_type(&self) -> TypeId {
		TypeId::of::<T>()
	}

	fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	fn rows(&self) -> usize {
		self.data.read().len() / self.meta.array_dim
	}

	fn try_rows(&self) -> Option<usize> {
		self.data.try_read().map(|data| data.len() / self.meta.array_dim)
	}

	fn reserve_rows(&self, rows: usize) {
		if self.is_active() {
			self.data.write().reserve(rows * self.meta.array_dim);
		}
	}

	fn push_rows(&self, count: usize) {
		if !self.is_active() {
			return;
		}
		let mut data = self.data.write();
		let new_len = data.len() + count * self.meta.array_dim;
		data.resize(new_len, self.default.clone());
	}

	fn resize_rows(&self, rows: usize) {
		if !self.is_active() {
			return;
		}
		self.data.write().resize(rows * self.meta.array_dim, self.default.clone());
	}

	fn swap_remove_row(&self, row: usize) {
		if !self.is_active() {
			return;
		}
		let dim = self.meta.array_dim;
		let mut data = self.data.write();
		let last = data.len() / dim - 1;
		if row != last {
			let (head, tail) = data.split_at_mut(last * dim);
			head[row * dim..(row + 1) * dim].swap_with_slice(&mut tail[..dim]);
		}
		data.truncate(last * dim);
	}

	fn apply_swaps(&self, swaps: &[(usize, usize)]) {
		if !self.is_active() {
			return;
		}
		let dim = self.meta.array_dim;
		let mut data = self.data.write();
		for &(a, b) in swaps {
			for k in 0..dim {
				data.swap(a * dim + k, b * dim + k);
			}
		}
	}

	fn set_active(&self, active: bool, rows: usize) {
		if active == self.is_active() {
			return;
		}
		let mut data = self.data.write();
		if active {
			debug_assert!(data.is_empty());
			data.resize(rows * self.meta.array_dim, self.default.clone());
		} else {
			data.clear();
			data.shrink_to_fit();
		}
		self.active.store(active, Ordering::Release);
	}

	fn shrink_to_fit(&self) {
		self.data.write().shrink_to_fit();
	}

	fn memory(&self) -> VectorMemoryUsage {
		VectorMemoryUsage::of(&*self.data.read())
	}

	fn locate(&self, addr: usize) -> Option<(usize, usize)> {
		let elem = size_of::<T>();
		if elem == 0 || !self.is_active() {
			return None;
		}
		let data = self.data.read();
		let base = data.as_ptr() as usize;
		let end = base + data.len() * elem;
		if addr < base || addr >= end || (addr - base) % elem != 0 {
			return None;
		}
		let physical = (addr - base) / elem;
		Some((physical / self.meta.array_dim, physical % self.meta.array_dim))
	}
}

/// A column registered in a store: the erased view for lockstep operations
/// and the typed view for handles.
#[derive(Clone)]
pub(crate) struct ColumnSlot {
	pub erased: Arc<dyn ErasedColumn>,
	pub typed: Arc<dyn Any + Send + Sync>,
}

impl ColumnSlot {
	pub fn new<T: Clone + Send + Sync + 'static>(column: Column<T>) -> Self {
		Self::from_arc(Arc::new(column))
	}

	pub fn from_arc<T: Clone + Send + Sync + 'static>(column: Arc<Column<T>>) -> Self {
		Self {
			erased: column.clone(),
			typed: column,
		}
	}

	pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<Column<T>>> {
		self.typed.clone().downcast::<Column<T>>().ok()
	}

	pub fn downcast_ref<T: Send + Sync + 'static>(&self) -> Option<&Column<T>> {
		self.typed.downcast_ref::<Column<T>>()
	}
}
