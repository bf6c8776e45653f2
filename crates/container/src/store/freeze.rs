//! Sorted/frozen state machine.
//!
//! A store is either *mutable* or *frozen*. It is frozen while at least one
//! [`FrozenToken`] is alive, and while frozen its row count, row order and
//! column allocations do not change. Independently, a store is either
//! *sorted* or *unsorted*. Sorting is domain knowledge the store does not
//! have: callers reorder rows inside [`SoaStore::ensure_sorted`] and the store
//! records the result. Any structural change clears the sorted flag.
//!
//! Each transition into the sorted state starts a new *epoch*. Caches built
//! from flattened column views record the epoch they were built for and are
//! stale once it changes.

use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::SoaStore;
use super::structure::Access;
use crate::error::{Result, StoreError};
use crate::tag::Tag;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FreezeState {
	/// Outstanding tokens, including the one reserved by a sort in progress.
	pub frozen_count: usize,
	pub sorted: bool,
	pub epoch: u64,
	/// A thread is running the reorder closure of [`SoaStore::ensure_sorted`].
	pub sorting: bool,
}

impl SoaStore {
	/// Returns `true` if the store is in the sorted state.
	pub fn is_sorted(&self) -> bool {
		self.state.lock().sorted
	}

	/// Returns `true` while any token is outstanding or a sort is running.
	pub fn is_frozen(&self) -> bool {
		self.state.lock().frozen_count > 0
	}

	/// Number of outstanding tokens.
	pub fn frozen_count(&self) -> usize {
		self.state.lock().frozen_count
	}

	/// Current sort epoch.
	pub fn epoch(&self) -> u64 {
		self.state.lock().epoch
	}

	/// Freezes the store without touching the sorted flag.
	///
	/// Blocks while another thread is sorting.
	pub fn issue_frozen_token(self: &Arc<Self>) -> FrozenToken {
		let mut state = self.state.lock();
		while state.sorting {
			self.sort_done.wait(&mut state);
		}
		state.frozen_count += 1;
		FrozenToken { store: self.clone() }
	}

	/// Returns a token for the sorted state, trusting the caller that the
	/// current row order is the one it wants.
	///
	/// Equivalent to [`Self::ensure_sorted`] with a reorder that does nothing.
	pub fn get_sorted_token(self: &Arc<Self>) -> Result<FrozenToken> {
		self.ensure_sorted(|_| Ok(()))
	}

	/// Returns a token for the sorted state, running `reorder` first if the
	/// store is not sorted yet.
	///
	/// At most one thread runs `reorder` at a time; concurrent callers block
	/// until it finishes and then share the resulting epoch. If the store is
	/// already sorted, `reorder` is not called at all.
	///
	/// Fails if the store is unsorted while unsorted tokens (from
	/// [`Self::issue_frozen_token`]) are outstanding, or if `reorder` fails. A
	/// failed or panicking reorder leaves the store unsorted and unfrozen.
	pub fn ensure_sorted(
		self: &Arc<Self>,
		reorder: impl FnOnce(&mut SortSession<'_>) -> Result<()>,
	) -> Result<FrozenToken> {
		let mut state = self.state.lock();
		while state.sorting {
			self.sort_done.wait(&mut state);
		}
		if state.sorted {
			state.frozen_count += 1;
			return Ok(FrozenToken { store: self.clone() });
		}
		if state.frozen_count > 0 {
			return Err(self.frozen_error(&state, "ensure_sorted"));
		}
		state.sorting = true;
		state.frozen_count = 1;
		drop(state);

		let mut in_progress = SortInProgress {
			store: self,
			finished: false,
		};
		let mut session = SortSession { store: self };
		reorder(&mut session)?;

		let mut state = self.state.lock();
		state.sorting = false;
		if !state.sorted {
			state.sorted = true;
			state.epoch += 1;
		}
		debug!(store = %self.name, epoch = state.epoch, "store sorted and frozen");
		in_progress.finished = true;
		self.sort_done.notify_all();
		Ok(FrozenToken { store: self.clone() })
	}

	/// Leaves the sorted state.
	///
	/// Refused while any token is outstanding. Runs the unsorted callback.
	pub fn mark_as_unsorted(&self) -> Result<()> {
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "mark_as_unsorted")?;
		state.sorted = false;
		drop(state);
		debug!(store = %self.name, "store marked unsorted");
		self.run_unsorted_callback();
		Ok(())
	}

	pub(crate) fn frozen_error(&self, state: &FreezeState, operation: &'static str) -> StoreError {
		StoreError::Frozen {
			store: self.name.to_string(),
			operation,
			frozen_count: state.frozen_count,
			sorted: state.sorted,
		}
	}

	pub(crate) fn run_unsorted_callback(&self) {
		let callback = self.unsorted_callback.lock().clone();
		if let Some(callback) = callback {
			callback();
		}
	}
}

/// Releases the sort reservation if the reorder closure fails or panics.
struct SortInProgress<'a> {
	store: &'a SoaStore,
	finished: bool,
}

impl Drop for SortInProgress<'_> {
	fn drop(&mut self) {
		if self.finished {
			return;
		}
		let mut state = self.store.state.lock();
		state.sorting = false;
		state.frozen_count -= 1;
		debug!(store = %self.store.name, "sort abandoned");
		self.store.sort_done.notify_all();
	}
}

/// Access to a store while its reorder closure runs.
///
/// The store is frozen against every other caller for the duration, but the
/// session itself may permute rows.
pub struct SortSession<'a> {
	store: &'a Arc<SoaStore>,
}

impl SortSession<'_> {
	/// The store being sorted, for reads.
	pub fn store(&self) -> &Arc<SoaStore> {
		self.store
	}

	/// Checks that `counts` splits the store's rows into `parts` contiguous ranges.
	pub fn check_partition(&self, parts: usize, counts: &[usize]) -> Result<()> {
		let rows = self.store.indices.read().len();
		if counts.len() == parts && counts.iter().sum::<usize>() == rows {
			return Ok(());
		}
		Err(StoreError::Partition {
			store: self.store.name.to_string(),
			rows,
			parts,
			counts: counts.to_vec(),
		})
	}

	/// See [`SoaStore::reverse`].
	pub fn reverse(&mut self) -> Result<()> {
		self.store.reverse_with(Access::Session)
	}

	/// See [`SoaStore::rotate`].
	pub fn rotate(&mut self, k: usize) -> Result<()> {
		self.store.rotate_with(Access::Session, k)
	}

	/// See [`SoaStore::apply_permutation`].
	pub fn apply_permutation(&mut self, perm: &[usize]) -> Result<()> {
		self.store.apply_permutation_with(Access::Session, perm)
	}

	/// See [`SoaStore::apply_reverse_permutation`].
	pub fn apply_reverse_permutation(&mut self, perm: &[usize]) -> Result<()> {
		self.store.apply_reverse_permutation_with(Access::Session, perm)
	}
}

/// Shared capability guaranteeing that a store's layout does not change.
///
/// Cloning adds another outstanding token; the store thaws when the last one
/// is dropped. While a token is alive the store's columns do not reallocate,
/// so slices borrowed from [`Self::read`] and [`Self::write`] are exactly the
/// flattened data inner loops index into.
pub struct FrozenToken {
	store: Arc<SoaStore>,
}

impl FrozenToken {
	/// The frozen store.
	pub fn store(&self) -> &Arc<SoaStore> {
		&self.store
	}

	/// Returns `true` if the store was sorted when last checked.
	pub fn is_sorted(&self) -> bool {
		self.store.is_sorted()
	}

	/// Sort epoch of the store.
	///
	/// Only changes while frozen through [`Self::mark_as_sorted`].
	pub fn epoch(&self) -> u64 {
		self.store.epoch()
	}

	/// Declares the current row order sorted.
	///
	/// Only allowed while this is the sole outstanding token, so that no other
	/// holder observes the transition.
	pub fn mark_as_sorted(&self) -> Result<()> {
		let mut state = self.store.state.lock();
		if state.frozen_count != 1 || state.sorting {
			return Err(self.store.frozen_error(&state, "mark_as_sorted"));
		}
		if !state.sorted {
			state.sorted = true;
			state.epoch += 1;
			debug!(store = %self.store.name, epoch = state.epoch, "store marked sorted");
		}
		Ok(())
	}

	/// The whole column for `T`.
	pub fn read<T: Tag>(&self) -> Result<MappedRwLockReadGuard<'_, [T::Value]>> {
		self.read_field::<T>(0)
	}

	/// The whole column for field `field` of `T`.
	pub fn read_field<T: Tag>(&self, field: usize) -> Result<MappedRwLockReadGuard<'_, [T::Value]>> {
		let column = self.store.active_column::<T>(field)?;
		Ok(RwLockReadGuard::map(column.read(), |data| data.as_slice()))
	}

	/// The whole column for `T`, writable in place.
	pub fn write<T: Tag>(&self) -> Result<MappedRwLockWriteGuard<'_, [T::Value]>> {
		self.write_field::<T>(0)
	}

	/// The whole column for field `field` of `T`, writable in place.
	pub fn write_field<T: Tag>(&self, field: usize) -> Result<MappedRwLockWriteGuard<'_, [T::Value]>> {
		let column = self.store.active_column::<T>(field)?;
		Ok(RwLockWriteGuard::map(column.write(), |data| data.as_mut_slice()))
	}

	/// Reads the value of `T` at `row`.
	pub fn get<T: Tag>(&self, row: usize) -> Result<T::Value> {
		self.store.get::<T>(row)
	}

	/// Reads element `array_index` of field `field` of `T` at `row`.
	pub fn get_field<T: Tag>(&self, row: usize, field: usize, array_index: usize) -> Result<T::Value> {
		self.store.get_field::<T>(row, field, array_index)
	}

	/// Writes the value of `T` at `row`.
	pub fn set<T: Tag>(&self, row: usize, value: T::Value) -> Result<()> {
		self.set_field::<T>(row, 0, 0, value)
	}

	/// Writes element `array_index` of field `field` of `T` at `row`.
	pub fn set_field<T: Tag>(&self, row: usize, field: usize, array_index: usize, value: T::Value) -> Result<()> {
		let column = self.store.active_column::<T>(field)?;
		let offset = self.store.element_offset(column, row, array_index)?;
		column.write()[offset] = value;
		Ok(())
	}
}

impl Clone for FrozenToken {
	fn clone(&self) -> Self {
		self.store.state.lock().frozen_count += 1;
		Self {
			store: self.store.clone(),
		}
	}
}

impl Drop for FrozenToken {
	fn drop(&mut self) {
		let mut state = self.store.state.lock();
		state.frozen_count -= 1;
		if state.frozen_count == 0 {
			debug!(store = %self.store.name, "store thawed");
		}
	}
}

impl fmt::Debug for FrozenToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FrozenToken").field("store", &self.store.name).finish()
	}
}
