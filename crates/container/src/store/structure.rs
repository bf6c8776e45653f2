//! Operations that change the row count, row order, or column allocations.

use std::sync::Arc;

use tracing::{debug, trace};

use super::freeze::FreezeState;
use super::permute::{check_permutation, invert, left_rotation, reversal, swap_sequence};
use super::{ColumnKind, SoaStore};
use crate::error::{PermutationError, Result, StoreError};
use crate::identifier::{DeathCallback, Identifier};
use crate::owning::OwningIdentifier;
use crate::tag::Tag;

/// Who is asking for a structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
	/// Ordinary callers; refused while frozen.
	Owner,
	/// The reorder closure of an in-progress sort.
	Session,
}

/// Outcome of a structural change, acted on once every lock is released.
#[derive(Default)]
#[must_use]
struct Aftermath {
	deaths: Vec<DeathCallback>,
	unsorted: bool,
}

impl Aftermath {
	fn run(self, store: &SoaStore) {
		if self.unsorted {
			store.run_unsorted_callback();
		}
		for callback in self.deaths {
			callback();
		}
	}
}

impl SoaStore {
	/// Appends a default-valued row and returns its owner.
	pub fn emplace_back(self: &Arc<Self>) -> Result<OwningIdentifier> {
		OwningIdentifier::new(self)
	}

	/// Swap-deletes physical row `row`, invalidating its identifier.
	///
	/// The last row moves into `row`, so row order is not preserved.
	pub fn erase(&self, row: usize) -> Result<()> {
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "erase")?;
		let mut indices = self.indices.write();
		if row >= indices.len() {
			return Err(StoreError::RowOutOfBounds {
				store: self.name.to_string(),
				row,
				len: indices.len(),
			});
		}
		let deaths = self.swap_remove(&mut indices, row);
		let unsorted = Self::unsort(&mut state);
		drop(indices);
		drop(state);
		Aftermath { deaths, unsorted }.run(self);
		Ok(())
	}

	/// Resizes every column to `rows` rows.
	///
	/// Rows added by growing get fresh identifiers owned by the store. Rows cut
	/// by shrinking have their identifiers invalidated.
	pub fn resize(&self, rows: usize) -> Result<()> {
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "resize")?;
		let mut indices = self.indices.write();
		let old = indices.len();
		if rows == old {
			return Ok(());
		}
		let mut deaths = Vec::new();
		for identifier in indices.drain(rows.min(old)..) {
			deaths.extend(identifier.invalidate());
		}
		indices.extend((old..rows).map(Identifier::fresh));
		for slot in &self.columns {
			slot.erased.resize_rows(rows);
		}
		debug!(store = %self.name, from = old, to = rows, "store resized");
		self.check_lengths(indices.len());
		let unsorted = Self::unsort(&mut state);
		drop(indices);
		drop(state);
		Aftermath { deaths, unsorted }.run(self);
		Ok(())
	}

	/// Reverses the row order.
	pub fn reverse(&self) -> Result<()> {
		self.reverse_with(Access::Owner)
	}

	/// Rotates rows left by `k`, so that row `k % size()` becomes row 0.
	pub fn rotate(&self, k: usize) -> Result<()> {
		self.rotate_with(Access::Owner, k)
	}

	/// Reorders rows so that old row `perm[i]` ends up at row `i`.
	///
	/// `perm` must be a bijection of `0..size()`; otherwise nothing changes.
	pub fn apply_permutation(&self, perm: &[usize]) -> Result<()> {
		self.apply_permutation_with(Access::Owner, perm)
	}

	/// Reorders rows so that old row `i` ends up at row `perm[i]`.
	///
	/// `perm` must be a bijection of `0..size()`; otherwise nothing changes.
	pub fn apply_reverse_permutation(&self, perm: &[usize]) -> Result<()> {
		self.apply_reverse_permutation_with(Access::Owner, perm)
	}

	/// Releases spare capacity in every column and the index array.
	///
	/// Refused while frozen, as it may move column storage.
	pub fn shrink_to_fit(&self) -> Result<()> {
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "shrink_to_fit")?;
		self.indices.write().shrink_to_fit();
		for slot in &self.columns {
			slot.erased.shrink_to_fit();
		}
		let unsorted = Self::unsort(&mut state);
		drop(state);
		Aftermath {
			unsorted,
			..Default::default()
		}
		.run(self);
		Ok(())
	}

	/// Enables or disables the optional column for `T`.
	///
	/// Disabling frees the column's storage; enabling fills it with default
	/// values. Handles into a disabled column report it as gone.
	pub fn set_field_status<T: Tag>(&self, active: bool) -> Result<()> {
		let columns = self.tag_columns::<T>()?;
		if columns.kind != ColumnKind::Optional {
			return Err(StoreError::ColumnShape {
				store: self.name.to_string(),
				tag: columns.tag,
				expected: ColumnKind::Optional.describe(),
				actual: columns.kind.describe(),
			});
		}
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "set_field_status")?;
		let erased = &self.columns[columns.first].erased;
		if erased.is_active() == active {
			return Ok(());
		}
		let rows = self.indices.read().len();
		erased.set_active(active, rows);
		debug!(store = %self.name, field = columns.tag, active, "optional field toggled");
		let unsorted = Self::unsort(&mut state);
		drop(state);
		Aftermath {
			unsorted,
			..Default::default()
		}
		.run(self);
		Ok(())
	}

	pub(crate) fn check_access(&self, state: &FreezeState, access: Access, operation: &'static str) -> Result<()> {
		let allowed = match access {
			Access::Owner => state.frozen_count == 0,
			Access::Session => state.sorting && state.frozen_count == 1,
		};
		if allowed { Ok(()) } else { Err(self.frozen_error(state, operation)) }
	}

	pub(crate) fn check_mutable(&self, state: &FreezeState, operation: &'static str) -> Result<()> {
		self.check_access(state, Access::Owner, operation)
	}

	/// Appends a row and binds a fresh identifier to it.
	pub(crate) fn push_row(&self) -> Result<Identifier> {
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "emplace_back")?;
		let mut indices = self.indices.write();
		let row = indices.len();
		let identifier = Identifier::fresh(row);
		indices.push(identifier.clone());
		for slot in &self.columns {
			slot.erased.push_rows(1);
		}
		trace!(store = %self.name, row, "row appended");
		self.check_lengths(indices.len());
		let unsorted = Self::unsort(&mut state);
		drop(indices);
		drop(state);
		Aftermath {
			unsorted,
			..Default::default()
		}
		.run(self);
		Ok(identifier)
	}

	/// Swap-deletes the row `identifier` refers to.
	///
	/// Does nothing if the identifier is already invalid.
	pub(crate) fn erase_identifier(&self, identifier: &Identifier) -> Result<()> {
		let mut state = self.state.lock();
		self.check_access(&state, Access::Owner, "erase")?;
		let mut indices = self.indices.write();
		let Some(row) = identifier.try_current_row() else {
			return Ok(());
		};
		assert!(
			indices.get(row) == Some(identifier),
			"{}: identifier claims row {row} but the index array disagrees",
			self.name
		);
		let deaths = self.swap_remove(&mut indices, row);
		let unsorted = Self::unsort(&mut state);
		drop(indices);
		drop(state);
		Aftermath { deaths, unsorted }.run(self);
		Ok(())
	}

	pub(crate) fn reverse_with(&self, access: Access) -> Result<()> {
		self.reorder(access, "reverse", |len| Ok((len > 1).then(|| reversal(len))))
	}

	pub(crate) fn rotate_with(&self, access: Access, k: usize) -> Result<()> {
		self.reorder(access, "rotate", |len| {
			Ok((len > 0 && k % len != 0).then(|| left_rotation(len, k)))
		})
	}

	pub(crate) fn apply_permutation_with(&self, access: Access, perm: &[usize]) -> Result<()> {
		self.reorder(access, "apply_permutation", |len| {
			let trivial = check_permutation(perm, len)?;
			Ok((!trivial).then(|| invert(perm)))
		})
	}

	pub(crate) fn apply_reverse_permutation_with(&self, access: Access, perm: &[usize]) -> Result<()> {
		self.reorder(access, "apply_reverse_permutation", |len| {
			let trivial = check_permutation(perm, len)?;
			Ok((!trivial).then(|| perm.to_vec()))
		})
	}

	/// Applies the reverse permutation produced by `build` to every column
	/// and the index array.
	///
	/// `build` receives the row count and returns `None` for the identity.
	/// Validation happens before anything is touched.
	fn reorder(
		&self,
		access: Access,
		operation: &'static str,
		build: impl FnOnce(usize) -> std::result::Result<Option<Vec<usize>>, PermutationError>,
	) -> Result<()> {
		let mut state = self.state.lock();
		self.check_access(&state, access, operation)?;
		let mut indices = self.indices.write();
		let len = indices.len();
		let reverse = build(len).map_err(|source| StoreError::Permutation {
			store: self.name.to_string(),
			source,
		})?;
		let Some(reverse) = reverse else {
			return Ok(());
		};
		let swaps = swap_sequence(&reverse);
		for &(a, b) in &swaps {
			indices.swap(a, b);
		}
		for slot in &self.columns {
			slot.erased.apply_swaps(&swaps);
		}
		for (row, identifier) in indices.iter().enumerate() {
			identifier.set_current_row(row);
		}
		debug!(store = %self.name, operation, rows = len, swaps = swaps.len(), "store permuted");
		self.check_lengths(len);
		let unsorted = Self::unsort(&mut state);
		drop(indices);
		drop(state);
		Aftermath {
			unsorted,
			..Default::default()
		}
		.run(self);
		Ok(())
	}

	/// Moves the last row into `row`, shrinks by one and invalidates the
	/// identifier that was at `row`.
	fn swap_remove(&self, indices: &mut Vec<Identifier>, row: usize) -> Vec<DeathCallback> {
		for slot in &self.columns {
			slot.erased.swap_remove_row(row);
		}
		let removed = indices.swap_remove(row);
		if let Some(moved) = indices.get(row) {
			moved.set_current_row(row);
		}
		trace!(store = %self.name, row, rows = indices.len(), "row erased");
		self.check_lengths(indices.len());
		removed.invalidate()
	}

	/// Clears the sorted flag, returning whether it was set.
	fn unsort(state: &mut FreezeState) -> bool {
		std::mem::replace(&mut state.sorted, false)
	}

	/// Full length check, only when enabled for this store.
	fn check_lengths(&self, len: usize) {
		if self.check_invariants {
			self.verify_lengths(len);
		}
	}
}
