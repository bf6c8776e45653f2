//! The columnar store.
//!
//! A [`SoaStore`] owns one contiguous vector per column plus an index array of
//! [`Identifier`]s, all kept at the same number of rows. Rows can be appended,
//! swap-deleted and reordered wholesale; every structural change rewrites the
//! identifier cells so that identifiers, and the handles built on them, keep
//! referring to the same logical row.
//!
//! Structural changes are refused while the store is frozen by a
//! [`FrozenToken`]. See [`freeze`] for the sorted/frozen state machine.

mod builder;
pub mod freeze;
mod permute;
mod structure;


use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;

pub use self::builder::StoreBuilder;
pub use self::freeze::{FrozenToken, SortSession};
use self::freeze::FreezeState;
use crate::column::{Column, ColumnSlot, ErasedColumn, StoreId};
use crate::error::{Result, StoreError};
use crate::handle::DataHandle;
use crate::identifier::Identifier;
use crate::memory::{StorageMemoryUsage, VectorMemoryUsage};
use crate::tag::{FieldIndex, Tag};

/// Callback invoked when a store leaves the sorted state.
pub type UnsortedCallback = Arc<dyn Fn() + Send + Sync>;

/// How a tag maps onto columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
	Single,
	Optional,
	Group,
}

impl ColumnKind {
	fn describe(self) -> &'static str {
		match self {
			Self::Single => "a single column",
			Self::Optional => "an optional column",
			Self::Group => "a field group",
		}
	}
}

/// Range of columns registered for one tag.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagColumns {
	pub kind: ColumnKind,
	pub tag: &'static str,
	pub first: usize,
	pub count: usize,
}

/// Fixed-schema structure-of-arrays table with permutation-stable identifiers.
///
/// Stores are always shared through `Arc` and never move, so column
/// references held by handles stay valid for as long as the handles live.
pub struct SoaStore {
	id: StoreId,
	name: Arc<str>,
	columns: Vec<ColumnSlot>,
	lookup: FxHashMap<TypeId, TagColumns>,
	indices: RwLock<Vec<Identifier>>,
	state: Mutex<FreezeState>,
	sort_done: Condvar,
	unsorted_callback: Mutex<Option<UnsortedCallback>>,
	check_invariants: bool,
}

impl SoaStore {
	/// Starts describing a store called `name`.
	pub fn builder(name: impl Into<Arc<str>>) -> StoreBuilder {
		StoreBuilder::new(name)
	}

	/// Process-unique identity of this store.
	pub fn id(&self) -> StoreId {
		self.id
	}

	/// Store name, used in diagnostics.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Number of live rows.
	///
	/// # Panics
	///
	/// Panics if any active column disagrees with the index array about the
	/// number of rows. That can only result from a bug in this crate.
	pub fn size(&self) -> usize {
		let len = self.indices.read().len();
		self.verify_lengths(len);
		len
	}

	/// Returns `true` if the store holds no rows.
	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	/// Identifier currently occupying physical row `row`.
	pub fn identifier(&self, row: usize) -> Result<Identifier> {
		let indices = self.indices.read();
		indices.get(row).cloned().ok_or_else(|| StoreError::RowOutOfBounds {
			store: self.name.to_string(),
			row,
			len: indices.len(),
		})
	}

	/// Reads the value of tag `T` at `row`.
	pub fn get<T: Tag>(&self, row: usize) -> Result<T::Value> {
		self.single::<T>()?;
		self.get_field::<T>(row, 0, 0)
	}

	/// Reads element `array_index` of field `field` of tag `T` at `row`.
	pub fn get_field<T: Tag>(&self, row: usize, field: usize, array_index: usize) -> Result<T::Value> {
		let column = self.typed_column::<T>(field)?;
		let offset = self.element_offset(column, row, array_index)?;
		Ok(column.read()[offset].clone())
	}

	/// Writes the value of tag `T` at `row`.
	///
	/// Refused while frozen; frozen code writes through a [`FrozenToken`] or a
	/// [`DataHandle`] instead.
	pub fn set<T: Tag>(&self, row: usize, value: T::Value) -> Result<()> {
		self.single::<T>()?;
		self.set_field::<T>(row, 0, 0, value)
	}

	/// Writes element `array_index` of field `field` of tag `T` at `row`.
	pub fn set_field<T: Tag>(&self, row: usize, field: usize, array_index: usize, value: T::Value) -> Result<()> {
		let state = self.state.lock();
		self.check_mutable(&state, "set")?;
		let column = self.typed_column::<T>(field)?;
		let offset = self.element_offset(column, row, array_index)?;
		column.write()[offset] = value;
		Ok(())
	}

	/// Runs `f` over the whole column for tag `T`.
	pub fn with_column<T: Tag, R>(&self, f: impl FnOnce(&[T::Value]) -> R) -> Result<R> {
		self.single::<T>()?;
		let column = self.active_column::<T>(0)?;
		Ok(f(&column.read()))
	}

	/// Runs `f` over the whole column for tag `T` with write access.
	///
	/// The slice cannot change length. Refused while frozen.
	pub fn with_column_mut<T: Tag, R>(&self, f: impl FnOnce(&mut [T::Value]) -> R) -> Result<R> {
		self.single::<T>()?;
		let state = self.state.lock();
		self.check_mutable(&state, "with_column_mut")?;
		let column = self.active_column::<T>(0)?;
		Ok(f(&mut column.write()))
	}

	/// Stable handle to the value of tag `T` in the row `identifier` refers to.
	///
	/// A disabled optional column yields a null handle.
	pub fn handle<T: Tag>(&self, identifier: &Identifier) -> Result<DataHandle<T::Value>> {
		self.single::<T>()?;
		self.field_handle::<T>(identifier, 0, 0)
	}

	/// Stable handle to element `array_index` of an array column.
	pub fn handle_at<T: Tag>(&self, identifier: &Identifier, array_index: usize) -> Result<DataHandle<T::Value>> {
		self.single::<T>()?;
		self.field_handle::<T>(identifier, 0, array_index)
	}

	/// Stable handle to element `array_index` of field `field` of tag `T`.
	pub fn field_handle<T: Tag>(
		&self,
		identifier: &Identifier,
		field: usize,
		array_index: usize,
	) -> Result<DataHandle<T::Value>> {
		let columns = self.tag_columns::<T>()?;
		let slot = self.slot(columns, field)?;
		if !slot.erased.is_active() {
			return Ok(DataHandle::null());
		}
		let column = slot.downcast::<T::Value>().ok_or_else(|| self.unknown::<T>())?;
		if array_index >= column.array_dim() {
			return Err(StoreError::ArrayIndexOutOfRange {
				store: self.name.to_string(),
				field: column.meta().field_name.clone(),
				index: array_index,
				dim: column.array_dim(),
			});
		}
		Ok(DataHandle::new(identifier.clone(), column, array_index))
	}

	/// Finds the row and column holding `ptr` and promotes it to a stable handle.
	///
	/// This is a linear scan over every column of matching element type and is
	/// meant for migrating code that still deals in raw addresses.
	pub fn find_data_handle<V: Clone + Send + Sync + 'static>(&self, ptr: *const V) -> Option<DataHandle<V>> {
		let addr = ptr as usize;
		self.columns
			.iter()
			.filter(|slot| slot.erased.value_type() == TypeId::of::<V>())
			.find_map(|slot| {
				let (row, array_index) = slot.erased.locate(addr)?;
				let identifier = self.indices.read().get(row)?.clone();
				Some(DataHandle::new(identifier, slot.downcast::<V>()?, array_index))
			})
	}

	/// Number of fields declared for tag `T`.
	pub fn num_fields<T: Tag>(&self) -> Result<usize> {
		Ok(self.tag_columns::<T>()?.count)
	}

	/// Array dimension of every field of tag `T`.
	pub fn array_dims<T: Tag>(&self) -> Result<Vec<usize>> {
		let columns = self.tag_columns::<T>()?;
		Ok(self.columns[columns.first..columns.first + columns.count]
			.iter()
			.map(|slot| slot.erased.meta().array_dim)
			.collect())
	}

	/// Inclusive running totals of [`Self::array_dims`].
	pub fn array_dim_prefix_sums<T: Tag>(&self) -> Result<Vec<usize>> {
		let mut total = 0;
		Ok(self
			.array_dims::<T>()?
			.into_iter()
			.map(|dim| {
				total += dim;
				total
			})
			.collect())
	}

	/// Maps a flat index over all array elements of tag `T` to a field and array index.
	///
	/// Flat index `i` enumerates field 0's elements first, then field 1's, and so on.
	pub fn translate_legacy_index<T: Tag>(&self, index: usize) -> Result<FieldIndex> {
		let sums = self.array_dim_prefix_sums::<T>()?;
		let field = sums.partition_point(|&sum| sum <= index);
		if field == sums.len() {
			return Err(StoreError::LegacyIndex {
				store: self.name.to_string(),
				index,
			});
		}
		let start = field.checked_sub(1).map_or(0, |prev| sums[prev]);
		Ok(FieldIndex {
			field,
			array_index: index - start,
		})
	}

	/// Returns `true` if the optional column for `T` currently holds data.
	pub fn field_active<T: Tag>(&self) -> Result<bool> {
		let columns = self.tag_columns::<T>()?;
		Ok(self.slot(columns, 0)?.erased.is_active())
	}

	/// Bytes used by column data and identifier bookkeeping.
	pub fn memory_usage(&self) -> StorageMemoryUsage {
		let heavy_data = self
			.columns
			.iter()
			.map(|slot| slot.erased.memory())
			.fold(VectorMemoryUsage::default(), |acc, usage| acc + usage);
		let indices = self.indices.read();
		let cells = indices.len() * Identifier::cell_size();
		let stable_identifiers = VectorMemoryUsage::of(&*indices)
			+ VectorMemoryUsage {
				size: cells,
				capacity: cells,
			};
		StorageMemoryUsage {
			heavy_data,
			stable_identifiers,
		}
	}

	/// Registers a callback run whenever the store leaves the sorted state.
	///
	/// The callback runs with no store locks held. Replaces any earlier callback.
	pub fn set_unsorted_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
		*self.unsorted_callback.lock() = Some(Arc::new(callback));
	}

	pub(crate) fn tag_columns<T: Tag>(&self) -> Result<TagColumns> {
		self.lookup.get(&TypeId::of::<T>()).copied().ok_or_else(|| self.unknown::<T>())
	}

	/// Typed column for field `field` of `T`, present only while active.
	pub(crate) fn column_arc<T: Tag>(&self, field: usize) -> Option<Arc<Column<T::Value>>> {
		let columns = self.tag_columns::<T>().ok()?;
		self.slot(columns, field).ok()?.downcast::<T::Value>()
	}

	pub(crate) fn typed_column<T: Tag>(&self, field: usize) -> Result<&Column<T::Value>> {
		let columns = self.tag_columns::<T>()?;
		self.slot(columns, field)?
			.downcast_ref::<T::Value>()
			.ok_or_else(|| self.unknown::<T>())
	}

	pub(crate) fn active_column<T: Tag>(&self, field: usize) -> Result<&Column<T::Value>> {
		let column = self.typed_column::<T>(field)?;
		if !column.is_active() {
			return Err(StoreError::InactiveField {
				store: self.name.to_string(),
				field: column.meta().field_name.clone(),
			});
		}
		Ok(column)
	}

	fn slot(&self, columns: TagColumns, field: usize) -> Result<&ColumnSlot> {
		if field >= columns.count {
			return Err(StoreError::FieldOutOfRange {
				store: self.name.to_string(),
				tag: columns.tag,
				field,
				count: columns.count,
			});
		}
		Ok(&self.columns[columns.first + field])
	}

	/// Rejects field groups where a single column is required.
	fn single<T: Tag>(&self) -> Result<()> {
		let columns = self.tag_columns::<T>()?;
		if columns.kind == ColumnKind::Group {
			return Err(StoreError::ColumnShape {
				store: self.name.to_string(),
				tag: columns.tag,
				expected: ColumnKind::Single.describe(),
				actual: columns.kind.describe(),
			});
		}
		Ok(())
	}

	fn element_offset<V: Clone + Send + Sync + 'static>(
		&self,
		column: &Column<V>,
		row: usize,
		array_index: usize,
	) -> Result<usize> {
		if !column.is_active() {
			return Err(StoreError::InactiveField {
				store: self.name.to_string(),
				field: column.meta().field_name.clone(),
			});
		}
		let len = self.indices.read().len();
		if row >= len {
			return Err(StoreError::RowOutOfBounds {
				store: self.name.to_string(),
				row,
				len,
			});
		}
		let dim = column.array_dim();
		if array_index >= dim {
			return Err(StoreError::ArrayIndexOutOfRange {
				store: self.name.to_string(),
				field: column.meta().field_name.clone(),
				index: array_index,
				dim,
			});
		}
		Ok(row * dim + array_index)
	}

	fn unknown<T: Tag>(&self) -> StoreError {
		StoreError::UnknownColumn {
			store: self.name.to_string(),
			tag: T::NAME,
		}
	}

	/// Asserts that every active column holds `len` rows.
	///
	/// Columns whose lock is held for writing (a token's mutable view, for
	/// instance) are skipped rather than waited on.
	fn verify_lengths(&self, len: usize) {
		for slot in &self.columns {
			if !slot.erased.is_active() {
				continue;
			}
			if let Some(rows) = slot.erased.try_rows() {
				let meta = slot.erased.meta();
				assert_eq!(
					rows, len,
					"{}: column {} holds {rows} rows but the index array holds {len}",
					self.name, meta.field_name
				);
			}
		}
	}
}

impl fmt::Debug for SoaStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = *self.state.lock();
		f.debug_struct("SoaStore")
			.field("name", &self.name)
			.field("rows", &self.indices.read().len())
			.field("columns", &self.columns.len())
			.field("frozen_count", &state.frozen_count)
			.field("sorted", &state.sorted)
			.finish()
	}
}
