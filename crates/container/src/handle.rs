//! Typed handles to single values.
//!
//! [`DataHandle`] is the permutation-stable form: it pairs an [`Identifier`]
//! with the column it points into and re-resolves the row on every access.
//! [`RawPtr`] is the legacy form, a bare address with none of those
//! guarantees. [`LegacyHandle`] holds either, for call sites still being
//! migrated; the two forms never compare equal.

use std::any::type_name;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use crate::column::{Column, ErasedColumn, StoreId};
use crate::error::HandleError;
use crate::identifier::Identifier;
use crate::store::{FrozenToken, SoaStore};
use crate::tag::Tag;

/// Permutation-stable reference to one element of one column.
pub struct DataHandle<T> {
	identifier: Identifier,
	column: Option<Arc<Column<T>>>,
	array_index: usize,
}

impl<T: Clone + Send + Sync + 'static> DataHandle<T> {
	pub(crate) fn new(identifier: Identifier, column: Arc<Column<T>>, array_index: usize) -> Self {
		Self {
			identifier,
			column: Some(column),
			array_index,
		}
	}

	/// A handle that refers to nothing.
	pub fn null() -> Self {
		Self {
			identifier: Identifier::null(),
			column: None,
			array_index: 0,
		}
	}

	/// Returns `true` for the null handle.
	pub fn is_null(&self) -> bool {
		self.column.is_none()
	}

	/// Returns `true` if the handle can be dereferenced right now.
	pub fn is_valid(&self) -> bool {
		self.locate().is_ok()
	}

	/// Always `true`; see [`LegacyHandle::refers_to_a_modern_data_structure`].
	pub fn refers_to_a_modern_data_structure(&self) -> bool {
		true
	}

	/// The identifier of the row this handle follows.
	pub fn identifier(&self) -> &Identifier {
		&self.identifier
	}

	/// Store the handle points into, if not null.
	pub fn store_id(&self) -> Option<StoreId> {
		self.column.as_ref().map(|column| column.meta().store_id)
	}

	/// Position inside the row's array.
	pub fn array_index(&self) -> usize {
		self.array_index
	}

	/// Current physical row, or `None` if null or dead.
	pub fn current_row(&self) -> Option<usize> {
		self.column.as_ref()?;
		self.identifier.try_current_row()
	}

	/// Reads the value.
	pub fn get(&self) -> Result<T, HandleError> {
		self.with(T::clone)
	}

	/// Overwrites the value.
	pub fn set(&self, value: T) -> Result<(), HandleError> {
		self.update(|slot| *slot = value)
	}

	/// Runs `f` on the value.
	pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, HandleError> {
		let (column, offset) = self.locate()?;
		let result = column.read().get(offset).map(f);
		result.ok_or_else(|| self.gone())
	}

	/// Runs `f` on the value with write access.
	pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, HandleError> {
		let (column, offset) = self.locate()?;
		let result = column.write().get_mut(offset).map(f);
		result.ok_or_else(|| self.gone())
	}

	/// Returns `true` if this handle points into one of `store`'s columns for
	/// `U` at an in-bounds row. Every field of a field group is checked.
	pub fn refers_to<U: Tag<Value = T>>(&self, store: &SoaStore) -> bool {
		let Some(mine) = self.column.as_ref() else {
			return false;
		};
		let fields = store.num_fields::<U>().unwrap_or(0);
		let owned = (0..fields)
			.filter_map(|field| store.column_arc::<U>(field))
			.any(|column| Arc::ptr_eq(&column, mine));
		owned && self.current_row().is_some_and(|row| row < store.size())
	}

	/// Handle to the element `shift` places away inside the same row's array.
	pub fn next_array_element(&self, shift: isize) -> Result<Self, HandleError> {
		let Some(column) = self.column.as_ref() else {
			return Err(HandleError::Null {
				handle: self.describe(),
			});
		};
		let target = self
			.array_index
			.checked_add_signed(shift)
			.filter(|&index| index < column.array_dim())
			.ok_or_else(|| HandleError::ArrayOutOfRange {
				handle: self.describe(),
				shift,
			})?;
		Ok(Self {
			identifier: self.identifier.clone(),
			column: Some(column.clone()),
			array_index: target,
		})
	}

	/// Registers `callback` to run once when the row is deleted.
	///
	/// Returns `false` if the handle is null or already dead.
	pub fn notify_when_dies(&self, callback: impl FnOnce() + Send + 'static) -> bool {
		!self.is_null() && self.identifier.notify_on_death(callback)
	}

	/// Pins the handle to a physical offset for as long as `token` keeps the
	/// store frozen.
	///
	/// Fails if the handle points into a different store, or cannot be
	/// dereferenced.
	pub fn resolve(&self, token: &FrozenToken) -> Result<ResolvedPtr<T>, HandleError> {
		let (column, offset) = self.locate()?;
		if column.meta().store_id != token.store().id() {
			return Err(HandleError::NotFrozen {
				handle: self.describe(),
				store: column.meta().store_name.to_string(),
			});
		}
		Ok(ResolvedPtr {
			column: column.clone(),
			offset,
		})
	}

	/// Address of the value, for comparison with legacy raw pointers.
	///
	/// Only meaningful until the next structural change of the store.
	pub fn address(&self) -> Option<RawPtr<T>> {
		let (column, offset) = self.locate().ok()?;
		let data = column.read();
		data.get(offset).map(|value| RawPtr::new(value as *const T))
	}

	pub(crate) fn column(&self) -> Option<&Arc<Column<T>>> {
		self.column.as_ref()
	}

	fn locate(&self) -> Result<(&Arc<Column<T>>, usize), HandleError> {
		let Some(column) = self.column.as_ref() else {
			return Err(HandleError::Null {
				handle: self.describe(),
			});
		};
		let Some(row) = self.identifier.try_current_row() else {
			return Err(HandleError::Dead {
				handle: self.describe(),
			});
		};
		if !column.is_active() {
			return Err(self.gone());
		}
		Ok((column, row * column.array_dim() + self.array_index))
	}

	fn gone(&self) -> HandleError {
		HandleError::ColumnGone {
			handle: self.describe(),
		}
	}

	/// Rendering without the value, for error messages.
	pub(crate) fn describe(&self) -> String {
		self.render(None)
	}

	fn render(&self, value: Option<&dyn fmt::Debug>) -> String {
		let ty = type_name::<T>();
		let Some(column) = self.column.as_ref() else {
			return format!("data_handle<{ty}>{{null}}");
		};
		let meta = column.meta();
		let field = if meta.array_dim > 1 {
			format!("{}[{}]", meta.field_name, self.array_index)
		} else {
			meta.field_name.clone()
		};
		let rows = column.rows();
		match (self.identifier.try_current_row(), value) {
			(None, _) => format!("data_handle<{ty}>{{cont={} {field} died/{rows}}}", meta.store_name),
			(Some(row), _) if !column.is_active() => {
				format!("data_handle<{ty}>{{cont={} {field} row={row} disabled}}", meta.store_name)
			}
			(Some(row), None) => format!("data_handle<{ty}>{{cont={} {field} row={row}/{rows}}}", meta.store_name),
			(Some(row), Some(value)) => {
				format!("data_handle<{ty}>{{cont={} {field} row={row}/{rows} val={value:?}}}", meta.store_name)
			}
		}
	}
}

impl<T> Clone for DataHandle<T> {
	fn clone(&self) -> Self {
		Self {
			identifier: self.identifier.clone(),
			column: self.column.clone(),
			array_index: self.array_index,
		}
	}
}

impl<T: Clone + Send + Sync + 'static> Default for DataHandle<T> {
	fn default() -> Self {
		Self::null()
	}
}

impl<T> DataHandle<T> {
	fn column_addr(&self) -> usize {
		self.column.as_ref().map_or(0, |column| Arc::as_ptr(column) as usize)
	}

	fn key(&self) -> (&Identifier, usize, usize) {
		(&self.identifier, self.column_addr(), self.array_index)
	}
}

impl<T> PartialEq for DataHandle<T> {
	fn eq(&self, other: &Self) -> bool {
		self.key() == other.key()
	}
}

impl<T> Eq for DataHandle<T> {}

impl<T> Hash for DataHandle<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key().hash(state);
	}
}

impl<T> PartialOrd for DataHandle<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl<T> Ord for DataHandle<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key().cmp(&other.key())
	}
}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> fmt::Display for DataHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.get() {
			Ok(value) => f.write_str(&self.render(Some(&value))),
			Err(_) => f.write_str(&self.render(None)),
		}
	}
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for DataHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.describe())
	}
}

/// A handle pinned to a physical offset under a [`FrozenToken`].
///
/// This is the flattened form hot loops use. It stays correct only while the
/// token that resolved it, or another token for the same store, is alive.
pub struct ResolvedPtr<T> {
	column: Arc<Column<T>>,
	offset: usize,
}

impl<T: Clone + Send + Sync + 'static> ResolvedPtr<T> {
	/// Physical element offset inside the column.
	pub fn offset(&self) -> usize {
		self.offset
	}

	/// Reads the value.
	pub fn get(&self) -> T {
		self.column.read()[self.offset].clone()
	}

	/// Overwrites the value.
	pub fn set(&self, value: T) {
		self.column.write()[self.offset] = value;
	}
}

impl<T> Clone for ResolvedPtr<T> {
	fn clone(&self) -> Self {
		Self {
			column: self.column.clone(),
			offset: self.offset,
		}
	}
}

impl<T> fmt::Debug for ResolvedPtr<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ResolvedPtr<{}>({})", type_name::<T>(), self.offset)
	}
}

/// An unmanaged address, as used by code not yet ported to [`DataHandle`].
///
/// Nothing keeps the pointee alive or in place.
pub struct RawPtr<T> {
	addr: usize,
	_marker: PhantomData<fn() -> T>,
}

impl<T> RawPtr<T> {
	/// Wraps `ptr`.
	pub fn new(ptr: *const T) -> Self {
		Self {
			addr: ptr as usize,
			_marker: PhantomData,
		}
	}

	/// The null pointer.
	pub fn null() -> Self {
		Self::new(std::ptr::null())
	}

	/// Returns `true` for the null pointer.
	pub fn is_null(&self) -> bool {
		self.addr == 0
	}

	/// The wrapped pointer.
	pub fn as_ptr(&self) -> *const T {
		self.addr as *const T
	}

	/// Numeric address.
	pub fn addr(&self) -> usize {
		self.addr
	}

	/// Dereferences the pointer.
	///
	/// # Safety
	///
	/// The pointer must be non-null, aligned, and point to a live `T` for the
	/// whole of `'a`, with no concurrent writes.
	pub unsafe fn as_ref<'a>(&self) -> &'a T {
		// SAFETY: upheld by the caller.
		unsafe { &*self.as_ptr() }
	}

	/// Tries to find the address inside one of `stores` and promote it.
	///
	/// Falls back to the raw form when no live column holds the address.
	pub fn promote(self, stores: &[Arc<SoaStore>]) -> LegacyHandle<T>
	where
		T: Clone + Send + Sync + 'static,
	{
		if self.is_null() {
			return LegacyHandle::Stable(DataHandle::null());
		}
		match stores.iter().find_map(|store| store.find_data_handle(self.as_ptr())) {
			Some(handle) => LegacyHandle::Stable(handle),
			None => {
				warn!(addr = self.addr, ty = type_name::<T>(), "address not found in any store, keeping raw pointer");
				LegacyHandle::Raw(self)
			}
		}
	}
}

impl<T> Clone for RawPtr<T> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<T> Copy for RawPtr<T> {}

impl<T> PartialEq for RawPtr<T> {
	fn eq(&self, other: &Self) -> bool {
		self.addr == other.addr
	}
}

impl<T> Eq for RawPtr<T> {}

impl<T> Hash for RawPtr<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.addr.hash(state);
	}
}

impl<T> fmt::Debug for RawPtr<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "data_handle<{}>{{raw={:#x}}}", type_name::<T>(), self.addr)
	}
}

/// Either a stable handle or a raw pointer.
pub enum LegacyHandle<T> {
	/// Permutation-stable.
	Stable(DataHandle<T>),
	/// Unmanaged address.
	Raw(RawPtr<T>),
}

impl<T: Clone + Send + Sync + 'static> LegacyHandle<T> {
	/// Returns `false` for the raw form.
	pub fn refers_to_a_modern_data_structure(&self) -> bool {
		matches!(self, Self::Stable(_))
	}

	/// Returns `true` for a null handle or a null pointer.
	pub fn is_null(&self) -> bool {
		match self {
			Self::Stable(handle) => handle.is_null(),
			Self::Raw(ptr) => ptr.is_null(),
		}
	}

	/// The stable form, if this is one.
	pub fn as_stable(&self) -> Option<&DataHandle<T>> {
		match self {
			Self::Stable(handle) => Some(handle),
			Self::Raw(_) => None,
		}
	}
}

impl<T> Clone for LegacyHandle<T> {
	fn clone(&self) -> Self {
		match self {
			Self::Stable(handle) => Self::Stable(handle.clone()),
			Self::Raw(ptr) => Self::Raw(*ptr),
		}
	}
}

impl<T: Clone + Send + Sync + 'static> PartialEq for LegacyHandle<T> {
	/// Same-form structural equality; across forms, only two nulls are equal.
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Stable(a), Self::Stable(b)) => a == b,
			(Self::Raw(a), Self::Raw(b)) => a == b,
			_ => self.is_null() && other.is_null(),
		}
	}
}

impl<T: Clone + Send + Sync + 'static> From<DataHandle<T>> for LegacyHandle<T> {
	fn from(handle: DataHandle<T>) -> Self {
		Self::Stable(handle)
	}
}

impl<T> From<RawPtr<T>> for LegacyHandle<T> {
	fn from(ptr: RawPtr<T>) -> Self {
		Self::Raw(ptr)
	}
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for LegacyHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Stable(handle) => fmt::Debug::fmt(handle, f),
			Self::Raw(ptr) => fmt::Debug::fmt(ptr, f),
		}
	}
}

#[cfg(test)]
mod tests;
