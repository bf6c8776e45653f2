//! Type-erased handles.
//!
//! A [`GenericHandle`] can sit in a heterogeneous slot (a mechanism's pointer
//! variables, an event payload) and still hand back the exact typed handle it
//! was made from. Asking for any other element type is an error.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::column::ColumnSlot;
use crate::error::HandleError;
use crate::handle::{DataHandle, LegacyHandle, RawPtr};
use crate::identifier::Identifier;

/// Runtime element-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType {
	id: TypeId,
	name: &'static str,
}

impl ValueType {
	/// Tag for `T`.
	pub fn of<T: 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: type_name::<T>(),
		}
	}

	/// Name of the element type.
	pub fn name(&self) -> &'static str {
		self.name
	}

	fn is<T: 'static>(&self) -> bool {
		self.id == TypeId::of::<T>()
	}
}

#[derive(Clone, Default)]
enum Repr {
	/// Null. Typed when made from a typed null handle.
	#[default]
	Untyped,
	Null(ValueType),
	Stable {
		identifier: Identifier,
		column: ColumnSlot,
		array_index: usize,
		value: ValueType,
	},
	Raw {
		addr: usize,
		value: ValueType,
	},
}

/// A [`DataHandle`] or [`RawPtr`] with its element type erased.
#[derive(Clone, Default)]
pub struct GenericHandle {
	repr: Repr,
}

impl GenericHandle {
	/// The untyped null handle. Converts to a null handle of any type.
	pub fn null() -> Self {
		Self::default()
	}

	/// Returns `true` for any null handle or null pointer.
	pub fn is_null(&self) -> bool {
		matches!(self.repr, Repr::Untyped | Repr::Null(_))
	}

	/// Element type, if known.
	pub fn value_type(&self) -> Option<ValueType> {
		match &self.repr {
			Repr::Untyped => None,
			Repr::Null(value) | Repr::Stable { value, .. } | Repr::Raw { value, .. } => Some(*value),
		}
	}

	/// Name of the element type, if known.
	pub fn type_name(&self) -> Option<&'static str> {
		self.value_type().map(|value| value.name)
	}

	/// Returns `true` if the handle holds a `T`.
	pub fn holds<T: 'static>(&self) -> bool {
		self.value_type().is_some_and(|value| value.is::<T>())
	}

	/// Returns `false` only for the raw-pointer form.
	pub fn refers_to_a_modern_data_structure(&self) -> bool {
		!matches!(self.repr, Repr::Raw { .. })
	}

	/// Row identifier of the stable form.
	pub fn identifier(&self) -> Option<&Identifier> {
		match &self.repr {
			Repr::Stable { identifier, .. } => Some(identifier),
			_ => None,
		}
	}

	/// Returns `true` if this is a stable handle whose row has been deleted.
	pub fn is_invalid_handle(&self) -> bool {
		self.identifier().is_some_and(|identifier| !identifier.is_valid())
	}

	/// Recovers the typed stable handle.
	///
	/// Fails with [`HandleError::TypeMismatch`] if `T` is not the element type
	/// this handle was made with, and with [`HandleError::NotStable`] for a raw
	/// pointer.
	pub fn try_into_handle<T: Clone + Send + Sync + 'static>(&self) -> Result<DataHandle<T>, HandleError> {
		match self.try_into_legacy::<T>()? {
			LegacyHandle::Stable(handle) => Ok(handle),
			LegacyHandle::Raw(_) => Err(HandleError::NotStable {
				handle: self.to_string(),
			}),
		}
	}

	/// Recovers the typed handle in whichever form it was stored.
	pub fn try_into_legacy<T: Clone + Send + Sync + 'static>(&self) -> Result<LegacyHandle<T>, HandleError> {
		let mismatch = || HandleError::TypeMismatch {
			handle: self.to_string(),
			requested: type_name::<T>(),
		};
		match &self.repr {
			Repr::Untyped => Ok(LegacyHandle::Stable(DataHandle::null())),
			Repr::Null(value) if value.is::<T>() => Ok(LegacyHandle::Stable(DataHandle::null())),
			Repr::Stable {
				identifier,
				column,
				array_index,
				value,
			} if value.is::<T>() => {
				let column = column.downcast::<T>().ok_or_else(mismatch)?;
				Ok(LegacyHandle::Stable(DataHandle::new(identifier.clone(), column, *array_index)))
			}
			Repr::Raw { addr, value } if value.is::<T>() => Ok(LegacyHandle::Raw(RawPtr::new(*addr as *const T))),
			_ => Err(mismatch()),
		}
	}

	/// Reads the value through the typed handle.
	pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Result<T, HandleError> {
		self.try_into_handle::<T>()?.get()
	}

	/// Writes the value through the typed handle.
	pub fn set<T: Clone + Send + Sync + 'static>(&self, value: T) -> Result<(), HandleError> {
		self.try_into_handle::<T>()?.set(value)
	}

	fn key(&self) -> (u8, usize, usize, usize) {
		match &self.repr {
			Repr::Untyped | Repr::Null(_) => (0, 0, 0, 0),
			Repr::Stable {
				identifier,
				column,
				array_index,
				..
			} => (1, identifier.cell_addr(), Arc::as_ptr(&column.typed) as *const () as usize, *array_index),
			Repr::Raw { addr, .. } => (2, *addr, 0, 0),
		}
	}
}

impl PartialEq for GenericHandle {
	/// Structural equality within one form; nulls of any type are equal.
	fn eq(&self, other: &Self) -> bool {
		self.key() == other.key()
	}
}

impl Eq for GenericHandle {}

impl Hash for GenericHandle {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key().hash(state);
	}
}

impl<T: Clone + Send + Sync + 'static> From<DataHandle<T>> for GenericHandle {
	fn from(handle: DataHandle<T>) -> Self {
		let value = ValueType::of::<T>();
		let repr = match handle.column() {
			None => Repr::Null(value),
			Some(column) => Repr::Stable {
				identifier: handle.identifier().clone(),
				column: ColumnSlot::from_arc(column.clone()),
				array_index: handle.array_index(),
				value,
			},
		};
		Self { repr }
	}
}

impl<T: 'static> From<RawPtr<T>> for GenericHandle {
	fn from(ptr: RawPtr<T>) -> Self {
		let value = ValueType::of::<T>();
		let repr = if ptr.is_null() {
			Repr::Null(value)
		} else {
			Repr::Raw { addr: ptr.addr(), value }
		};
		Self { repr }
	}
}

impl<T: Clone + Send + Sync + 'static> From<LegacyHandle<T>> for GenericHandle {
	fn from(handle: LegacyHandle<T>) -> Self {
		match handle {
			LegacyHandle::Stable(handle) => handle.into(),
			LegacyHandle::Raw(ptr) => ptr.into(),
		}
	}
}

impl<T: Clone + Send + Sync + 'static> TryFrom<&GenericHandle> for DataHandle<T> {
	type Error = HandleError;

	fn try_from(handle: &GenericHandle) -> Result<Self, Self::Error> {
		handle.try_into_handle()
	}
}

impl fmt::Display for GenericHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.repr {
			Repr::Untyped => f.write_str("generic_data_handle{null}"),
			Repr::Null(value) => write!(f, "generic_data_handle<{}>{{null}}", value.name),
			Repr::Stable {
				identifier,
				column,
				array_index,
				value,
			} => {
				let meta = column.erased.meta();
				write!(f, "generic_data_handle<{}>{{cont={} {}", value.name, meta.store_name, meta.field_name)?;
				if meta.array_dim > 1 {
					write!(f, "[{array_index}]")?;
				}
				match identifier.try_current_row() {
					Some(row) => write!(f, " row={row}/{}}}", column.erased.rows()),
					None => write!(f, " died/{}}}", column.erased.rows()),
				}
			}
			Repr::Raw { addr, value } => write!(f, "generic_data_handle<{}>{{raw={addr:#x}}}", value.name),
		}
	}
}

impl fmt::Debug for GenericHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}
