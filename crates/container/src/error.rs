//! Error types for storage and handle operations.

use thiserror::Error;

/// Reasons a permutation vector was rejected.
///
/// Permutations are validated in full before any column is touched, so a
/// rejected permutation never leaves a store partially reordered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermutationError {
	/// The vector length does not match the number of rows.
	#[error("invalid permutation vector: wrong size (expected {expected}, got {got})")]
	WrongLength {
		/// Number of rows in the store.
		expected: usize,
		/// Length of the supplied vector.
		got: usize,
	},
	/// An entry is not a valid row index.
	#[error("invalid permutation vector: value {value} out of range for {len} rows")]
	OutOfRange {
		/// The offending entry.
		value: usize,
		/// Number of rows in the store.
		len: usize,
	},
	/// An entry appears more than once.
	#[error("invalid permutation vector: repeated value {value}")]
	Repeated {
		/// The repeated entry.
		value: usize,
	},
}

/// Errors raised by [`crate::SoaStore`] operations.
///
/// All of these indicate caller misuse rather than corruption, and leave the
/// store unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	/// A layout-changing operation was attempted while tokens are outstanding.
	#[error("{store}[frozen_count={frozen_count},sorted={sorted}]: {operation}() called on a frozen structure")]
	Frozen {
		/// Store name.
		store: String,
		/// The rejected operation.
		operation: &'static str,
		/// Outstanding token count at the time of the call.
		frozen_count: usize,
		/// Sorted flag at the time of the call.
		sorted: bool,
	},
	/// A permutation vector failed validation.
	#[error("{store}: {source}")]
	Permutation {
		/// Store name.
		store: String,
		/// What was wrong with the vector.
		#[source]
		source: PermutationError,
	},
	/// Two columns were declared with the same tag.
	#[error("duplicate column tag {tag} in store {store}")]
	DuplicateColumn {
		/// Store name.
		store: String,
		/// Tag name.
		tag: &'static str,
	},
	/// The tag is not part of the store schema.
	#[error("{store}: no column for tag {tag}")]
	UnknownColumn {
		/// Store name.
		store: String,
		/// Tag name.
		tag: &'static str,
	},
	/// The tag was used with the wrong column shape (single vs. field group).
	#[error("{store}: tag {tag} is {actual}, not {expected}")]
	ColumnShape {
		/// Store name.
		store: String,
		/// Tag name.
		tag: &'static str,
		/// Shape the call required.
		expected: &'static str,
		/// Shape the schema declared.
		actual: &'static str,
	},
	/// A row offset past the end of the store.
	#[error("{store}: row {row} out of bounds for {len} rows")]
	RowOutOfBounds {
		/// Store name.
		store: String,
		/// Requested row.
		row: usize,
		/// Number of rows.
		len: usize,
	},
	/// A field index past the end of a field group.
	#[error("{store}: {tag}#{field}/{count}: out of range")]
	FieldOutOfRange {
		/// Store name.
		store: String,
		/// Tag name.
		tag: &'static str,
		/// Requested field.
		field: usize,
		/// Number of fields in the group.
		count: usize,
	},
	/// An array index past the dimension of a field.
	#[error("{store}: {field}: index {index} out of range for array dimension {dim}")]
	ArrayIndexOutOfRange {
		/// Store name.
		store: String,
		/// Field name.
		field: String,
		/// Requested array index.
		index: usize,
		/// Array dimension of the field.
		dim: usize,
	},
	/// A legacy flat index does not map to any field.
	#[error("{store}: could not translate legacy index {index}")]
	LegacyIndex {
		/// Store name.
		store: String,
		/// The untranslatable index.
		index: usize,
	},
	/// The optional field is switched off.
	#[error("{store}: {field} is a disabled optional field")]
	InactiveField {
		/// Store name.
		store: String,
		/// Field name.
		field: String,
	},
	/// Partition sizes returned by a sorter do not split the rows.
	#[error("{store}: partition {counts:?} does not split {rows} rows into {parts} parts")]
	Partition {
		/// Store name.
		store: String,
		/// Number of rows.
		rows: usize,
		/// Number of parts expected.
		parts: usize,
		/// The sizes that were returned.
		counts: Vec<usize>,
	},
}

/// Errors raised when dereferencing or converting handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
	/// The handle never referred to anything.
	#[error("{handle} attempt to dereference a null handle")]
	Null {
		/// Rendered handle.
		handle: String,
	},
	/// The row the handle referred to has been deleted.
	#[error("{handle} attempt to dereference a handle to a deleted row")]
	Dead {
		/// Rendered handle.
		handle: String,
	},
	/// The column the handle referred to has been disabled.
	#[error("{handle} attempt to dereference a handle to a disabled column")]
	ColumnGone {
		/// Rendered handle.
		handle: String,
	},
	/// The erased handle holds a different element type.
	#[error("{handle} cannot be converted to data_handle<{requested}>")]
	TypeMismatch {
		/// Rendered handle.
		handle: String,
		/// Element type that was asked for.
		requested: &'static str,
	},
	/// The erased handle holds a raw pointer, not a stable handle.
	#[error("{handle} holds a raw pointer, not a permutation-stable handle")]
	NotStable {
		/// Rendered handle.
		handle: String,
	},
	/// `next_array_element` moved outside the row's array.
	#[error("{handle} next_array_element({shift}): out of range")]
	ArrayOutOfRange {
		/// Rendered handle.
		handle: String,
		/// Requested shift.
		shift: isize,
	},
	/// A frozen token was needed for the handle's store but not supplied.
	#[error("{handle} is not covered by a token for store {store}")]
	NotFrozen {
		/// Rendered handle.
		handle: String,
		/// Store the handle points into.
		store: String,
	},
}

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
