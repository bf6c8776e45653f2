//! Column tags and field descriptions.
//!
//! A tag is a zero-sized marker type naming one column (or one group of
//! columns) of a store, together with the element type stored there.

/// Marker for one column of a [`crate::SoaStore`].
pub trait Tag: Send + Sync + 'static {
	/// Element type stored in the column.
	type Value: Clone + Default + Send + Sync + 'static;

	/// Human-readable column name.
	const NAME: &'static str;

	/// Value given to newly created rows.
	fn default_value() -> Self::Value {
		Self::Value::default()
	}
}

/// Declares a column tag.
///
/// ```
/// strata_container::soa_tag!(
/// 	/// Membrane potential.
/// 	pub Voltage: f64 = -65.0, "v"
/// );
/// ```
#[macro_export]
macro_rules! soa_tag {
	($(#[$meta:meta])* $vis:vis $name:ident : $ty:ty, $label:literal) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
		$vis struct $name;

		impl $crate::Tag for $name {
			type Value = $ty;
			const NAME: &'static str = $label;
		}
	};
	($(#[$meta:meta])* $vis:vis $name:ident : $ty:ty = $default:expr, $label:literal) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
		$vis struct $name;

		impl $crate::Tag for $name {
			type Value = $ty;
			const NAME: &'static str = $label;

			fn default_value() -> Self::Value {
				$default
			}
		}
	};
}

/// Runtime description of one field inside a field group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
	/// Field name, used in diagnostics.
	pub name: String,
	/// Number of contiguous elements per row.
	pub array_dim: usize,
}

impl FieldSpec {
	/// A scalar field.
	pub fn scalar(name: impl Into<String>) -> Self {
		Self::array(name, 1)
	}

	/// An array field with `array_dim` elements per row.
	///
	/// # Panics
	///
	/// Panics if `array_dim` is zero.
	pub fn array(name: impl Into<String>, array_dim: usize) -> Self {
		assert!(array_dim > 0, "array dimension must be positive");
		Self {
			name: name.into(),
			array_dim,
		}
	}
}

/// A field index plus an offset inside that field's array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldIndex {
	/// Which field of the group.
	pub field: usize,
	/// Offset inside the field's array.
	pub array_index: usize,
}
