//! Per-thread view of one mechanism's rows for hot loops.

use std::ops::Range;

use parking_lot::MappedRwLockReadGuard;
use strata_container::{FieldIndex, FrozenToken, ResolvedPtr};

use crate::cache::PointerCache;
use crate::error::{ModelError, Result};
use crate::mechanism::FloatingPoint;

/// The contiguous rows of one mechanism owned by one thread.
///
/// Instance `i` of the range is physical row `offset() + i`. Only obtainable
/// through a [`crate::ModelToken`], so the layout cannot change while a range
/// is alive.
#[derive(Debug)]
pub struct MechanismRange<'a> {
	token: &'a FrozenToken,
	pointers: Option<&'a PointerCache>,
	rows: Range<usize>,
}

impl<'a> MechanismRange<'a> {
	pub(crate) fn new(token: &'a FrozenToken, pointers: Option<&'a PointerCache>, rows: Range<usize>) -> Self {
		Self { token, pointers, rows }
	}

	/// Number of instances.
	pub fn len(&self) -> usize {
		self.rows.len()
	}

	/// Returns `true` if this thread owns no instances.
	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// Physical row of instance 0.
	pub fn offset(&self) -> usize {
		self.rows.start
	}

	fn row(&self, instance: usize) -> Result<usize> {
		if instance >= self.len() {
			return Err(ModelError::InstanceOutOfRange {
				instance,
				len: self.len(),
			});
		}
		Ok(self.rows.start + instance)
	}

	/// Element `index` of `instance`.
	pub fn data(&self, instance: usize, index: FieldIndex) -> Result<f64> {
		let row = self.row(instance)?;
		Ok(self
			.token
			.get_field::<FloatingPoint>(row, index.field, index.array_index)?)
	}

	/// Scalar field `field` of `instance`.
	pub fn fpfield(&self, instance: usize, field: usize) -> Result<f64> {
		self.data(instance, FieldIndex { field, array_index: 0 })
	}

	/// Overwrites element `index` of `instance`.
	pub fn set_data(&self, instance: usize, index: FieldIndex, value: f64) -> Result<()> {
		let row = self.row(instance)?;
		Ok(self
			.token
			.set_field::<FloatingPoint>(row, index.field, index.array_index, value)?)
	}

	/// Overwrites scalar field `field` of `instance`.
	pub fn set_fpfield(&self, instance: usize, field: usize, value: f64) -> Result<()> {
		self.set_data(instance, FieldIndex { field, array_index: 0 }, value)
	}

	/// This thread's slice of field `field`, `array_dim` elements per instance.
	pub fn fpfield_slice(&self, field: usize) -> Result<MappedRwLockReadGuard<'a, [f64]>> {
		let dims = self.token.store().array_dims::<FloatingPoint>()?;
		let column = self.token.read_field::<FloatingPoint>(field)?;
		let dim = dims[field];
		let elements = self.rows.start * dim..self.rows.end * dim;
		Ok(MappedRwLockReadGuard::map(column, |data| &data[elements]))
	}

	/// Cached target of pointer slot `dparam` for `instance`.
	///
	/// `None` for null slots and for slots whose target could not be resolved
	/// when the cache was built.
	pub fn dptr_field(&self, instance: usize, dparam: usize) -> Option<&'a ResolvedPtr<f64>> {
		let row = self.row(instance).ok()?;
		self.pointers?.get(dparam)?.get(row)?.as_ref()
	}
}
