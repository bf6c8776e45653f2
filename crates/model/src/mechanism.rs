//! Per-mechanism-instance storage.
//!
//! Every mechanism type gets its own store with two field groups:
//! floating-point RANGE variables and pointer slots (dparams). The number and
//! shape of both is only known once the mechanism is registered.

use std::fmt;
use std::sync::Arc;

use strata_container::{
	DataHandle, FieldIndex, FieldSpec, GenericHandle, Identifier, OwningIdentifier, ReleaseError, SoaStore, StoreError,
	soa_tag,
};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::model::Model;

soa_tag!(
	/// Floating-point RANGE variables of a mechanism.
	pub FloatingPoint: f64, "fpfields"
);
soa_tag!(
	/// Pointer slots of a mechanism, each referring into some other store.
	pub Dparam: GenericHandle, "dparam"
);

/// Index of a registered mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MechanismType(pub(crate) usize);

impl MechanismType {
	/// Position in the model's registration order.
	pub fn index(self) -> usize {
		self.0
	}
}

impl fmt::Display for MechanismType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Layout of a mechanism type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MechanismSpec {
	/// Mechanism name, also the store name.
	pub name: String,
	/// Floating-point fields in declaration order.
	pub fields: Vec<FieldSpec>,
	/// Names of the pointer slots.
	pub dparams: Vec<String>,
}

impl MechanismSpec {
	/// A mechanism with no fields yet.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	/// Adds a scalar floating-point field.
	pub fn field(mut self, name: impl Into<String>) -> Self {
		self.fields.push(FieldSpec::scalar(name));
		self
	}

	/// Adds an array floating-point field.
	///
	/// # Panics
	///
	/// Panics if `array_dim` is zero.
	pub fn array_field(mut self, name: impl Into<String>, array_dim: usize) -> Self {
		self.fields.push(FieldSpec::array(name, array_dim));
		self
	}

	/// Adds a pointer slot.
	pub fn dparam(mut self, name: impl Into<String>) -> Self {
		self.dparams.push(name.into());
		self
	}
}

pub(crate) fn build_store(spec: &MechanismSpec, config: &ModelConfig) -> std::result::Result<Arc<SoaStore>, StoreError> {
	SoaStore::builder(spec.name.as_str())
		.field_group::<FloatingPoint>(spec.fields.clone())
		.field_group::<Dparam>(spec.dparams.iter().map(|name| FieldSpec::scalar(name.as_str())).collect())
		.check_invariants(config.check_invariants)
		.with_capacity(config.initial_capacity)
		.build()
}

/// Owner of one mechanism instance.
#[derive(Debug)]
pub struct MechanismInstance {
	owner: OwningIdentifier,
	ty: MechanismType,
}

impl MechanismInstance {
	/// Appends an instance of `ty` with zeroed fields and null pointers.
	pub fn new(model: &Model, ty: MechanismType) -> Result<Self> {
		let store = model.mechanism_data(ty)?;
		Ok(Self {
			owner: OwningIdentifier::new(&store)?,
			ty,
		})
	}

	/// Which mechanism this is an instance of.
	pub fn mechanism_type(&self) -> MechanismType {
		self.ty
	}

	/// Stable identifier of the row.
	pub fn identifier(&self) -> &Identifier {
		self.owner.identifier()
	}

	/// Current physical row.
	pub fn current_row(&self) -> usize {
		self.owner.current_row()
	}

	/// Stable handle to element `array_index` of floating-point field `field`.
	pub fn fpfield_handle(&self, field: usize, array_index: usize) -> Result<DataHandle<f64>> {
		Ok(self
			.owner
			.store()
			.field_handle::<FloatingPoint>(self.owner.identifier(), field, array_index)?)
	}

	/// Reads a scalar floating-point field.
	pub fn fpfield(&self, field: usize) -> Result<f64> {
		self.data(FieldIndex { field, array_index: 0 })
	}

	/// Reads one element of a floating-point field.
	pub fn data(&self, index: FieldIndex) -> Result<f64> {
		Ok(self.fpfield_handle(index.field, index.array_index)?.get()?)
	}

	/// Writes one element of a floating-point field. Allowed while frozen.
	pub fn set_data(&self, index: FieldIndex, value: f64) -> Result<()> {
		Ok(self.fpfield_handle(index.field, index.array_index)?.set(value)?)
	}

	/// Writes a scalar floating-point field.
	pub fn set_fpfield(&self, field: usize, value: f64) -> Result<()> {
		self.set_data(FieldIndex { field, array_index: 0 }, value)
	}

	/// Reads the element at flat index `index` across all floating-point fields.
	pub fn legacy_data(&self, index: usize) -> Result<f64> {
		let index = self.owner.store().translate_legacy_index::<FloatingPoint>(index)?;
		self.data(index)
	}

	/// Current target of pointer slot `dparam`.
	pub fn dparam(&self, dparam: usize) -> Result<GenericHandle> {
		let store = self.owner.store();
		Ok(store.get_field::<Dparam>(self.current_row(), dparam, 0)?)
	}

	/// Points slot `dparam` at `target`. Refused while the store is frozen.
	///
	/// Marks the store unsorted, which drops any model cache holding the
	/// previously resolved pointer.
	pub fn set_dparam(&self, dparam: usize, target: impl Into<GenericHandle>) -> Result<()> {
		let store = self.owner.store();
		store.set_field::<Dparam>(self.current_row(), dparam, 0, target.into())?;
		store.mark_as_unsorted()?;
		Ok(())
	}

	/// Deletes the instance. On a frozen store the error carries the owner back.
	pub fn release(self) -> std::result::Result<(), ReleaseError> {
		self.owner.release()
	}
}
