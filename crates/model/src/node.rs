//! Per-compartment node storage.

use std::sync::Arc;

use strata_container::{DataHandle, Identifier, OwningIdentifier, ReleaseError, SoaStore, StoreError, Tag, soa_tag};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::model::Model;

/// Resting potential given to new nodes, in mV.
pub const DEFAULT_VOLTAGE: f64 = -65.0;

/// Surface area given to new nodes, in µm².
pub const DEFAULT_AREA: f64 = 100.0;

soa_tag!(
	/// Membrane potential.
	pub Voltage: f64 = DEFAULT_VOLTAGE, "v"
);
soa_tag!(
	/// Compartment surface area.
	pub Area: f64 = DEFAULT_AREA, "area"
);
soa_tag!(
	/// Right-hand side of the linear system.
	pub Rhs: f64, "rhs"
);
soa_tag!(
	/// Diagonal of the linear system.
	pub Diagonal: f64, "d"
);
soa_tag!(
	/// Saved right-hand side, present only while membrane currents are recorded.
	pub SavedRhs: f64, "sav_rhs"
);

pub(crate) fn build_store(config: &ModelConfig) -> std::result::Result<Arc<SoaStore>, StoreError> {
	SoaStore::builder("nodes")
		.column::<Voltage>()
		.column::<Area>()
		.column::<Rhs>()
		.column::<Diagonal>()
		.optional_column::<SavedRhs>()
		.check_invariants(config.check_invariants)
		.with_capacity(config.initial_capacity)
		.build()
}

/// Owner of one node row.
///
/// Dropping the node deletes its row.
#[derive(Debug)]
pub struct Node {
	owner: OwningIdentifier,
}

impl Node {
	/// Appends a node with default values.
	pub fn new(model: &Model) -> Result<Self> {
		Ok(Self {
			owner: OwningIdentifier::new(model.nodes())?,
		})
	}

	/// Stable identifier of the row.
	pub fn identifier(&self) -> &Identifier {
		self.owner.identifier()
	}

	/// Current physical row.
	pub fn current_row(&self) -> usize {
		self.owner.current_row()
	}

	/// Stable handle to one of the node's values.
	pub fn handle<T: Tag<Value = f64>>(&self) -> Result<DataHandle<f64>> {
		Ok(self.owner.store().handle::<T>(self.owner.identifier())?)
	}

	/// Reads one of the node's values.
	pub fn get<T: Tag<Value = f64>>(&self) -> Result<f64> {
		Ok(self.handle::<T>()?.get()?)
	}

	/// Writes one of the node's values. Allowed while the store is frozen.
	pub fn set<T: Tag<Value = f64>>(&self, value: f64) -> Result<()> {
		Ok(self.handle::<T>()?.set(value)?)
	}

	/// Membrane potential.
	pub fn v(&self) -> Result<f64> {
		self.get::<Voltage>()
	}

	/// Sets the membrane potential.
	pub fn set_v(&self, value: f64) -> Result<()> {
		self.set::<Voltage>(value)
	}

	/// Stable handle to the membrane potential.
	pub fn v_handle(&self) -> Result<DataHandle<f64>> {
		self.handle::<Voltage>()
	}

	/// Surface area.
	pub fn area(&self) -> Result<f64> {
		self.get::<Area>()
	}

	/// Sets the surface area.
	pub fn set_area(&self, value: f64) -> Result<()> {
		self.set::<Area>(value)
	}

	/// Deletes the row. On a frozen store the error carries the row's owner back.
	pub fn release(self) -> std::result::Result<(), ReleaseError> {
		self.owner.release()
	}
}
