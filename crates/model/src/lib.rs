//! Simulator model data on top of [`strata_container`].
//!
//! A [`Model`] owns one store of nodes and one store per registered mechanism
//! type. Before a time step, [`Model::ensure_sorted`] orders and freezes every
//! store and returns a [`ModelToken`] carrying per-thread row ranges and
//! resolved pointer caches.
//!
//! ```
//! use strata_model::{KeepOrder, MechanismInstance, MechanismSpec, Model, ModelConfig, Node};
//!
//! let model = Model::new(ModelConfig::default()).unwrap();
//! let hh = model.add_mechanism(MechanismSpec::new("hh").field("gnabar").dparam("v")).unwrap();
//!
//! let node = Node::new(&model).unwrap();
//! let instance = MechanismInstance::new(&model, hh).unwrap();
//! instance.set_dparam(0, node.v_handle().unwrap()).unwrap();
//!
//! let token = model.ensure_sorted(&KeepOrder).unwrap();
//! let range = token.mechanism_range(hh, 0).unwrap();
//! assert_eq!(range.dptr_field(0, 0).unwrap().get(), -65.0);
//! ```

/// Flattened views of a sorted model.
pub mod cache;
/// Model configuration.
pub mod config;
/// Error types.
pub mod error;
/// Mechanism storage.
pub mod mechanism;
/// The model context.
pub mod model;
/// Node storage.
pub mod node;
/// Per-thread mechanism views.
pub mod range;
/// Reordering strategies.
pub mod sorter;

#[cfg(test)]
mod invariants;

pub use cache::{ModelCache, PointerCache, ThreadCache};
pub use config::{ConfigError, ModelConfig};
pub use error::{ModelError, Result};
pub use mechanism::{Dparam, FloatingPoint, MechanismInstance, MechanismSpec, MechanismType};
pub use model::{Model, ModelMemoryUsage, ModelToken};
pub use node::{Area, Diagonal, Node, Rhs, SavedRhs, Voltage};
pub use range::MechanismRange;
pub use sorter::{KeepOrder, ModelSorter, split_evenly};
