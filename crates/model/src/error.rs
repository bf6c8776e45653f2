//! Model errors.

use strata_container::{HandleError, StoreError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::mechanism::MechanismType;

/// Errors raised by [`crate::Model`] and its wrappers.
#[derive(Debug, Error)]
pub enum ModelError {
	/// A store operation failed.
	#[error(transparent)]
	Store(#[from] StoreError),

	/// A handle could not be dereferenced.
	#[error(transparent)]
	Handle(#[from] HandleError),

	/// Configuration was rejected.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// No mechanism is registered under this type.
	#[error("unknown mechanism type {0}")]
	UnknownMechanism(MechanismType),

	/// A mechanism name is already registered.
	#[error("mechanism '{0}' is already registered")]
	DuplicateMechanism(String),

	/// A mechanism still has instances.
	#[error("mechanism '{name}' still has {rows} instances")]
	MechanismInUse {
		/// Mechanism name.
		name: String,
		/// Number of live instances.
		rows: usize,
	},

	/// A thread index past the configured thread count.
	#[error("thread {thread} out of range for {threads} threads")]
	ThreadOutOfRange {
		/// Requested thread.
		thread: usize,
		/// Configured thread count.
		threads: usize,
	},

	/// An instance index past the end of a range.
	#[error("instance {instance} out of range for a range of {len}")]
	InstanceOutOfRange {
		/// Requested instance.
		instance: usize,
		/// Range length.
		len: usize,
	},
}

/// Result alias for model operations.
pub type Result<T, E = ModelError> = std::result::Result<T, E>;
