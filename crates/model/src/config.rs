//! Model configuration.
//!
//! ```toml
//! threads = 4
//! check_invariants = false
//! initial_capacity = 1024
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or an unknown key.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A value parsed but is not usable.
	#[error("invalid value for '{key}': {reason}")]
	Invalid {
		/// The offending key.
		key: &'static str,
		/// What is wrong with it.
		reason: &'static str,
	},
}

/// Tunables for a [`crate::Model`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
	/// Number of partitions handed to the sorter.
	pub threads: usize,
	/// Verify column lengths after every structural operation.
	pub check_invariants: bool,
	/// Rows reserved up front in every store.
	pub initial_capacity: usize,
}

impl Default for ModelConfig {
	fn default() -> Self {
		Self {
			threads: 1,
			check_invariants: cfg!(debug_assertions),
			initial_capacity: 0,
		}
	}
}

impl ModelConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	/// Rejects values that parse but cannot drive a model.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.threads == 0 {
			return Err(ConfigError::Invalid {
				key: "threads",
				reason: "at least one thread is required",
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests;
