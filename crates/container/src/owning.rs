//! Row ownership.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use crate::error::{Result, StoreError};
use crate::identifier::Identifier;
use crate::store::SoaStore;

/// Sole owner of one row of a store.
///
/// Created by appending a row; dropping it swap-deletes the row and
/// invalidates every [`Identifier`] referring to it. Owners cannot be
/// cloned.
///
/// Deleting a row from a frozen store is a caller bug. [`Self::release`]
/// reports it as an error and hands the owner back; an implicit drop logs it
/// and panics.
pub struct OwningIdentifier {
	id: Identifier,
	store: Arc<SoaStore>,
}

/// A failed [`OwningIdentifier::release`]. The row is still alive and owned by
/// [`Self::owner`].
#[derive(Debug, Error)]
#[error("could not release row: {error}")]
pub struct ReleaseError {
	/// The owner, returned so the caller can retry later.
	pub owner: OwningIdentifier,
	/// Why the row could not be erased.
	#[source]
	pub error: StoreError,
}

impl OwningIdentifier {
	/// Appends a default-valued row to `store` and takes ownership of it.
	pub fn new(store: &Arc<SoaStore>) -> Result<Self> {
		let id = store.push_row()?;
		Ok(Self {
			id,
			store: store.clone(),
		})
	}

	/// Non-owning view of the row.
	pub fn identifier(&self) -> &Identifier {
		&self.id
	}

	/// Current physical row. See [`Identifier::current_row`].
	pub fn current_row(&self) -> usize {
		self.id.current_row()
	}

	/// Returns `true` while the row is alive.
	///
	/// Only false if the row was removed behind the owner's back, by
	/// [`SoaStore::erase`] or by shrinking the store.
	pub fn is_valid(&self) -> bool {
		self.id.is_valid()
	}

	/// The store holding the row.
	pub fn store(&self) -> &Arc<SoaStore> {
		&self.store
	}

	/// Deletes the row.
	pub fn release(mut self) -> std::result::Result<(), ReleaseError> {
		match self.store.erase_identifier(&self.id) {
			Ok(()) => {
				self.id = Identifier::null();
				Ok(())
			}
			Err(error) => Err(ReleaseError { owner: self, error }),
		}
	}
}

impl Drop for OwningIdentifier {
	fn drop(&mut self) {
		if !self.id.is_valid() {
			return;
		}
		if let Err(err) = self.store.erase_identifier(&self.id) {
			error!(store = self.store.name(), identifier = %self.id, error = %err, "owner dropped while its store is frozen");
			if !std::thread::panicking() {
				panic!("{err}");
			}
		}
	}
}

impl AsRef<Identifier> for OwningIdentifier {
	fn as_ref(&self) -> &Identifier {
		&self.id
	}
}

impl From<&OwningIdentifier> for Identifier {
	fn from(owner: &OwningIdentifier) -> Self {
		owner.id.clone()
	}
}

impl fmt::Debug for OwningIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "OwningIdentifier({}, {})", self.store.name(), self.id)
	}
}
