//! Reordering strategies.

use strata_container::{SortSession, StoreError};

use crate::mechanism::MechanismType;

/// Decides the physical order of every store and how rows split across threads.
///
/// Each method reorders its store through `session` and returns one row count
/// per thread. Thread `t` owns the contiguous rows that follow those of
/// threads `0..t`, so the counts must sum to the store's size.
pub trait ModelSorter: Send + Sync {
	/// Orders the node store.
	fn sort_nodes(&self, session: &mut SortSession<'_>, threads: usize) -> Result<Vec<usize>, StoreError>;

	/// Orders the store of mechanism `ty`.
	fn sort_mechanism(
		&self,
		ty: MechanismType,
		session: &mut SortSession<'_>,
		threads: usize,
	) -> Result<Vec<usize>, StoreError>;
}

/// Leaves every store in its current order and splits rows evenly.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepOrder;

impl ModelSorter for KeepOrder {
	fn sort_nodes(&self, session: &mut SortSession<'_>, threads: usize) -> Result<Vec<usize>, StoreError> {
		Ok(split_evenly(session.store().size(), threads))
	}

	fn sort_mechanism(
		&self,
		_ty: MechanismType,
		session: &mut SortSession<'_>,
		threads: usize,
	) -> Result<Vec<usize>, StoreError> {
		Ok(split_evenly(session.store().size(), threads))
	}
}

/// Splits `rows` into `parts` counts differing by at most one, larger counts first.
pub fn split_evenly(rows: usize, parts: usize) -> Vec<usize> {
	if parts == 0 {
		return Vec::new();
	}
	let base = rows / parts;
	let extra = rows % parts;
	(0..parts).map(|part| base + usize::from(part < extra)).collect()
}
