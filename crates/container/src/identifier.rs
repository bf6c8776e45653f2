//! Permutation-stable row identifiers.
//!
//! An [`Identifier`] never stores a row number directly. It shares a
//! [`RowCell`] with the store's index array, and the store rewrites that cell
//! whenever the row moves. When the row is deleted the cell is set to
//! [`INVALID_ROW`]; the cell itself lives until the last identifier
//! referring to it is dropped, so a stale identifier can always observe that
//! its row is gone.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::Mutex;

/// Sentinel stored in a cell whose row has been deleted.
pub const INVALID_ROW: usize = usize::MAX;

/// Callback run once when a row is deleted.
pub type DeathCallback = Box<dyn FnOnce() + Send>;

/// Shared validity cell holding the current physical row of one logical entry.
pub(crate) struct RowCell {
	row: AtomicUsize,
	watchers: Mutex<Vec<DeathCallback>>,
}

impl RowCell {
	fn new(row: usize) -> Self {
		Self {
			row: AtomicUsize::new(row),
			watchers: Mutex::new(Vec::new()),
		}
	}
}

/// A non-owning, permutation-stable reference to a row.
///
/// Cloning is cheap and never extends the lifetime of the row. The default
/// value is the null identifier.
#[derive(Clone, Default)]
pub struct Identifier {
	cell: Option<Arc<RowCell>>,
}

impl Identifier {
	/// The null identifier.
	pub const fn null() -> Self {
		Self { cell: None }
	}

	/// Creates an identifier with a fresh cell pointing at `row`.
	pub(crate) fn fresh(row: usize) -> Self {
		Self {
			cell: Some(Arc::new(RowCell::new(row))),
		}
	}

	/// Returns `true` if this identifier never referred to a row.
	pub fn is_null(&self) -> bool {
		self.cell.is_none()
	}

	/// Returns `true` if the identifier refers to a live row.
	///
	/// Safe to call on null and dead identifiers.
	pub fn is_valid(&self) -> bool {
		self.try_current_row().is_some()
	}

	/// Returns `true` if the identifier referred to a row that has since been deleted.
	pub fn was_once_valid(&self) -> bool {
		self.cell
			.as_ref()
			.is_some_and(|cell| cell.row.load(AtomicOrdering::Acquire) == INVALID_ROW)
	}

	/// Returns the current physical row.
	///
	/// The value is invalidated by any deletion from, or permutation of, the
	/// underlying store.
	///
	/// # Panics
	///
	/// Panics if the identifier is null or its row has been deleted.
	pub fn current_row(&self) -> usize {
		match self.try_current_row() {
			Some(row) => row,
			None => panic!("current_row() called on an invalid identifier ({self})"),
		}
	}

	/// Returns the current physical row, or `None` if the identifier is null or dead.
	pub fn try_current_row(&self) -> Option<usize> {
		let row = self.cell.as_ref()?.row.load(AtomicOrdering::Acquire);
		(row != INVALID_ROW).then_some(row)
	}

	/// Registers `callback` to run once when the row is deleted.
	///
	/// Returns `false`, without registering, if the identifier is null or
	/// already dead.
	pub fn notify_on_death(&self, callback: impl FnOnce() + Send + 'static) -> bool {
		let Some(cell) = self.cell.as_ref() else {
			return false;
		};
		let mut watchers = cell.watchers.lock();
		if cell.row.load(AtomicOrdering::Acquire) == INVALID_ROW {
			return false;
		}
		watchers.push(Box::new(callback));
		true
	}

	/// Rewrites the cell to a new physical row.
	pub(crate) fn set_current_row(&self, row: usize) {
		debug_assert!(row != INVALID_ROW);
		if let Some(cell) = self.cell.as_ref() {
			cell.row.store(row, AtomicOrdering::Release);
		}
	}

	/// Marks the row deleted and hands back the registered death callbacks.
	///
	/// Callers run the callbacks after releasing store locks.
	pub(crate) fn invalidate(&self) -> Vec<DeathCallback> {
		let Some(cell) = self.cell.as_ref() else {
			return Vec::new();
		};
		let mut watchers = cell.watchers.lock();
		cell.row.store(INVALID_ROW, AtomicOrdering::Release);
		std::mem::take(&mut *watchers)
	}

	/// Heap bytes taken by one shared cell.
	pub(crate) fn cell_size() -> usize {
		std::mem::size_of::<RowCell>()
	}

	/// Address of the shared cell, used for identity comparisons.
	pub(crate) fn cell_addr(&self) -> usize {
		self.cell.as_ref().map_or(0, |cell| Arc::as_ptr(cell) as usize)
	}
}

impl PartialEq for Identifier {
	/// Equal if both share a cell, or both are null.
	fn eq(&self, other: &Self) -> bool {
		match (&self.cell, &other.cell) {
			(Some(a), Some(b)) => Arc::ptr_eq(a, b),
			(None, None) => true,
			_ => false,
		}
	}
}

impl Eq for Identifier {}

impl Hash for Identifier {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.cell_addr().hash(state);
	}
}

impl PartialOrd for Identifier {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Identifier {
	/// Orders by cell identity; stable for the lifetime of the cells, not across runs.
	fn cmp(&self, other: &Self) -> Ordering {
		self.cell_addr().cmp(&other.cell_addr())
	}
}

impl fmt::Display for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.cell.as_ref().map(|cell| cell.row.load(AtomicOrdering::Acquire)) {
			None => f.write_str("null"),
			Some(INVALID_ROW) => f.write_str("died"),
			Some(row) => write!(f, "row={row}"),
		}
	}
}

impl fmt::Debug for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Identifier({self})")
	}
}
