use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::freeze::FreezeState;
use super::{ColumnKind, SoaStore, TagColumns};
use crate::column::{Column, ColumnMeta, ColumnSlot, StoreId};
use crate::error::{Result, StoreError};
use crate::tag::{FieldSpec, Tag};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

type ColumnFactory = Box<dyn FnOnce(&ColumnMeta) -> ColumnSlot>;

struct PendingTag {
	type_id: TypeId,
	tag: &'static str,
	kind: ColumnKind,
	fields: Vec<(FieldSpec, ColumnFactory)>,
}

/// Declares the schema of a [`SoaStore`].
///
/// ```
/// use strata_container::{SoaStore, soa_tag};
///
/// soa_tag!(X: f64, "x");
///
/// let store = SoaStore::builder("points").column::<X>().build().unwrap();
/// assert_eq!(store.size(), 0);
/// ```
pub struct StoreBuilder {
	name: Arc<str>,
	tags: Vec<PendingTag>,
	check_invariants: bool,
	capacity: usize,
}

impl StoreBuilder {
	pub(crate) fn new(name: impl Into<Arc<str>>) -> Self {
		Self {
			name: name.into(),
			tags: Vec::new(),
			check_invariants: cfg!(debug_assertions),
			capacity: 0,
		}
	}

	/// Adds a scalar column for `T`.
	pub fn column<T: Tag>(self) -> Self {
		self.array_column::<T>(1)
	}

	/// Adds a column for `T` holding `array_dim` elements per row.
	///
	/// # Panics
	///
	/// Panics if `array_dim` is zero.
	pub fn array_column<T: Tag>(self, array_dim: usize) -> Self {
		self.push::<T>(ColumnKind::Single, vec![FieldSpec::array(T::NAME, array_dim)])
	}

	/// Adds a scalar column for `T` that starts disabled and can be toggled at runtime.
	pub fn optional_column<T: Tag>(self) -> Self {
		self.push::<T>(ColumnKind::Optional, vec![FieldSpec::scalar(T::NAME)])
	}

	/// Adds one column per entry of `fields`, all holding `T::Value`.
	pub fn field_group<T: Tag>(self, fields: Vec<FieldSpec>) -> Self {
		self.push::<T>(ColumnKind::Group, fields)
	}

	/// Enables full column-length verification after every structural change.
	///
	/// Defaults to on in debug builds.
	pub fn check_invariants(mut self, enabled: bool) -> Self {
		self.check_invariants = enabled;
		self
	}

	/// Reserves room for `rows` rows in every column.
	pub fn with_capacity(mut self, rows: usize) -> Self {
		self.capacity = rows;
		self
	}

	/// Allocates the store.
	///
	/// Fails if the same tag was declared twice.
	pub fn build(self) -> Result<Arc<SoaStore>> {
		let id = StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed));
		let mut columns = Vec::new();
		let mut lookup = FxHashMap::default();
		for pending in self.tags {
			let entry = TagColumns {
				kind: pending.kind,
				tag: pending.tag,
				first: columns.len(),
				count: pending.fields.len(),
			};
			if lookup.insert(pending.type_id, entry).is_some() {
				return Err(StoreError::DuplicateColumn {
					store: self.name.to_string(),
					tag: pending.tag,
				});
			}
			for (spec, factory) in pending.fields {
				let meta = ColumnMeta {
					store_id: id,
					store_name: self.name.clone(),
					field_name: spec.name,
					array_dim: spec.array_dim,
					optional: pending.kind == ColumnKind::Optional,
				};
				let slot = factory(&meta);
				slot.erased.reserve_rows(self.capacity);
				columns.push(slot);
			}
		}
		debug!(store = %self.name, id = id.get(), columns = columns.len(), "store created");
		Ok(Arc::new(SoaStore {
			id,
			name: self.name,
			columns,
			lookup,
			indices: RwLock::new(Vec::with_capacity(self.capacity)),
			state: Mutex::new(FreezeState::default()),
			sort_done: Condvar::new(),
			unsorted_callback: Mutex::new(None),
			check_invariants: self.check_invariants,
		}))
	}

	fn push<T: Tag>(mut self, kind: ColumnKind, fields: Vec<FieldSpec>) -> Self {
		let fields = fields
			.into_iter()
			.map(|spec| {
				let factory: ColumnFactory = Box::new(move |meta: &ColumnMeta| {
					let active = !meta.optional;
					ColumnSlot::new(Column::new(meta.clone(), T::default_value(), active, 0))
				});
				(spec, factory)
			})
			.collect();
		self.tags.push(PendingTag {
			type_id: TypeId::of::<T>(),
			tag: T::NAME,
			kind,
			fields,
		});
		self
	}
}
