//! Flattened views derived from a sorted model.
//!
//! A [`ModelCache`] is only valid for the exact layout it was built from. It
//! records the epoch of every store it looked at and is rebuilt as soon as any
//! of them changes.

use std::ops::Range;

use rustc_hash::FxHashMap;
use strata_container::{FrozenToken, GenericHandle, ResolvedPtr, StoreError, StoreId};
use tracing::{debug, warn};

use crate::mechanism::{Dparam, MechanismType};

/// Resolved targets of one mechanism's pointer slots, indexed `[dparam][row]`.
pub type PointerCache = Vec<Vec<Option<ResolvedPtr<f64>>>>;

/// Rows owned by one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadCache {
	nodes: Range<usize>,
	mechanisms: FxHashMap<MechanismType, Range<usize>>,
}

impl ThreadCache {
	/// Node rows of this thread.
	pub fn nodes(&self) -> Range<usize> {
		self.nodes.clone()
	}

	/// Rows of mechanism `ty` owned by this thread.
	pub fn mechanism(&self, ty: MechanismType) -> Option<Range<usize>> {
		self.mechanisms.get(&ty).cloned()
	}
}

/// One sorted store and its thread partition.
pub(crate) struct SortedStore<'a> {
	pub(crate) token: &'a FrozenToken,
	pub(crate) partition: &'a [usize],
}

/// Per-thread offsets and pointer caches for one sorted layout.
#[derive(Debug)]
pub struct ModelCache {
	epochs: FxHashMap<StoreId, u64>,
	threads: Vec<ThreadCache>,
	pointers: FxHashMap<MechanismType, PointerCache>,
}

impl ModelCache {
	pub(crate) fn build(
		threads: usize,
		nodes: SortedStore<'_>,
		mechanisms: &[(MechanismType, SortedStore<'_>)],
	) -> Result<Self, StoreError> {
		let mut epochs = FxHashMap::default();
		let mut by_store = FxHashMap::default();
		for sorted in std::iter::once(&nodes).chain(mechanisms.iter().map(|(_, sorted)| sorted)) {
			let store = sorted.token.store();
			epochs.insert(store.id(), sorted.token.epoch());
			by_store.insert(store.id(), sorted.token);
		}

		let mut per_thread = vec![ThreadCache::default(); threads];
		for (thread, range) in ranges(nodes.partition).enumerate().take(threads) {
			per_thread[thread].nodes = range;
		}
		let mut pointers = FxHashMap::default();
		for (ty, sorted) in mechanisms {
			for (thread, range) in ranges(sorted.partition).enumerate().take(threads) {
				per_thread[thread].mechanisms.insert(*ty, range);
			}
			pointers.insert(*ty, pointer_cache(sorted.token, &by_store)?);
		}

		debug!(stores = epochs.len(), threads, "model cache built");
		Ok(Self {
			epochs,
			threads: per_thread,
			pointers,
		})
	}

	/// Returns `true` if every token still shows the epoch this cache was built from.
	pub fn is_current<'a>(&self, tokens: impl IntoIterator<Item = &'a FrozenToken>) -> bool {
		let mut seen = 0;
		for token in tokens {
			seen += 1;
			if self.epochs.get(&token.store().id()) != Some(&token.epoch()) || !token.is_sorted() {
				return false;
			}
		}
		seen == self.epochs.len()
	}

	/// Epoch of `store` when the cache was built.
	pub fn epoch(&self, store: StoreId) -> Option<u64> {
		self.epochs.get(&store).copied()
	}

	/// Number of thread partitions.
	pub fn num_threads(&self) -> usize {
		self.threads.len()
	}

	/// Rows owned by `thread`.
	pub fn thread(&self, thread: usize) -> Option<&ThreadCache> {
		self.threads.get(thread)
	}

	/// Pointer cache of mechanism `ty`.
	pub fn pointers(&self, ty: MechanismType) -> Option<&PointerCache> {
		self.pointers.get(&ty)
	}
}

fn ranges(partition: &[usize]) -> impl Iterator<Item = Range<usize>> + '_ {
	partition.iter().scan(0, |offset, &count| {
		let start = *offset;
		*offset += count;
		Some(start..*offset)
	})
}

fn pointer_cache(token: &FrozenToken, tokens: &FxHashMap<StoreId, &FrozenToken>) -> Result<PointerCache, StoreError> {
	let store = token.store();
	let dparams = store.num_fields::<Dparam>()?;
	(0..dparams)
		.map(|dparam| {
			let slots = token.read_field::<Dparam>(dparam)?;
			Ok(slots.iter().map(|target| resolve(target, tokens)).collect())
		})
		.collect()
}

fn resolve(target: &GenericHandle, tokens: &FxHashMap<StoreId, &FrozenToken>) -> Option<ResolvedPtr<f64>> {
	if target.is_null() || !target.holds::<f64>() {
		return None;
	}
	let handle = match target.try_into_handle::<f64>() {
		Ok(handle) => handle,
		Err(err) => {
			warn!(handle = %target, error = %err, "pointer slot cannot be cached");
			return None;
		}
	};
	let Some(token) = handle.store_id().and_then(|id| tokens.get(&id)) else {
		warn!(handle = %target, "pointer slot refers to a store outside the model");
		return None;
	};
	handle
		.resolve(token)
		.inspect_err(|err| warn!(handle = %target, error = %err, "pointer slot cannot be resolved"))
		.ok()
}
