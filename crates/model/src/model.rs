//! The model context: every store of a simulation plus the cache derived from them.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use strata_container::{
	FrozenToken, LegacyHandle, RawPtr, SoaStore, SortSession, StorageMemoryUsage, StoreError, StoreId,
	VectorMemoryUsage,
};
use tracing::debug;

use crate::cache::{ModelCache, SortedStore, ThreadCache};
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::mechanism::{self, MechanismSpec, MechanismType};
use crate::node;
use crate::range::MechanismRange;
use crate::sorter::{ModelSorter, split_evenly};

type CacheSlot = Arc<Mutex<Option<Arc<ModelCache>>>>;

/// Per-thread row counts a sorter produced, valid only for the epoch it sorted.
#[derive(Debug)]
struct Partition {
	epoch: u64,
	counts: Vec<usize>,
}

#[derive(Debug)]
struct Mechanism {
	spec: MechanismSpec,
	store: Arc<SoaStore>,
}

/// Owns the node store, one store per mechanism type, and the flattened cache.
///
/// The cache is dropped as soon as any store leaves the sorted state and is
/// rebuilt lazily by [`Self::ensure_sorted`].
#[derive(Debug)]
pub struct Model {
	config: ModelConfig,
	nodes: Arc<SoaStore>,
	mechanisms: RwLock<Vec<Option<Mechanism>>>,
	partitions: Mutex<FxHashMap<StoreId, Partition>>,
	cache: CacheSlot,
	sort_lock: Mutex<()>,
}

impl Model {
	/// Creates an empty model.
	pub fn new(config: ModelConfig) -> Result<Self> {
		config.validate()?;
		let nodes = node::build_store(&config)?;
		let model = Self {
			config,
			nodes,
			mechanisms: RwLock::new(Vec::new()),
			partitions: Mutex::new(FxHashMap::default()),
			cache: Arc::new(Mutex::new(None)),
			sort_lock: Mutex::new(()),
		};
		model.watch(&model.nodes);
		Ok(model)
	}

	/// Creates an empty model from a TOML configuration file.
	pub fn from_config_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
		Self::new(ModelConfig::load(path)?)
	}

	/// Configuration the model was created with.
	pub fn config(&self) -> &ModelConfig {
		&self.config
	}

	/// The node store.
	pub fn nodes(&self) -> &Arc<SoaStore> {
		&self.nodes
	}

	/// Registers a mechanism type and allocates its store.
	pub fn add_mechanism(&self, spec: MechanismSpec) -> Result<MechanismType> {
		let mut mechanisms = self.mechanisms.write();
		if mechanisms.iter().flatten().any(|existing| existing.spec.name == spec.name) {
			return Err(ModelError::DuplicateMechanism(spec.name));
		}
		let store = mechanism::build_store(&spec, &self.config)?;
		self.watch(&store);
		let ty = MechanismType(mechanisms.len());
		debug!(mechanism = %spec.name, ty = ty.index(), fields = spec.fields.len(), dparams = spec.dparams.len(), "mechanism registered");
		mechanisms.push(Some(Mechanism { spec, store }));
		drop(mechanisms);
		self.invalidate_cache();
		Ok(ty)
	}

	/// The store holding every instance of `ty`.
	pub fn mechanism_data(&self, ty: MechanismType) -> Result<Arc<SoaStore>> {
		self.with_mechanism(ty, |mechanism| mechanism.store.clone())
	}

	/// Layout `ty` was registered with.
	pub fn mechanism_spec(&self, ty: MechanismType) -> Result<MechanismSpec> {
		self.with_mechanism(ty, |mechanism| mechanism.spec.clone())
	}

	/// Looks up a registered mechanism by name.
	pub fn mechanism_type(&self, name: &str) -> Option<MechanismType> {
		self.mechanisms
			.read()
			.iter()
			.position(|entry| entry.as_ref().is_some_and(|mechanism| mechanism.spec.name == name))
			.map(MechanismType)
	}

	/// Every registered mechanism type, in registration order.
	pub fn mechanism_types(&self) -> Vec<MechanismType> {
		self.live_mechanisms().into_iter().map(|(ty, _)| ty).collect()
	}

	/// Unregisters `ty`. Fails while it still has instances.
	///
	/// The type index is never reused.
	pub fn delete_mechanism(&self, ty: MechanismType) -> Result<()> {
		let mut mechanisms = self.mechanisms.write();
		let slot = mechanisms.get_mut(ty.index()).ok_or(ModelError::UnknownMechanism(ty))?;
		let mechanism = slot.take().ok_or(ModelError::UnknownMechanism(ty))?;
		if !mechanism.store.is_empty() {
			let err = ModelError::MechanismInUse {
				name: mechanism.spec.name.clone(),
				rows: mechanism.store.size(),
			};
			*slot = Some(mechanism);
			return Err(err);
		}
		self.partitions.lock().remove(&mechanism.store.id());
		debug!(mechanism = %mechanism.spec.name, ty = ty.index(), "mechanism deleted");
		drop(mechanisms);
		self.invalidate_cache();
		Ok(())
	}

	/// The node store followed by every mechanism store.
	pub fn stores(&self) -> Vec<Arc<SoaStore>> {
		std::iter::once(self.nodes.clone())
			.chain(self.live_mechanisms().into_iter().map(|(_, store)| store))
			.collect()
	}

	/// Promotes a raw address to a stable handle by searching every store.
	///
	/// Addresses that no store holds stay in raw form.
	pub fn find_data_handle(&self, ptr: *const f64) -> LegacyHandle<f64> {
		RawPtr::new(ptr).promote(&self.stores())
	}

	/// Sorts every store with `sorter` and freezes them all.
	///
	/// Stores that are already sorted are left alone. The cache is rebuilt
	/// only if some store's layout changed since it was last built. Concurrent
	/// callers are serialized; the first one does the work and the rest reuse
	/// its result.
	pub fn ensure_sorted(&self, sorter: &dyn ModelSorter) -> Result<ModelToken> {
		let _serial = self.sort_lock.lock();
		let threads = self.config.threads;
		let nodes = self.sort_store(&self.nodes, |session| sorter.sort_nodes(session, threads))?;
		let mut mechanisms = Vec::new();
		for (ty, store) in self.live_mechanisms() {
			let token = self.sort_store(&store, |session| sorter.sort_mechanism(ty, session, threads))?;
			mechanisms.push((ty, token));
		}
		let cache = self.current_cache(&nodes, &mechanisms)?;
		Ok(ModelToken {
			nodes,
			mechanisms,
			cache,
		})
	}

	/// The cache, if one is built and still valid.
	pub fn cache(&self) -> Option<Arc<ModelCache>> {
		self.cache.lock().clone()
	}

	/// Memory used by all stores.
	pub fn memory_usage(&self) -> ModelMemoryUsage {
		let mut usage = ModelMemoryUsage {
			nodes: self.nodes.memory_usage(),
			..ModelMemoryUsage::default()
		};
		for (_, store) in self.live_mechanisms() {
			usage.mechanisms += store.memory_usage();
		}
		usage
	}

	fn with_mechanism<R>(&self, ty: MechanismType, f: impl FnOnce(&Mechanism) -> R) -> Result<R> {
		self.mechanisms
			.read()
			.get(ty.index())
			.and_then(Option::as_ref)
			.map(f)
			.ok_or(ModelError::UnknownMechanism(ty))
	}

	fn live_mechanisms(&self) -> Vec<(MechanismType, Arc<SoaStore>)> {
		self.mechanisms
			.read()
			.iter()
			.enumerate()
			.filter_map(|(index, entry)| Some((MechanismType(index), entry.as_ref()?.store.clone())))
			.collect()
	}

	fn watch(&self, store: &SoaStore) {
		let slot = Arc::downgrade(&self.cache);
		let name = store.name().to_owned();
		store.set_unsorted_callback(move || {
			if let Some(slot) = slot.upgrade()
				&& slot.lock().take().is_some()
			{
				debug!(store = %name, "model cache invalidated");
			}
		});
	}

	fn invalidate_cache(&self) {
		if self.cache.lock().take().is_some() {
			debug!("model cache invalidated");
		}
	}

	fn sort_store(
		&self,
		store: &Arc<SoaStore>,
		sort: impl FnOnce(&mut SortSession<'_>) -> std::result::Result<Vec<usize>, StoreError>,
	) -> Result<FrozenToken> {
		let threads = self.config.threads;
		let mut partition = None;
		let token = store.ensure_sorted(|session| {
			let counts = sort(session)?;
			session.check_partition(threads, &counts)?;
			partition = Some(counts);
			Ok(())
		})?;
		if let Some(counts) = partition {
			let epoch = token.epoch();
			self.partitions.lock().insert(store.id(), Partition { epoch, counts });
		}
		Ok(token)
	}

	/// Partition the sorter produced for the current epoch of `token`'s store.
	///
	/// Stores sorted outside the model get an even split.
	fn partition_for(&self, token: &FrozenToken) -> Vec<usize> {
		let store = token.store();
		match self.partitions.lock().get(&store.id()) {
			Some(partition) if partition.epoch == token.epoch() => partition.counts.clone(),
			_ => split_evenly(store.size(), self.config.threads),
		}
	}

	fn current_cache(&self, nodes: &FrozenToken, mechanisms: &[(MechanismType, FrozenToken)]) -> Result<Arc<ModelCache>> {
		let tokens = || std::iter::once(nodes).chain(mechanisms.iter().map(|(_, token)| token));
		let cached = self.cache.lock().clone();
		if let Some(cache) = cached
			&& cache.is_current(tokens())
		{
			return Ok(cache);
		}

		let node_partition = self.partition_for(nodes);
		let partitions: Vec<_> = mechanisms
			.iter()
			.map(|(_, token)| self.partition_for(token))
			.collect();
		let sorted: Vec<_> = mechanisms
			.iter()
			.zip(&partitions)
			.map(|((ty, token), partition)| (*ty, SortedStore { token, partition }))
			.collect();
		let cache = Arc::new(ModelCache::build(
			self.config.threads,
			SortedStore {
				token: nodes,
				partition: &node_partition,
			},
			&sorted,
		)?);
		*self.cache.lock() = Some(cache.clone());
		Ok(cache)
	}
}

/// Frozen tokens for every store of a [`Model`] plus the matching cache.
///
/// While this is alive no store can be resized or reordered.
#[derive(Debug, Clone)]
pub struct ModelToken {
	nodes: FrozenToken,
	mechanisms: Vec<(MechanismType, FrozenToken)>,
	cache: Arc<ModelCache>,
}

impl ModelToken {
	/// Token for the node store.
	pub fn nodes(&self) -> &FrozenToken {
		&self.nodes
	}

	/// Token for the store of `ty`.
	pub fn mechanism(&self, ty: MechanismType) -> Option<&FrozenToken> {
		self.mechanisms
			.iter()
			.find_map(|(candidate, token)| (*candidate == ty).then_some(token))
	}

	/// The cache built for this layout.
	pub fn cache(&self) -> &Arc<ModelCache> {
		&self.cache
	}

	/// Node rows owned by `thread`.
	pub fn node_range(&self, thread: usize) -> Result<Range<usize>> {
		Ok(self.thread(thread)?.nodes())
	}

	/// Instances of `ty` owned by `thread`.
	pub fn mechanism_range(&self, ty: MechanismType, thread: usize) -> Result<MechanismRange<'_>> {
		let token = self.mechanism(ty).ok_or(ModelError::UnknownMechanism(ty))?;
		let rows = self
			.thread(thread)?
			.mechanism(ty)
			.ok_or(ModelError::UnknownMechanism(ty))?;
		Ok(MechanismRange::new(token, self.cache.pointers(ty), rows))
	}

	fn thread(&self, thread: usize) -> Result<&ThreadCache> {
		self.cache.thread(thread).ok_or(ModelError::ThreadOutOfRange {
			thread,
			threads: self.cache.num_threads(),
		})
	}
}

/// Memory used by a [`Model`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelMemoryUsage {
	/// The node store.
	pub nodes: StorageMemoryUsage,
	/// All mechanism stores together.
	pub mechanisms: StorageMemoryUsage,
}

impl ModelMemoryUsage {
	/// Total across every store.
	pub fn total(&self) -> VectorMemoryUsage {
		self.nodes.total() + self.mechanisms.total()
	}
}

#[cfg(test)]
mod tests;
