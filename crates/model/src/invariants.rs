use std::sync::Arc;

use crate::{KeepOrder, MechanismInstance, MechanismSpec, Model, ModelConfig, ModelError, Node};

/// Must never hand out a cache built for an older layout.
///
/// - Enforced in: `Model::watch`, `ModelCache::is_current`
/// - Failure symptom: Hot loops index stale physical offsets and update the wrong compartment.
#[cfg_attr(test, test)]
pub(crate) fn test_cache_tracks_epochs() {
	let model = Model::new(ModelConfig::default()).unwrap();
	let nodes = [Node::new(&model).unwrap(), Node::new(&model).unwrap()];
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	let cache = token.cache().clone();
	assert!(cache.is_current([token.nodes()]));
	drop(token);

	model.nodes().reverse().unwrap();
	assert!(model.cache().is_none());
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert!(!Arc::ptr_eq(&cache, token.cache()));
	assert!(!cache.is_current([token.nodes()]));
	drop(token);
	drop(nodes);
}

/// Must keep every store frozen for as long as a model token is alive.
///
/// - Enforced in: `Model::ensure_sorted`, `ModelToken`
/// - Failure symptom: A range or resolved pointer reads past a reallocated column.
#[cfg_attr(test, test)]
pub(crate) fn test_token_freezes_every_store() {
	let model = Model::new(ModelConfig::default()).unwrap();
	let ty = model.add_mechanism(MechanismSpec::new("pas").field("g")).unwrap();
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert!(model.stores().iter().all(|store| store.is_frozen()));
	assert!(matches!(MechanismInstance::new(&model, ty), Err(ModelError::Store(_))));
	let copy = token.clone();
	drop(token);
	assert!(model.stores().iter().all(|store| store.is_frozen()));
	drop(copy);
	assert!(model.stores().iter().all(|store| !store.is_frozen()));
}
