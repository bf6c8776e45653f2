use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use proptest::prelude::*;
use rstest::rstest;
use strata_container::{FieldIndex, LegacyHandle, SoaStore, SortSession, StoreError};

use super::*;
use crate::mechanism::{MechanismInstance, MechanismSpec};
use crate::node::{Node, Voltage};
use crate::sorter::KeepOrder;

fn model(threads: usize) -> Model {
	Model::new(ModelConfig {
		threads,
		check_invariants: true,
		initial_capacity: 0,
	})
	.unwrap()
}

fn hh() -> MechanismSpec {
	MechanismSpec::new("hh").field("gnabar").field("gkbar").dparam("v")
}

#[derive(Default)]
struct Counting {
	nodes: AtomicUsize,
	mechanisms: AtomicUsize,
}

impl ModelSorter for Counting {
	fn sort_nodes(&self, session: &mut SortSession<'_>, threads: usize) -> Result<Vec<usize>, StoreError> {
		self.nodes.fetch_add(1, Ordering::SeqCst);
		KeepOrder.sort_nodes(session, threads)
	}

	fn sort_mechanism(
		&self,
		ty: MechanismType,
		session: &mut SortSession<'_>,
		threads: usize,
	) -> Result<Vec<usize>, StoreError> {
		self.mechanisms.fetch_add(1, Ordering::SeqCst);
		KeepOrder.sort_mechanism(ty, session, threads)
	}
}

struct ReverseNodes;

impl ModelSorter for ReverseNodes {
	fn sort_nodes(&self, session: &mut SortSession<'_>, threads: usize) -> Result<Vec<usize>, StoreError> {
		session.reverse()?;
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

struct Overfull;

impl ModelSorter for Overfull {
	fn sort_nodes(&self, session: &mut SortSession<'_>, _threads: usize) -> Result<Vec<usize>, StoreError> {
		Ok(vec![session.store().size() + 1])
	}

	fn sort_mechanism(
		&self,
		_ty: MechanismType,
		session: &mut SortSession<'_>,
		_threads: usize,
	) -> Result<Vec<usize>, StoreError> {
		Ok(vec![session.store().size()])
	}
}

/// Puts all but the last node on thread 0.
struct Lopsided;

impl ModelSorter for Lopsided {
	fn sort_nodes(&self, session: &mut SortSession<'_>, _threads: usize) -> Result<Vec<usize>, StoreError> {
		let rows = session.store().size();
		Ok(vec![rows.saturating_sub(1), rows.min(1)])
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

#[test]
fn new_model_is_empty() {
	let model = model(1);
	assert!(model.nodes().is_empty());
	assert!(model.mechanism_types().is_empty());
	assert!(model.cache().is_none());
	assert_eq!(model.stores().len(), 1);
}

#[test]
fn zero_threads_is_rejected() {
	let err = Model::new(ModelConfig {
		threads: 0,
		..ModelConfig::default()
	})
	.unwrap_err();
	assert!(matches!(err, ModelError::Config(_)));
}

#[test]
fn nodes_start_at_defaults() {
	let model = model(1);
	let node = Node::new(&model).unwrap();
	assert_eq!(node.v().unwrap(), crate::node::DEFAULT_VOLTAGE);
	assert_eq!(node.area().unwrap(), crate::node::DEFAULT_AREA);
	node.set_v(-70.0).unwrap();
	node.set_area(12.5).unwrap();
	assert_eq!(model.nodes().get::<Voltage>(node.current_row()).unwrap(), -70.0);
	assert_eq!(node.area().unwrap(), 12.5);
}

#[test]
fn keep_order_splits_rows_across_threads() {
	let model = model(2);
	let _nodes: Vec<_> = (0..5).map(|_| Node::new(&model).unwrap()).collect();
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert_eq!(token.node_range(0).unwrap(), 0..3);
	assert_eq!(token.node_range(1).unwrap(), 3..5);
	assert!(matches!(
		token.node_range(2),
		Err(ModelError::ThreadOutOfRange { thread: 2, threads: 2 })
	));
	assert!(model.nodes().is_frozen());
}

#[test]
fn cache_is_reused_until_a_store_changes() {
	let model = model(1);
	let _first = Node::new(&model).unwrap();
	let sorter = Counting::default();

	let token = model.ensure_sorted(&sorter).unwrap();
	let cache = token.cache().clone();
	drop(token);
	let token = model.ensure_sorted(&sorter).unwrap();
	assert!(Arc::ptr_eq(&cache, token.cache()));
	assert_eq!(sorter.nodes.load(Ordering::SeqCst), 1);
	drop(token);

	let _second = Node::new(&model).unwrap();
	assert!(model.cache().is_none());
	let token = model.ensure_sorted(&sorter).unwrap();
	assert!(!Arc::ptr_eq(&cache, token.cache()));
	assert_eq!(sorter.nodes.load(Ordering::SeqCst), 2);
	let epoch = token.cache().epoch(model.nodes().id()).unwrap();
	assert!(epoch > cache.epoch(model.nodes().id()).unwrap());
}

#[test]
fn adding_a_mechanism_drops_the_cache() {
	let model = model(1);
	drop(model.ensure_sorted(&KeepOrder).unwrap());
	assert!(model.cache().is_some());
	let ty = model.add_mechanism(hh()).unwrap();
	assert!(model.cache().is_none());
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert!(token.mechanism(ty).is_some());
	assert_eq!(token.mechanism_range(ty, 0).unwrap().len(), 0);
}

#[test]
fn sorter_reorders_and_handles_follow() {
	let model = model(1);
	let nodes: Vec<_> = (0..3).map(|_| Node::new(&model).unwrap()).collect();
	for (node, v) in nodes.iter().zip([1.0, 2.0, 3.0]) {
		node.set_v(v).unwrap();
	}
	let handles: Vec<_> = nodes.iter().map(|node| node.v_handle().unwrap()).collect();

	let token = model.ensure_sorted(&ReverseNodes).unwrap();
	assert_eq!(&*token.nodes().read::<Voltage>().unwrap(), &[3.0, 2.0, 1.0]);
	assert_eq!(nodes[0].current_row(), 2);
	for (handle, v) in handles.iter().zip([1.0, 2.0, 3.0]) {
		assert_eq!(handle.get().unwrap(), v);
	}
}

#[test]
fn bad_partition_aborts_the_sort() {
	let model = model(1);
	let _node = Node::new(&model).unwrap();
	let err = model.ensure_sorted(&Overfull).unwrap_err();
	assert!(matches!(err, ModelError::Store(StoreError::Partition { rows: 1, parts: 1, .. })));
	assert!(!model.nodes().is_sorted());
	assert!(!model.nodes().is_frozen());
	assert!(model.cache().is_none());
}

#[test]
fn sorter_partition_survives_until_the_store_is_resorted_elsewhere() {
	let model = model(2);
	let _nodes: Vec<_> = (0..4).map(|_| Node::new(&model).unwrap()).collect();
	let token = model.ensure_sorted(&Lopsided).unwrap();
	assert_eq!(token.node_range(0).unwrap(), 0..3);
	drop(token);
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert_eq!(token.node_range(0).unwrap(), 0..3);
	drop(token);

	model.nodes().reverse().unwrap();
	drop(model.nodes().get_sorted_token().unwrap());
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert_eq!(token.node_range(0).unwrap(), 0..2);
	assert_eq!(token.node_range(1).unwrap(), 2..4);
}

#[test]
fn retargeting_a_dparam_rebuilds_the_pointer_cache() {
	let model = model(1);
	let ty = model.add_mechanism(hh()).unwrap();
	let a = Node::new(&model).unwrap();
	let b = Node::new(&model).unwrap();
	b.set_v(-10.0).unwrap();
	let instance = MechanismInstance::new(&model, ty).unwrap();
	instance.set_dparam(0, a.v_handle().unwrap()).unwrap();
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert_eq!(token.mechanism_range(ty, 0).unwrap().dptr_field(0, 0).unwrap().get(), -65.0);
	assert!(instance.set_dparam(0, b.v_handle().unwrap()).is_err());
	drop(token);

	instance.set_dparam(0, b.v_handle().unwrap()).unwrap();
	assert!(model.cache().is_none());
	assert!(!model.mechanism_data(ty).unwrap().is_sorted());
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	let range = token.mechanism_range(ty, 0).unwrap();
	assert_eq!(range.dptr_field(0, 0).unwrap().get(), -10.0);
	assert_eq!(instance.dparam(0).unwrap().try_into_handle::<f64>().unwrap().get().unwrap(), -10.0);
}

#[test]
fn pointer_cache_resolves_node_values() {
	let model = model(1);
	let ty = model.add_mechanism(hh()).unwrap();
	let node = Node::new(&model).unwrap();
	let instance = MechanismInstance::new(&model, ty).unwrap();
	instance.set_dparam(0, node.v_handle().unwrap()).unwrap();

	let token = model.ensure_sorted(&KeepOrder).unwrap();
	let range = token.mechanism_range(ty, 0).unwrap();
	let v = range.dptr_field(0, 0).unwrap();
	assert_eq!(v.get(), -65.0);
	v.set(-40.0);
	drop(range);
	drop(token);
	assert_eq!(node.v().unwrap(), -40.0);
}

#[test]
fn unresolvable_pointers_are_not_cached() {
	let model = model(1);
	let ty = model.add_mechanism(MechanismSpec::new("syn").dparam("dead").dparam("foreign").dparam("unset")).unwrap();
	let outside = SoaStore::builder("outside").column::<Voltage>().build().unwrap();
	let stranger = outside.emplace_back().unwrap();
	let doomed = Node::new(&model).unwrap();
	let instance = MechanismInstance::new(&model, ty).unwrap();
	instance.set_dparam(0, doomed.v_handle().unwrap()).unwrap();
	instance
		.set_dparam(1, outside.handle::<Voltage>(stranger.identifier()).unwrap())
		.unwrap();
	doomed.release().unwrap();

	let token = model.ensure_sorted(&KeepOrder).unwrap();
	let range = token.mechanism_range(ty, 0).unwrap();
	assert!(range.dptr_field(0, 0).is_none());
	assert!(range.dptr_field(0, 1).is_none());
	assert!(range.dptr_field(0, 2).is_none());
	assert!(range.dptr_field(1, 0).is_none());
}

#[test]
fn mechanism_range_reads_and_writes_fields() {
	let model = model(2);
	let spec = MechanismSpec::new("cad").field("depth").array_field("conc", 3);
	let ty = model.add_mechanism(spec).unwrap();
	let instances: Vec<_> = (0..3).map(|_| MechanismInstance::new(&model, ty).unwrap()).collect();
	for (i, instance) in instances.iter().enumerate() {
		instance.set_fpfield(0, i as f64).unwrap();
		for k in 0..3 {
			let index = FieldIndex { field: 1, array_index: k };
			instance.set_data(index, (10 * i + k) as f64).unwrap();
		}
	}
	assert_eq!(instances[1].legacy_data(3).unwrap(), 12.0);

	let token = model.ensure_sorted(&KeepOrder).unwrap();
	let second = token.mechanism_range(ty, 1).unwrap();
	assert_eq!(second.offset(), 2);
	assert_eq!(second.len(), 1);
	assert_eq!(second.fpfield(0, 0).unwrap(), 2.0);
	assert_eq!(&*second.fpfield_slice(1).unwrap(), &[20.0, 21.0, 22.0]);
	assert!(matches!(second.fpfield_slice(2), Err(ModelError::Store(_))));
	assert!(matches!(
		second.fpfield(1, 0),
		Err(ModelError::InstanceOutOfRange { instance: 1, len: 1 })
	));

	let first = token.mechanism_range(ty, 0).unwrap();
	first.set_fpfield(1, 0, 7.5).unwrap();
	assert_eq!(first.data(0, FieldIndex { field: 1, array_index: 1 }).unwrap(), 1.0);
	drop(first);
	drop(second);
	drop(token);
	assert_eq!(instances[1].fpfield(0).unwrap(), 7.5);
}

#[test]
fn frozen_model_refuses_new_rows() {
	let model = model(1);
	let node = Node::new(&model).unwrap();
	let token = model.ensure_sorted(&KeepOrder).unwrap();
	assert!(matches!(
		Node::new(&model),
		Err(ModelError::Store(StoreError::Frozen {
			operation: "emplace_back",
			..
		}))
	));
	let node = match node.release() {
		Err(err) => err.owner,
		Ok(()) => panic!("release succeeded on a frozen store"),
	};
	assert!(node.is_valid());
	drop(token);
	node.release().unwrap();
	assert!(model.nodes().is_empty());
}

#[test]
fn mechanism_registry() {
	let model = model(1);
	let ty = model.add_mechanism(hh()).unwrap();
	assert_eq!(model.mechanism_type("hh"), Some(ty));
	assert_eq!(model.mechanism_spec(ty).unwrap(), hh());
	assert!(matches!(model.add_mechanism(hh()), Err(ModelError::DuplicateMechanism(name)) if name == "hh"));

	let instance = MechanismInstance::new(&model, ty).unwrap();
	assert!(matches!(
		model.delete_mechanism(ty),
		Err(ModelError::MechanismInUse { rows: 1, .. })
	));
	instance.release().unwrap();
	model.delete_mechanism(ty).unwrap();
	assert_eq!(model.mechanism_type("hh"), None);
	assert!(matches!(model.mechanism_data(ty), Err(ModelError::UnknownMechanism(_))));
	assert!(matches!(MechanismInstance::new(&model, ty), Err(ModelError::UnknownMechanism(_))));

	let again = model.add_mechanism(hh()).unwrap();
	assert_ne!(again, ty);
}

#[test]
fn find_data_handle_searches_every_store() {
	let model = model(1);
	let ty = model.add_mechanism(hh()).unwrap();
	let node = Node::new(&model).unwrap();
	let instance = MechanismInstance::new(&model, ty).unwrap();
	instance.set_fpfield(1, 3.0).unwrap();

	let address = node.v_handle().unwrap().address().unwrap();
	match model.find_data_handle(address.as_ptr()) {
		LegacyHandle::Stable(handle) => assert_eq!(handle, node.v_handle().unwrap()),
		LegacyHandle::Raw(ptr) => panic!("not promoted: {ptr:?}"),
	}

	let address = instance.fpfield_handle(1, 0).unwrap().address().unwrap();
	let promoted = model.find_data_handle(address.as_ptr());
	assert!(promoted.refers_to_a_modern_data_structure());

	let outside = 0.0_f64;
	let raw = model.find_data_handle(&outside);
	assert!(!raw.refers_to_a_modern_data_structure());
}

#[test]
fn concurrent_sorts_run_once() {
	let model = model(1);
	let _nodes: Vec<_> = (0..4).map(|_| Node::new(&model).unwrap()).collect();
	let ty = model.add_mechanism(hh()).unwrap();
	let _instance = MechanismInstance::new(&model, ty).unwrap();
	let sorter = Counting::default();
	let barrier = Barrier::new(4);
	std::thread::scope(|scope| {
		for _ in 0..4 {
			scope.spawn(|| {
				barrier.wait();
				let token = model.ensure_sorted(&sorter).unwrap();
				assert_eq!(token.node_range(0).unwrap(), 0..4);
			});
		}
	});
	assert_eq!(sorter.nodes.load(Ordering::SeqCst), 1);
	assert_eq!(sorter.mechanisms.load(Ordering::SeqCst), 1);
	assert!(!model.nodes().is_frozen());
}

#[test]
fn memory_usage_covers_every_store() {
	let model = model(1);
	let ty = model.add_mechanism(hh()).unwrap();
	let before = model.memory_usage();
	let _nodes: Vec<_> = (0..8).map(|_| Node::new(&model).unwrap()).collect();
	let _instances: Vec<_> = (0..8).map(|_| MechanismInstance::new(&model, ty).unwrap()).collect();
	let after = model.memory_usage();
	assert!(after.nodes.heavy_data.size > before.nodes.heavy_data.size);
	assert!(after.mechanisms.stable_identifiers.size > before.mechanisms.stable_identifiers.size);
	assert!(after.total().size <= after.total().capacity);
}

#[rstest]
#[case(0, 3, vec![0, 0, 0])]
#[case(5, 2, vec![3, 2])]
#[case(6, 3, vec![2, 2, 2])]
#[case(7, 1, vec![7])]
fn split_evenly_cases(#[case] rows: usize, #[case] parts: usize, #[case] expected: Vec<usize>) {
	assert_eq!(split_evenly(rows, parts), expected);
}

proptest! {
	#[test]
	fn prop_split_evenly_covers_rows(rows in 0usize..10_000, parts in 1usize..64) {
		let counts = split_evenly(rows, parts);
		prop_assert_eq!(counts.len(), parts);
		prop_assert_eq!(counts.iter().sum::<usize>(), rows);
		let (min, max) = (counts.iter().min().copied(), counts.iter().max().copied());
		prop_assert!(max.unwrap_or(0) - min.unwrap_or(0) <= 1);
	}
}
