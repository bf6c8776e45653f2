use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::{DataHandle, FieldSpec, HandleError, LegacyHandle, RawPtr, SoaStore, soa_tag};

soa_tag!(V: f64 = -65.0, "v");
soa_tag!(Area: f64 = 100.0, "area");
soa_tag!(Gates: f64, "gates");
soa_tag!(Fields: f64, "fpfields");

fn nodes() -> Arc<SoaStore> {
	SoaStore::builder("nodes")
		.column::<V>()
		.column::<Area>()
		.array_column::<Gates>(2)
		.build()
		.unwrap()
}

#[test]
fn null_handle_refuses_access() {
	let handle = DataHandle::<f64>::null();
	assert!(handle.is_null());
	assert!(!handle.is_valid());
	assert_eq!(handle, DataHandle::default());
	assert!(matches!(handle.get(), Err(HandleError::Null { .. })));
	assert_eq!(handle.to_string(), "data_handle<f64>{null}");
	assert!(!handle.notify_when_dies(|| {}));
}

#[test]
fn refers_to_checks_column_identity() {
	let store = nodes();
	let other = nodes();
	let owner = store.emplace_back().unwrap();
	let _foreign = other.emplace_back().unwrap();
	let v = store.handle::<V>(owner.identifier()).unwrap();
	assert!(v.refers_to::<V>(&store));
	assert!(!v.refers_to::<Area>(&store));
	assert!(!v.refers_to::<V>(&other));
	drop(owner);
	assert!(!v.refers_to::<V>(&store));
}

#[test]
fn refers_to_checks_every_field_of_a_group() {
	let store = SoaStore::builder("hh")
		.field_group::<Fields>(vec![FieldSpec::scalar("gnabar"), FieldSpec::array("ina", 2)])
		.build()
		.unwrap();
	let owner = store.emplace_back().unwrap();
	let gnabar = store.field_handle::<Fields>(owner.identifier(), 0, 0).unwrap();
	let ina = store.field_handle::<Fields>(owner.identifier(), 1, 1).unwrap();
	assert!(gnabar.refers_to::<Fields>(&store));
	assert!(ina.refers_to::<Fields>(&store));
	assert!(!ina.refers_to::<V>(&nodes()));
}

#[test]
fn equality_is_structural() {
	let store = nodes();
	let owner = store.emplace_back().unwrap();
	let v1 = store.handle::<V>(owner.identifier()).unwrap();
	let v2 = store.handle::<V>(owner.identifier()).unwrap();
	let area = store.handle::<Area>(owner.identifier()).unwrap();
	assert_eq!(v1, v2);
	assert_ne!(v1, area);
}

#[test]
fn display_reports_row_and_value() {
	let store = nodes();
	let _first = store.emplace_back().unwrap();
	let owner = store.emplace_back().unwrap();
	let v = store.handle::<V>(owner.identifier()).unwrap();
	assert_eq!(v.to_string(), "data_handle<f64>{cont=nodes v row=1/2 val=-65.0}");
	let gate = store.handle_at::<Gates>(owner.identifier(), 1).unwrap();
	assert_eq!(gate.to_string(), "data_handle<f64>{cont=nodes gates[1] row=1/2 val=0.0}");
	drop(owner);
	assert_eq!(v.to_string(), "data_handle<f64>{cont=nodes v died/1}");
}

#[test]
fn next_array_element_stays_in_row() {
	let store = nodes();
	let owner = store.emplace_back().unwrap();
	let first = store.handle_at::<Gates>(owner.identifier(), 0).unwrap();
	let second = first.next_array_element(1).unwrap();
	second.set(2.0).unwrap();
	assert_eq!(second.array_index(), 1);
	assert_eq!(store.get_field::<Gates>(0, 0, 1).unwrap(), 2.0);
	assert_eq!(second.next_array_element(-1).unwrap(), first);
	assert!(matches!(first.next_array_element(-1), Err(HandleError::ArrayOutOfRange { shift: -1, .. })));
	assert!(matches!(second.next_array_element(1), Err(HandleError::ArrayOutOfRange { shift: 1, .. })));
}

#[test]
fn resolve_requires_matching_token() {
	let store = nodes();
	let other = nodes();
	let owner = store.emplace_back().unwrap();
	let v = store.handle::<V>(owner.identifier()).unwrap();

	let wrong = other.get_sorted_token().unwrap();
	assert!(matches!(v.resolve(&wrong), Err(HandleError::NotFrozen { .. })));

	let token = store.get_sorted_token().unwrap();
	let ptr = v.resolve(&token).unwrap();
	assert_eq!(ptr.offset(), 0);
	ptr.set(-70.0);
	assert_eq!(v.get().unwrap(), -70.0);
	assert_eq!(ptr.get(), -70.0);
}

#[test]
fn raw_pointers_promote_or_fall_back() {
	let store = nodes();
	let owner = store.emplace_back().unwrap();
	let v = store.handle::<V>(owner.identifier()).unwrap();

	let promoted = v.address().unwrap().promote(std::slice::from_ref(&store));
	assert!(promoted.refers_to_a_modern_data_structure());
	assert_eq!(promoted.as_stable(), Some(&v));

	let local = 3.0_f64;
	let raw = RawPtr::new(&local as *const f64).promote(std::slice::from_ref(&store));
	assert!(!raw.refers_to_a_modern_data_structure());
	let LegacyHandle::Raw(ptr) = &raw else {
		panic!("expected the raw fallback");
	};
	// SAFETY: `local` outlives this read.
	assert_eq!(unsafe { *ptr.as_ref() }, 3.0);

	assert_ne!(promoted, raw);
	let null_raw = LegacyHandle::<f64>::Raw(RawPtr::null());
	let null_stable = LegacyHandle::Stable(DataHandle::<f64>::null());
	assert_eq!(null_raw, null_stable);
	assert_eq!(RawPtr::<f64>::null().promote(&[]), null_stable);
}
