use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{GenericHandle, HandleError, OwningIdentifier, SoaStore, StoreError, soa_tag};

soa_tag!(Id: u64, "id");
soa_tag!(X: f64, "x");

fn store_with(values: &[f64]) -> (Arc<SoaStore>, Vec<OwningIdentifier>) {
	let store = SoaStore::builder("points").column::<Id>().column::<X>().build().unwrap();
	let owners = values
		.iter()
		.enumerate()
		.map(|(i, &x)| {
			let owner = store.emplace_back().unwrap();
			store.set::<Id>(owner.current_row(), i as u64).unwrap();
			store.set::<X>(owner.current_row(), x).unwrap();
			owner
		})
		.collect();
	(store, owners)
}

/// Must rewrite every identifier cell after a row moves.
///
/// - Enforced in: `SoaStore::reorder`, `SoaStore::swap_remove`
/// - Failure symptom: Handles silently read another row's value after a sort or delete.
#[cfg_attr(test, test)]
pub(crate) fn test_identifiers_follow_rows() {
	let (store, owners) = store_with(&[0.0, 1.0, 4.0, 9.0, 16.0]);
	store.apply_permutation(&[3, 0, 4, 1, 2]).unwrap();
	for owner in &owners {
		let row = owner.current_row();
		assert_eq!(store.identifier(row).unwrap(), *owner.identifier());
	}
}

/// Must keep every active column the same length as the index array.
///
/// - Enforced in: `SoaStore::size`, `SoaStore::check_lengths`
/// - Failure symptom: Row `r` of one column describes a different entity than row `r` of another.
#[cfg_attr(test, test)]
pub(crate) fn test_columns_stay_aligned() {
	let (store, mut owners) = store_with(&[1.0, 2.0, 3.0]);
	owners.remove(0);
	store.resize(5).unwrap();
	store.rotate(2).unwrap();
	assert_eq!(store.size(), 5);
	store.with_column::<X, _>(|xs| assert_eq!(xs.len(), 5)).unwrap();
	store.with_column::<Id, _>(|ids| assert_eq!(ids.len(), 5)).unwrap();
}

/// Must refuse structural changes while any token is outstanding.
///
/// - Enforced in: `SoaStore::check_access`
/// - Failure symptom: Flattened views index into reallocated or reordered columns.
#[cfg_attr(test, test)]
pub(crate) fn test_frozen_store_refuses_structure() {
	let (store, _owners) = store_with(&[1.0, 2.0]);
	let token = store.get_sorted_token().unwrap();
	assert!(matches!(store.emplace_back(), Err(StoreError::Frozen { operation: "emplace_back", .. })));
	assert!(matches!(store.reverse(), Err(StoreError::Frozen { .. })));
	assert_eq!(store.size(), 2);
	assert!(store.is_sorted());
	drop(token);
	store.reverse().unwrap();
	assert!(!store.is_sorted());
}

/// Must validate a permutation in full before moving any row.
///
/// - Enforced in: `check_permutation`
/// - Failure symptom: A rejected permutation leaves the store half-reordered.
#[cfg_attr(test, test)]
pub(crate) fn test_rejected_permutation_changes_nothing() {
	let (store, _owners) = store_with(&[1.0, 2.0, 3.0]);
	drop(store.get_sorted_token().unwrap());
	assert!(store.apply_permutation(&[2, 2, 0]).is_err());
	assert!(store.is_sorted());
	store.with_column::<X, _>(|xs| assert_eq!(xs, &[1.0, 2.0, 3.0])).unwrap();
}

/// Must run the reorder closure once no matter how many callers race to sort.
///
/// - Enforced in: `SoaStore::ensure_sorted`
/// - Failure symptom: The expensive reorder runs repeatedly, or callers see different epochs.
#[cfg_attr(test, test)]
pub(crate) fn test_single_flight_sort() {
	let (store, _owners) = store_with(&[3.0, 1.0, 2.0]);
	let runs = AtomicUsize::new(0);
	let sort = || {
		store
			.ensure_sorted(|session| {
				runs.fetch_add(1, Ordering::SeqCst);
				session.apply_permutation(&[1, 2, 0])
			})
			.unwrap()
	};
	let first = sort();
	let second = sort();
	assert_eq!(runs.load(Ordering::SeqCst), 1);
	assert_eq!(first.epoch(), second.epoch());
	assert_eq!(&*first.read::<X>().unwrap(), &[1.0, 2.0, 3.0]);
}

/// Must refuse to convert an erased handle to the wrong element type.
///
/// - Enforced in: `GenericHandle::try_into_legacy`
/// - Failure symptom: Memory of one type is reinterpreted as another.
#[cfg_attr(test, test)]
pub(crate) fn test_generic_handle_type_checked() {
	let (store, owners) = store_with(&[5.0]);
	let generic = GenericHandle::from(store.handle::<X>(owners[0].identifier()).unwrap());
	assert!(matches!(generic.try_into_handle::<u64>(), Err(HandleError::TypeMismatch { .. })));
	assert_eq!(generic.get::<f64>().unwrap(), 5.0);
}

/// Must run death callbacks exactly once, after the row is gone.
///
/// - Enforced in: `Identifier::invalidate`, `SoaStore::erase_identifier`
/// - Failure symptom: Collaborators keep using a value that no longer exists, or are told twice.
#[cfg_attr(test, test)]
pub(crate) fn test_death_notification_once() {
	let (store, mut owners) = store_with(&[1.0, 2.0]);
	let handle = store.handle::<X>(owners[0].identifier()).unwrap();
	let deaths = Arc::new(AtomicUsize::new(0));
	let counter = deaths.clone();
	assert!(handle.notify_when_dies(move || {
		counter.fetch_add(1, Ordering::SeqCst);
	}));
	owners.remove(0);
	assert_eq!(deaths.load(Ordering::SeqCst), 1);
	assert!(!handle.notify_when_dies(|| {}));
	assert!(matches!(handle.get(), Err(HandleError::Dead { .. })));
}
