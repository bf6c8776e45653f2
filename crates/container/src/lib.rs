//! Permutation-stable structure-of-arrays storage.
//!
//! Rows live in a [`SoaStore`]: one contiguous vector per column, reorderable
//! at will. Code outside the store refers to rows through [`Identifier`]s and
//! to values through [`DataHandle`]s, both of which follow their row across
//! swap-deletes and permutations. A [`FrozenToken`] pins the layout so that
//! hot loops can index the raw column slices directly.
//!
//! ```
//! use strata_container::{SoaStore, soa_tag};
//!
//! soa_tag!(X: f64, "x");
//!
//! let store = SoaStore::builder("points").column::<X>().build().unwrap();
//! let a = store.emplace_back().unwrap();
//! let b = store.emplace_back().unwrap();
//! let handle = store.handle::<X>(b.identifier()).unwrap();
//! handle.set(4.0).unwrap();
//!
//! store.reverse().unwrap();
//! assert_eq!(b.current_row(), 0);
//! assert_eq!(handle.get().unwrap(), 4.0);
//!
//! drop(a);
//! let token = store.get_sorted_token().unwrap();
//! assert_eq!(&*token.read::<X>().unwrap(), &[4.0]);
//! ```

/// Column vectors and their type-erased interface.
mod column;
/// Error types.
pub mod error;
/// Type-erased handles.
pub mod generic;
/// Typed handles and the raw-pointer fallback.
pub mod handle;
/// Permutation-stable row identifiers.
pub mod identifier;
/// Memory accounting.
pub mod memory;
/// Row ownership.
pub mod owning;
/// The columnar store and its freeze tokens.
pub mod store;
/// Column tags and field descriptions.
pub mod tag;

#[cfg(test)]
mod invariants;

pub use column::StoreId;
pub use error::{HandleError, PermutationError, Result, StoreError};
pub use generic::{GenericHandle, ValueType};
pub use handle::{DataHandle, LegacyHandle, RawPtr, ResolvedPtr};
pub use identifier::{DeathCallback, INVALID_ROW, Identifier};
pub use memory::{StorageMemoryUsage, VectorMemoryUsage};
pub use owning::{OwningIdentifier, ReleaseError};
pub use store::{FrozenToken, SoaStore, SortSession, StoreBuilder, UnsortedCallback};
pub use tag::{FieldIndex, FieldSpec, Tag};
