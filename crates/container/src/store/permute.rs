//! Permutation vectors.
//!
//! Two conventions are used throughout:
//!
//! - a *forward* permutation `p` moves old row `p[i]` to new row `i`;
//! - a *reverse* permutation `r` moves old row `i` to new row `r[i]`.
//!
//! Internally everything is applied as a reverse permutation, broken down into
//! a sequence of row swaps that is replayed identically on every column.

use crate::error::PermutationError;

/// Checks that `perm` is a bijection of `0..len`.
///
/// Returns `true` if the permutation is the identity (an empty vector is
/// trivially the identity).
pub(crate) fn check_permutation(perm: &[usize], len: usize) -> Result<bool, PermutationError> {
	if perm.len() != len {
		return Err(PermutationError::WrongLength {
			expected: len,
			got: perm.len(),
		});
	}
	let mut trivial = true;
	let mut seen = vec![false; len];
	for (i, &value) in perm.iter().enumerate() {
		trivial &= i == value;
		if value >= len {
			return Err(PermutationError::OutOfRange { value, len });
		}
		if std::mem::replace(&mut seen[value], true) {
			return Err(PermutationError::Repeated { value });
		}
	}
	Ok(trivial)
}

/// Inverts a permutation, turning forward into reverse and vice versa.
pub(crate) fn invert(perm: &[usize]) -> Vec<usize> {
	let mut inverse = vec![0; perm.len()];
	for (i, &value) in perm.iter().enumerate() {
		inverse[value] = i;
	}
	inverse
}

/// Reverse permutation that flips the row order.
pub(crate) fn reversal(len: usize) -> Vec<usize> {
	(0..len).map(|i| len - 1 - i).collect()
}

/// Reverse permutation for a left rotation by `k`: the row at `k` becomes row 0.
pub(crate) fn left_rotation(len: usize, k: usize) -> Vec<usize> {
	if len == 0 {
		return Vec::new();
	}
	let k = k % len;
	(0..len).map(|i| (i + len - k) % len).collect()
}

/// Decomposes a validated reverse permutation into row swaps.
///
/// Replaying the swaps in order moves old row `i` to row `reverse[i]`.
pub(crate) fn swap_sequence(reverse: &[usize]) -> Vec<(usize, usize)> {
	let mut perm = reverse.to_vec();
	let mut swaps = Vec::new();
	for i in 0..perm.len() {
		while perm[i] != i {
			let next = perm[i];
			swaps.push((i, next));
			perm.swap(i, next);
		}
	}
	swaps
}
