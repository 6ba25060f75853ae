//! Deterministic conflict resolution
//!
//! When two devices modified a file concurrently every replica must agree
//! on the same winner without talking to each other. [`wins_conflict`] is a
//! total, antisymmetric decision over the records alone.

use crate::types::FileInfo;
use crate::version::Ordering;

/// Returns true if `f` should win over `other` in a concurrent modification.
///
/// Valid beats invalid, unflagged beats locally conflict-flagged, the later
/// modification time wins, and finally the vector order breaks the tie.
pub fn wins_conflict(f: &FileInfo, other: &FileInfo) -> bool {
	if f.is_invalid() != other.is_invalid() {
		return !f.is_invalid();
	}

	match (f.should_conflict(), other.should_conflict()) {
		(true, false) => return false,
		(false, true) => return true,
		_ => {}
	}

	if f.mod_time() != other.mod_time() {
		return f.mod_time() > other.mod_time();
	}

	f.version.compare(&other.version) == Ordering::ConcurrentGreater
}


// vim: ts=4
