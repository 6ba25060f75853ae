//! The need predicate

use crate::types::FileInfo;
use crate::version::Vector;

/// Anything carrying the fields the need decision looks at.
pub trait Versioned {
	fn is_invalid(&self) -> bool;
	fn is_deleted(&self) -> bool;
	fn version(&self) -> &Vector;
}

impl Versioned for FileInfo {
	fn is_invalid(&self) -> bool {
		FileInfo::is_invalid(self)
	}

	fn is_deleted(&self) -> bool {
		self.deleted
	}

	fn version(&self) -> &Vector {
		&self.version
	}
}

/// Whether the local device must act on `global`.
///
/// An invalid global is never needed. A deletion is not needed when nothing
/// exists locally. Otherwise it is needed unless the local version already
/// covers the global one.
pub fn need<G: Versioned + ?Sized>(global: &G, have_local: bool, local_version: Option<&Vector>) -> bool {
	if global.is_invalid() {
		return false;
	}
	if global.is_deleted() && !have_local {
		return false;
	}
	if have_local {
		if let Some(local) = local_version {
			if local.greater_equal(global.version()) {
				return false;
			}
		}
	}
	true
}


// vim: ts=4
