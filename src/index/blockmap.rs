//! Block map: which local files contain a block with a given hash

use crate::error::IndexError;
use crate::index::keys::Keys;
use crate::store::{Backend, Transaction};
use crate::types::FileInfo;

/// Whether a local record contributes blocks to the map.
fn indexable(f: &FileInfo) -> bool {
	f.is_file() && !f.is_deleted() && !f.is_invalid()
}

pub(crate) fn add_blocks(tx: &mut Transaction<'_>, keys: &Keys, f: &FileInfo) {
	if !indexable(f) {
		return;
	}
	for b in f.blocks.iter().filter(|b| !b.is_empty()) {
		tx.put(keys.block(&b.hash, &f.name), b.offset.to_be_bytes().to_vec());
	}
}

pub(crate) fn remove_blocks(tx: &mut Transaction<'_>, keys: &Keys, f: &FileInfo) {
	for b in f.blocks.iter().filter(|b| !b.is_empty()) {
		tx.delete(keys.block(&b.hash, &f.name));
	}
}

/// Finds local copies of blocks by hash.
pub struct BlockFinder<'a> {
	backend: &'a dyn Backend,
	keys: &'a Keys,
}

impl<'a> BlockFinder<'a> {
	pub(crate) fn new(backend: &'a dyn Backend, keys: &'a Keys) -> Self {
		BlockFinder { backend, keys }
	}

	/// Call `f(name, offset)` for every local file holding `hash` until it
	/// returns true. Returns whether any call did.
	pub fn iterate<F>(&self, hash: &[u8; 32], mut f: F) -> Result<bool, IndexError>
	where
		F: FnMut(&str, u64) -> bool,
	{
		for (key, value) in self.backend.prefix(&self.keys.block_prefix(hash))? {
			let name = self.keys.parse_block_name(&key)?;
			if value.len() != 8 {
				return Err(IndexError::Corrupted {
					what: "block",
					message: format!("offset for {} has {} bytes", name, value.len()),
				});
			}
			let mut b = [0u8; 8];
			b.copy_from_slice(&value);
			if f(&name, u64::from_be_bytes(b)) {
				return Ok(true);
			}
		}
		Ok(false)
	}

	pub fn contains(&self, hash: &[u8; 32]) -> Result<bool, IndexError> {
		Ok(!self.backend.prefix(&self.keys.block_prefix(hash))?.is_empty())
	}
}

// vim: ts=4
