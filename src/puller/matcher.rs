//! Sorting needed records into work, and deciding what each file needs

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::blocks::{block_diff, blocks_equal};
use crate::types::{BlockInfo, FileInfo};

/// The needed records of one round, grouped by the action they require.
#[derive(Debug, Default)]
pub struct NeedBatch {
	pub dirs_changed: Vec<FileInfo>,
	pub symlinks_changed: Vec<FileInfo>,
	pub files_changed: BTreeMap<String, FileInfo>,
	pub files_deleted: Vec<FileInfo>,
	pub dirs_deleted: Vec<FileInfo>,
}

impl NeedBatch {
	pub fn from_needed<I: IntoIterator<Item = FileInfo>>(needed: I) -> Self {
		let mut batch = NeedBatch::default();
		for f in needed {
			if f.is_invalid() {
				continue;
			}
			match (f.is_deleted(), f.is_directory(), f.is_symlink()) {
				(true, true, _) => batch.dirs_deleted.push(f),
				(true, false, _) => batch.files_deleted.push(f),
				(false, true, _) => batch.dirs_changed.push(f),
				(false, false, true) => batch.symlinks_changed.push(f),
				(false, false, false) => {
					batch.files_changed.insert(f.name.clone(), f);
				}
			}
		}

		// Parents before children when creating, children first when deleting
		batch.dirs_changed.sort_by(|a, b| a.name.cmp(&b.name));
		batch.symlinks_changed.sort_by(|a, b| a.name.cmp(&b.name));
		batch.files_deleted.sort_by(|a, b| a.name.cmp(&b.name));
		batch.dirs_deleted.sort_by(|a, b| b.name.cmp(&a.name));
		batch
	}

	pub fn len(&self) -> usize {
		self.dirs_changed.len()
			+ self.symlinks_changed.len()
			+ self.files_changed.len()
			+ self.files_deleted.len()
			+ self.dirs_deleted.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Find needed files whose whole content already exists in another local file.
///
/// Returns `(target name, source)` pairs. Each target appears at most once.
/// Empty files and a file matching itself are skipped.
pub fn find_whole_file_copies<I>(changed: &BTreeMap<String, FileInfo>, local: I) -> Vec<(String, FileInfo)>
where
	I: IntoIterator<Item = FileInfo>,
{
	let mut buckets: HashMap<[u8; 32], Vec<&FileInfo>> = HashMap::new();
	for f in changed.values() {
		if let Some(first) = f.blocks.first() {
			if f.size > 0 && !first.is_empty() {
				buckets.entry(first.hash).or_default().push(f);
			}
		}
	}

	let mut pairs = Vec::new();
	for have in local {
		if !have.is_file() || have.is_deleted() || have.is_invalid() || have.size == 0 {
			continue;
		}
		let first = match have.blocks.first() {
			Some(b) => b.hash,
			None => continue,
		};
		let bucket = match buckets.get_mut(&first) {
			Some(b) => b,
			None => continue,
		};

		let mut i = 0;
		while i < bucket.len() {
			let target = bucket[i];
			if target.name != have.name && blocks_equal(&target.blocks, &have.blocks) {
				pairs.push((target.name.clone(), have.clone()));
				bucket.remove(i);
			} else {
				i += 1;
			}
		}
		if bucket.is_empty() {
			buckets.remove(&first);
		}
		if buckets.is_empty() {
			break;
		}
	}
	pairs
}

/// What a changed file needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePlan {
	/// Content on disk is already right; only metadata needs applying
	Shortcut,
	/// These non-empty blocks must be written into the temp file
	Fetch { blocks: Vec<BlockInfo>, reused: usize },
}

/// Plan a changed file given the current local record and the blocks of a
/// leftover temp file, if any.
pub fn plan_file(current: Option<&FileInfo>, target: &FileInfo, temp_blocks: Option<&[BlockInfo]>) -> FilePlan {
	let cur_blocks: &[BlockInfo] = match current {
		Some(c) if c.is_file() && !c.is_deleted() && !c.is_invalid() => &c.blocks,
		_ => &[],
	};

	let (have, need) = block_diff(cur_blocks, &target.blocks);
	if !cur_blocks.is_empty()
		&& need.is_empty()
		&& have.len() == cur_blocks.len()
		&& have.len() == target.blocks.len()
	{
		return FilePlan::Shortcut;
	}

	let mut blocks: Vec<BlockInfo> = target.blocks.iter().filter(|b| !b.is_empty()).cloned().collect();
	let mut reused = 0;
	if let Some(temp) = temp_blocks {
		let (present, _) = block_diff(temp, &target.blocks);
		let offsets: HashSet<u64> = present.iter().filter(|b| !b.is_empty()).map(|b| b.offset).collect();
		blocks.retain(|b| !offsets.contains(&b.offset));
		reused = offsets.len();
	}
	FilePlan::Fetch { blocks, reused }
}


// vim: ts=4
