//! Local folder scanner
//!
//! Walks the folder, compares what is on disk with the local index and
//! records every difference as a new local version. Files that vanished
//! are recorded as deleted.

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use crate::blocks;
use crate::error::{BlockError, SyncError};
use crate::fs::{Filesystem, TempNamer};
use crate::index::FileSet;
use crate::logging::*;
use crate::types::{DeviceId, FileInfo, ShortId};
use crate::version::Vector;
use crate::versioner::VERSIONS_DIR;

pub struct Scanner {
	fs: Arc<dyn Filesystem>,
	short_id: ShortId,
	block_size: usize,
	namer: TempNamer,
}

impl Scanner {
	pub fn new(fs: Arc<dyn Filesystem>, short_id: ShortId, block_size: usize) -> Self {
		Scanner { fs, short_id, block_size, namer: TempNamer::default() }
	}

	fn skipped(&self, name: &str) -> bool {
		self.namer.is_temporary(name)
			|| name == VERSIONS_DIR
			|| name.strip_prefix(VERSIONS_DIR).map_or(false, |rest| rest.starts_with('/'))
	}

	fn describe(&self, name: &str, meta: &Metadata) -> io::Result<Option<FileInfo>> {
		let ft = meta.file_type();
		let mut fi = if ft.is_dir() {
			FileInfo::directory(name)
		} else if ft.is_symlink() {
			FileInfo::symlink(name, &self.fs.read_link(name)?)
		} else if ft.is_file() {
			let mut f = FileInfo::file(name, Vec::new());
			f.size = meta.len();
			f
		} else {
			return Ok(None);
		};
		let mtime = filetime::FileTime::from_last_modification_time(meta);
		fi.modified_s = mtime.unix_seconds();
		fi.modified_ns = mtime.nanoseconds();
		fi.permissions = meta.permissions().mode() & 0o777;
		fi.modified_by = self.short_id;
		Ok(Some(fi))
	}

	/// Whether the disk state `fi` matches the indexed record closely enough to skip hashing.
	fn unchanged(cur: &FileInfo, fi: &FileInfo) -> bool {
		if cur.is_deleted() || cur.is_invalid() || cur.file_type != fi.file_type {
			return false;
		}
		let same_mode = cur.no_permissions || cur.mode() == fi.mode();
		if fi.is_directory() {
			return same_mode;
		}
		if fi.is_symlink() {
			return cur.symlink_target == fi.symlink_target;
		}
		same_mode && cur.size == fi.size && cur.mod_time() == fi.mod_time()
	}

	/// Scan once. Returns the number of records changed in the index.
	pub fn scan(&self, fileset: &FileSet) -> Result<usize, SyncError> {
		let mut changed = Vec::new();
		let mut seen = HashSet::new();

		for entry in self.fs.walk()? {
			if self.skipped(&entry.name) {
				continue;
			}
			let mut fi = match self.describe(&entry.name, &entry.metadata)? {
				Some(fi) => fi,
				None => continue,
			};
			seen.insert(entry.name.clone());

			let current = fileset.get(&DeviceId::LOCAL, &entry.name)?;
			if let Some(cur) = &current {
				if Self::unchanged(cur, &fi) {
					continue;
				}
			}

			if fi.is_file() {
				match blocks::hash_file(&*self.fs, &fi.name, self.block_size) {
					Ok(b) => {
						fi.size = b.iter().map(|x| x.size as u64).sum();
						fi.blocks = b;
					}
					Err(BlockError::Read { source }) => {
						// Changed under us; the next scan will see it settled
						warn!("{}: skipping {}: {}", fileset.folder(), fi.name, source);
						seen.remove(&fi.name);
						continue;
					}
					Err(e) => return Err(e.into()),
				}
			}

			fi.version = match &current {
				Some(cur) => cur.version.update(self.short_id),
				None => Vector::new().update(self.short_id),
			};
			debug!("{}: scanned change in {}", fileset.folder(), fi.name);
			changed.push(fi);
		}

		let short_id = self.short_id;
		fileset.with_have(&DeviceId::LOCAL, |f| {
			if !f.is_deleted() && !seen.contains(&f.name) {
				let version = f.version.update(short_id);
				let mut gone = f.into_deleted().with_version(version);
				gone.modified_by = short_id;
				changed.push(gone);
			}
			true
		})?;

		let n = changed.len();
		if n > 0 {
			info!("{}: scan found {} changes", fileset.folder(), n);
		}
		fileset.update(&DeviceId::LOCAL, changed)?;
		Ok(n)
	}
}


// vim: ts=4
