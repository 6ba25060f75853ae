//! Folder index
//!
//! A [`FileSet`] holds, for one folder, every device's announced records,
//! the per-name version lists that decide the global winner, the set of
//! names the local device needs, a block map of local content and running
//! counts. Each record update commits as one atomic transaction together
//! with its global, need and block map changes.
//!
//! Updates to the same name are serialized by a sharded lock; updates to
//! different names proceed in parallel.

pub mod blockmap;
pub mod counts;
pub mod keys;
pub mod need;
pub mod version_list;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{IndexError, SyncError};
use crate::logging::*;
use crate::store::{Backend, Transaction};
use crate::types::{DeviceId, FileInfo};

pub use blockmap::BlockFinder;
pub use counts::Counts;
pub use need::need;
pub use version_list::{FileLookup, FileVersion, VersionList};

use counts::{CountsDelta, MetadataTracker};
use keys::Keys;

const LOCK_SHARDS: usize = 64;

/// Per-name mutual exclusion over a fixed set of shards.
struct NameLocks {
	shards: Vec<Mutex<()>>,
}

impl NameLocks {
	fn new() -> Self {
		NameLocks { shards: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect() }
	}

	fn lock(&self, name: &str) -> MutexGuard<'_, ()> {
		let mut h = DefaultHasher::new();
		name.hash(&mut h);
		let shard = &self.shards[(h.finish() as usize) % LOCK_SHARDS];
		// The guarded data is (), a poisoned shard is still usable
		shard.lock().unwrap_or_else(|e| e.into_inner())
	}
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, IndexError> {
	serde_json::to_vec(value).map_err(|e| IndexError::Encode { message: e.to_string() })
}

fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, IndexError> {
	serde_json::from_slice(bytes).map_err(|e| IndexError::Corrupted { what, message: e.to_string() })
}

/// Reads device records through a pending transaction.
struct TxLookup<'t, 'a> {
	tx: &'t Transaction<'a>,
	keys: &'t Keys,
}

impl FileLookup for TxLookup<'_, '_> {
	fn lookup(&self, device: &DeviceId, name: &str) -> Result<Option<FileInfo>, IndexError> {
		match self.tx.get(&self.keys.device_file(device, name))? {
			Some(b) => Ok(Some(decode("file", &b)?)),
			None => Ok(None),
		}
	}
}

/// Index of one folder.
pub struct FileSet {
	folder: String,
	keys: Keys,
	backend: Arc<dyn Backend>,
	meta: MetadataTracker,
	locks: NameLocks,
}

impl FileSet {
	/// Open the index of `folder`, recounting if no counts were persisted.
	pub fn open(folder: &str, backend: Arc<dyn Backend>) -> Result<Self, SyncError> {
		if folder.is_empty() || folder.contains('\0') {
			return Err(SyncError::InvalidConfig { message: format!("invalid folder id {:?}", folder) });
		}
		let keys = Keys::new(folder);
		let meta = MetadataTracker::new(keys.meta_counts());
		let set = FileSet { folder: folder.to_string(), keys, backend, meta, locks: NameLocks::new() };

		if !set.meta.load(&*set.backend)? {
			set.recount()?;
		}
		Ok(set)
	}

	pub fn folder(&self) -> &str {
		&self.folder
	}

	fn read_file(&self, tx: &Transaction<'_>, device: &DeviceId, name: &str) -> Result<Option<FileInfo>, IndexError> {
		match tx.get(&self.keys.device_file(device, name))? {
			Some(b) => Ok(Some(decode("file", &b)?)),
			None => Ok(None),
		}
	}

	fn read_list(&self, tx: &Transaction<'_>, name: &str) -> Result<Option<VersionList>, IndexError> {
		match tx.get(&self.keys.global(name))? {
			Some(b) => Ok(Some(decode("version list", &b)?)),
			None => Ok(None),
		}
	}

	/// Record `files` as announced by `device`.
	pub fn update(&self, device: &DeviceId, files: Vec<FileInfo>) -> Result<(), IndexError> {
		for file in files {
			self.update_file(device, file)?;
		}
		Ok(())
	}

	/// Record `files` as the complete index of `device`; names not listed are withdrawn.
	pub fn replace(&self, device: &DeviceId, files: Vec<FileInfo>) -> Result<(), IndexError> {
		let incoming: BTreeSet<String> = files.iter().map(|f| f.name.clone()).collect();
		for (key, _) in self.backend.prefix(&self.keys.device_prefix(device))? {
			let (_, name) = self.keys.parse_device_file(&key)?;
			if !incoming.contains(&name) {
				self.remove_file(device, &name)?;
			}
		}
		self.update(device, files)
	}

	/// Withdraw every record of `device`.
	pub fn drop_device(&self, device: &DeviceId) -> Result<(), IndexError> {
		let entries = self.backend.prefix(&self.keys.device_prefix(device))?;
		info!("{}: dropping {} records of device {}", self.folder, entries.len(), device);
		for (key, _) in entries {
			let (_, name) = self.keys.parse_device_file(&key)?;
			self.remove_file(device, &name)?;
		}
		self.meta.reset(&*self.backend, device)
	}

	fn update_file(&self, device: &DeviceId, mut file: FileInfo) -> Result<(), IndexError> {
		let _guard = self.locks.lock(&file.name);
		let mut tx = Transaction::new(&*self.backend);
		let mut delta = CountsDelta::default();

		let existing = self.read_file(&tx, device, &file.name)?;
		if let Some(ef) = &existing {
			if ef.version == file.version
				&& ef.is_invalid() == file.is_invalid()
				&& ef.local_flags == file.local_flags
				&& ef.deleted == file.deleted
			{
				return Ok(());
			}
		}

		if *device == DeviceId::LOCAL {
			file.sequence = self.meta.next_local_sequence()?;
			if let Some(ef) = &existing {
				tx.delete(self.keys.sequence(ef.sequence));
				blockmap::remove_blocks(&mut tx, &self.keys, ef);
			}
			tx.put(self.keys.sequence(file.sequence), file.name.as_bytes().to_vec());
			blockmap::add_blocks(&mut tx, &self.keys, &file);
		}

		if let Some(ef) = &existing {
			delta.remove(device, ef);
		}
		delta.add(device, &file);
		tx.put(self.keys.device_file(device, &file.name), encode(&file)?);
		self.update_global(&mut tx, device, &file, existing.as_ref(), &mut delta)?;

		self.meta.commit(tx, delta)?;
		debug!("{}: {} updated {} to {}", self.folder, device, file.name, file.version);
		Ok(())
	}

	fn update_global(
		&self,
		tx: &mut Transaction<'_>,
		device: &DeviceId,
		file: &FileInfo,
		existing: Option<&FileInfo>,
		delta: &mut CountsDelta,
	) -> Result<(), IndexError> {
		let name = &file.name;
		let mut list = self.read_list(tx, name)?.unwrap_or_default();
		let outcome = {
			let lookup = TxLookup { tx: &*tx, keys: &self.keys };
			list.update(device, name, file, &lookup)?
		};

		self.update_local_need(tx, name, &list)?;

		let removed_at = outcome.removed.as_ref().map(|r| r.index);
		if removed_at == Some(0) || outcome.inserted_at == 0 {
			let global = if outcome.inserted_at == 0 {
				file.clone()
			} else {
				self.head_file(tx, name, &list)?
			};
			let old_global = if removed_at == Some(0) {
				existing.cloned()
			} else if list.len() > 1 {
				self.read_file(tx, &list.versions[1].device, name)?
			} else {
				None
			};
			if let Some(og) = old_global {
				delta.remove(&DeviceId::GLOBAL, &og);
			}
			delta.add(&DeviceId::GLOBAL, &global);
		}

		if outcome.global_changed {
			debug!("{}: global version of {} is now {}", self.folder, name, list.versions[0].version);
		}
		tx.put(self.keys.global(name), encode(&list)?);
		Ok(())
	}

	fn head_file(&self, tx: &Transaction<'_>, name: &str, list: &VersionList) -> Result<FileInfo, IndexError> {
		let head = list.global().ok_or_else(|| IndexError::Internal {
			message: format!("empty version list for {}", name),
		})?;
		self.read_file(tx, &head.device, name)?.ok_or_else(|| IndexError::Internal {
			message: format!("global entry of {} for {} has no record", name, head.device),
		})
	}

	fn update_local_need(&self, tx: &mut Transaction<'_>, name: &str, list: &VersionList) -> Result<(), IndexError> {
		let key = self.keys.need(name);
		let local = list.get(&DeviceId::LOCAL)?;
		let needed = match list.global() {
			Some(g) => need(g, local.is_some(), local.map(|l| &l.version)),
			None => false,
		};
		let has = tx.has(&key)?;
		if needed && !has {
			tx.put(key, Vec::new());
		} else if !needed && has {
			tx.delete(key);
		}
		Ok(())
	}

	fn remove_from_global(
		&self,
		tx: &mut Transaction<'_>,
		device: &DeviceId,
		name: &str,
		delta: &mut CountsDelta,
	) -> Result<(), IndexError> {
		let mut list = match self.read_list(tx, name)? {
			Some(l) => l,
			None => return Ok(()),
		};
		let removed = match list.pop(device) {
			Some(r) => r,
			None => return Ok(()),
		};

		if removed.index == 0 {
			if let Some(old) = self.read_file(tx, device, name)? {
				delta.remove(&DeviceId::GLOBAL, &old);
			}
		}

		if list.is_empty() {
			tx.delete(self.keys.need(name));
			tx.delete(self.keys.global(name));
			return Ok(());
		}

		if removed.index == 0 {
			let global = self.head_file(tx, name, &list)?;
			delta.add(&DeviceId::GLOBAL, &global);
		}
		self.update_local_need(tx, name, &list)?;
		tx.put(self.keys.global(name), encode(&list)?);
		Ok(())
	}

	fn remove_file(&self, device: &DeviceId, name: &str) -> Result<(), IndexError> {
		let _guard = self.locks.lock(name);
		let mut tx = Transaction::new(&*self.backend);
		let mut delta = CountsDelta::default();

		let file = match self.read_file(&tx, device, name)? {
			Some(f) => f,
			None => return Ok(()),
		};
		self.remove_from_global(&mut tx, device, name, &mut delta)?;
		if *device == DeviceId::LOCAL {
			tx.delete(self.keys.sequence(file.sequence));
			blockmap::remove_blocks(&mut tx, &self.keys, &file);
		}
		delta.remove(device, &file);
		tx.delete(self.keys.device_file(device, name));

		self.meta.commit(tx, delta)
	}

	fn recount(&self) -> Result<(), IndexError> {
		let mut fresh: BTreeMap<DeviceId, Counts> = BTreeMap::new();
		for (key, value) in self.backend.prefix(&self.keys.all_devices_prefix())? {
			let (device, _) = self.keys.parse_device_file(&key)?;
			let f: FileInfo = decode("file", &value)?;
			fresh.entry(device).or_default().add_file(&f);
		}
		let mut global = Counts::default();
		self.with_global(|f| {
			global.add_file(&f);
			true
		})?;
		if global != Counts::default() {
			fresh.insert(DeviceId::GLOBAL, global);
		}
		debug!("{}: recounted {} devices", self.folder, fresh.len());
		self.meta.replace(&*self.backend, fresh)
	}

	/// The record `device` announced for `name`.
	pub fn get(&self, device: &DeviceId, name: &str) -> Result<Option<FileInfo>, IndexError> {
		let tx = Transaction::new(&*self.backend);
		self.read_file(&tx, device, name)
	}

	/// The winning record for `name`.
	pub fn get_global(&self, name: &str) -> Result<Option<FileInfo>, IndexError> {
		let tx = Transaction::new(&*self.backend);
		match self.read_list(&tx, name)? {
			Some(list) => Ok(Some(self.head_file(&tx, name, &list)?)),
			None => Ok(None),
		}
	}

	pub fn version_list(&self, name: &str) -> Result<Option<VersionList>, IndexError> {
		let tx = Transaction::new(&*self.backend);
		self.read_list(&tx, name)
	}

	/// Remote devices holding a valid copy of the global version of `name`.
	pub fn availability(&self, name: &str) -> Result<Vec<DeviceId>, IndexError> {
		let list = match self.version_list(name)? {
			Some(l) => l,
			None => return Ok(Vec::new()),
		};
		let head = match list.global() {
			Some(h) => h.version.clone(),
			None => return Ok(Vec::new()),
		};
		Ok(list
			.versions
			.iter()
			.take_while(|v| v.version.equal(&head))
			.filter(|v| !v.invalid && v.device != DeviceId::LOCAL)
			.map(|v| v.device)
			.collect())
	}

	/// Call `f` with the global record of every needed name until it returns false.
	pub fn with_need<F: FnMut(FileInfo) -> bool>(&self, mut f: F) -> Result<(), IndexError> {
		for (key, _) in self.backend.prefix(&self.keys.need_prefix())? {
			let name = self.keys.parse_name(&key)?;
			// Withdrawn after the scan started
			let global = match self.get_global(&name)? {
				Some(g) => g,
				None => continue,
			};
			if !f(global) {
				break;
			}
		}
		Ok(())
	}

	/// Call `f` with every record of `device` until it returns false.
	pub fn with_have<F: FnMut(FileInfo) -> bool>(&self, device: &DeviceId, mut f: F) -> Result<(), IndexError> {
		for (_, value) in self.backend.prefix(&self.keys.device_prefix(device))? {
			if !f(decode("file", &value)?) {
				break;
			}
		}
		Ok(())
	}

	/// Call `f` with every global record until it returns false.
	pub fn with_global<F: FnMut(FileInfo) -> bool>(&self, mut f: F) -> Result<(), IndexError> {
		let tx = Transaction::new(&*self.backend);
		for (key, value) in self.backend.prefix(&self.keys.global_prefix())? {
			let name = self.keys.parse_name(&key)?;
			let list: VersionList = decode("version list", &value)?;
			if !f(self.head_file(&tx, &name, &list)?) {
				break;
			}
		}
		Ok(())
	}

	/// Call `f` with local records at or after sequence `start`, in sequence order.
	pub fn with_have_sequence<F: FnMut(FileInfo) -> bool>(&self, start: i64, mut f: F) -> Result<(), IndexError> {
		for (key, value) in self.backend.prefix(&self.keys.sequence_prefix())? {
			if self.keys.parse_sequence(&key)? < start {
				continue;
			}
			let name = String::from_utf8(value).map_err(|e| IndexError::Corrupted {
				what: "sequence",
				message: e.to_string(),
			})?;
			if let Some(file) = self.get(&DeviceId::LOCAL, &name)? {
				if !f(file) {
					break;
				}
			}
		}
		Ok(())
	}

	pub fn block_finder(&self) -> BlockFinder<'_> {
		BlockFinder::new(&*self.backend, &self.keys)
	}

	pub fn counts(&self, device: &DeviceId) -> Counts {
		self.meta.counts(device)
	}

	pub fn local_counts(&self) -> Counts {
		self.meta.counts(&DeviceId::LOCAL)
	}

	pub fn global_counts(&self) -> Counts {
		self.meta.counts(&DeviceId::GLOBAL)
	}

	/// Counts over the currently needed records.
	pub fn need_counts(&self) -> Result<Counts, IndexError> {
		let mut c = Counts::default();
		self.with_need(|f| {
			c.add_file(&f);
			true
		})?;
		Ok(c)
	}

	pub fn sequence(&self, device: &DeviceId) -> i64 {
		self.meta.sequence(device)
	}

	/// Changes whenever any remote device's index changes.
	pub fn remote_sequence(&self) -> i64 {
		self.meta.remote_sequence()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::blocks;
	use crate::store::RedbBackend;
	use crate::types::ShortId;
	use crate::version::Vector;

	fn dev(n: u8) -> DeviceId {
		let mut b = [0u8; 32];
		b[7] = n;
		DeviceId(b)
	}

	fn fileset() -> FileSet {
		FileSet::open("default", Arc::new(RedbBackend::in_memory().unwrap())).unwrap()
	}

	fn file(name: &str, content: &[u8], version: Vector) -> FileInfo {
		FileInfo::file(name, blocks::blocks(content, 4).unwrap()).with_version(version)
	}

	fn needed(fs: &FileSet) -> Vec<String> {
		let mut names = Vec::new();
		fs.with_need(|f| {
			names.push(f.name);
			true
		})
		.unwrap();
		names
	}

	#[test]
	fn test_remote_file_is_needed_until_local_catches_up() {
		let fs = fileset();
		let v = Vector::new().update(ShortId(1));
		let remote = file("report.txt", b"hello world", v);
		fs.update(&dev(1), vec![remote.clone()]).unwrap();

		assert_eq!(needed(&fs), vec!["report.txt"]);
		assert_eq!(fs.availability("report.txt").unwrap(), vec![dev(1)]);
		assert_eq!(fs.need_counts().unwrap().files, 1);

		fs.update(&DeviceId::LOCAL, vec![remote]).unwrap();
		assert!(needed(&fs).is_empty());
		assert_eq!(fs.local_counts().files, 1);
		assert_eq!(fs.global_counts().files, 1);
		assert_eq!(fs.version_list("report.txt").unwrap().unwrap().len(), 2);
	}

	#[test]
	fn test_local_sequence_and_block_map() {
		let fs = fileset();
		let v = Vector::new().update(ShortId(9));
		fs.update(&DeviceId::LOCAL, vec![file("a", b"aaaabbbb", v.clone())]).unwrap();
		let a = fs.get(&DeviceId::LOCAL, "a").unwrap().unwrap();
		assert_eq!(a.sequence, 1);

		let hash = a.blocks[1].hash;
		let mut found = Vec::new();
		fs.block_finder()
			.iterate(&hash, |name, offset| {
				found.push((name.to_string(), offset));
				false
			})
			.unwrap();
		assert_eq!(found, vec![("a".to_string(), 4)]);

		// Replacing the content drops the old blocks
		fs.update(&DeviceId::LOCAL, vec![file("a", b"cccc", v.update(ShortId(9)))]).unwrap();
		assert!(!fs.block_finder().contains(&hash).unwrap());
		assert_eq!(fs.get(&DeviceId::LOCAL, "a").unwrap().unwrap().sequence, 2);

		let mut seqs = Vec::new();
		fs.with_have_sequence(0, |f| {
			seqs.push(f.sequence);
			true
		})
		.unwrap();
		assert_eq!(seqs, vec![2]);
	}

	#[test]
	fn test_reapplying_update_changes_nothing() {
		let fs = fileset();
		let v = Vector::new().update(ShortId(1));
		let f = file("x", b"data", v);
		fs.update(&dev(1), vec![f.clone()]).unwrap();
		let list = fs.version_list("x").unwrap();
		let counts = fs.global_counts();
		fs.update(&dev(1), vec![f]).unwrap();
		assert_eq!(fs.version_list("x").unwrap(), list);
		assert_eq!(fs.global_counts(), counts);
		assert_eq!(needed(&fs), vec!["x"]);
	}

	#[test]
	fn test_deleted_global_not_needed_without_local_copy() {
		let fs = fileset();
		let v = Vector::new().update(ShortId(1));
		let gone = file("old", b"", v).into_deleted();
		fs.update(&dev(1), vec![gone]).unwrap();
		assert!(needed(&fs).is_empty());
		assert_eq!(fs.global_counts().deleted, 1);
	}

	#[test]
	fn test_invalid_remote_never_needed() {
		let fs = fileset();
		let mut f = file("bad", b"zz", Vector::new().update(ShortId(1)));
		f.raw_invalid = true;
		fs.update(&dev(1), vec![f]).unwrap();
		assert!(needed(&fs).is_empty());
		assert!(fs.availability("bad").unwrap().is_empty());
	}

	#[test]
	fn test_drop_device_restores_previous_global() {
		let fs = fileset();
		let v1 = Vector::new().update(ShortId(1));
		let v2 = v1.update(ShortId(2));
		fs.update(&DeviceId::LOCAL, vec![file("f", b"one", v1)]).unwrap();
		fs.update(&dev(2), vec![file("f", b"two!", v2)]).unwrap();
		assert_eq!(needed(&fs), vec!["f"]);
		assert_eq!(fs.global_counts().bytes, 4);

		fs.drop_device(&dev(2)).unwrap();
		assert!(needed(&fs).is_empty());
		assert_eq!(fs.get_global("f").unwrap().unwrap().size, 3);
		assert_eq!(fs.global_counts().bytes, 3);
		assert_eq!(fs.counts(&dev(2)), Counts::default());
	}

	#[test]
	fn test_replace_withdraws_missing_names() {
		let fs = fileset();
		let v = Vector::new().update(ShortId(1));
		fs.update(&dev(1), vec![file("a", b"a", v.clone()), file("b", b"b", v.clone())]).unwrap();
		fs.replace(&dev(1), vec![file("b", b"b", v)]).unwrap();
		assert!(fs.get(&dev(1), "a").unwrap().is_none());
		assert!(fs.version_list("a").unwrap().is_none());
		assert_eq!(needed(&fs), vec!["b"]);
		assert_eq!(fs.global_counts().files, 1);
	}

	#[test]
	fn test_counts_survive_reopen() {
		let backend: Arc<dyn Backend> = Arc::new(RedbBackend::in_memory().unwrap());
		let v = Vector::new().update(ShortId(1));
		{
			let fs = FileSet::open("f", backend.clone()).unwrap();
			let mut f = file("a", b"abc", v);
			f.sequence = 42;
			fs.update(&dev(1), vec![f]).unwrap();
		}
		let fs = FileSet::open("f", backend).unwrap();
		assert_eq!(fs.global_counts().files, 1);
		assert_eq!(fs.remote_sequence(), 42);
	}

	#[test]
	fn test_rejects_bad_folder_id() {
		let backend: Arc<dyn Backend> = Arc::new(RedbBackend::in_memory().unwrap());
		assert!(FileSet::open("", backend.clone()).is_err());
		assert!(FileSet::open("a\0b", backend).is_err());
	}
}

// vim: ts=4
