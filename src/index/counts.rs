//! Per-device file counts and sequence tracking

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::IndexError;
use crate::store::{Backend, Transaction};
use crate::types::{DeviceId, FileInfo};

/// Aggregate statistics for one device (or the global view).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
	pub files: u64,
	pub directories: u64,
	pub symlinks: u64,
	pub deleted: u64,
	pub bytes: u64,
	/// Highest sequence number seen from the device
	pub sequence: i64,
}

impl Counts {
	pub fn add_file(&mut self, f: &FileInfo) {
		self.apply(f, 1);
	}

	pub fn remove_file(&mut self, f: &FileInfo) {
		self.apply(f, -1);
	}

	fn apply(&mut self, f: &FileInfo, sign: i64) {
		let mut d = Delta::default();
		d.account(f, sign);
		d.apply_to(self);
	}

	pub fn total_items(&self) -> u64 {
		self.files + self.directories + self.symlinks + self.deleted
	}
}

#[derive(Debug, Clone, Copy, Default)]
struct Delta {
	files: i64,
	directories: i64,
	symlinks: i64,
	deleted: i64,
	bytes: i64,
	sequence: i64,
}

impl Delta {
	fn account(&mut self, f: &FileInfo, sign: i64) {
		if f.is_deleted() {
			self.deleted += sign;
		} else if f.is_directory() {
			self.directories += sign;
		} else if f.is_symlink() {
			self.symlinks += sign;
		} else {
			self.files += sign;
		}
		self.bytes += sign * f.file_size() as i64;
		if sign > 0 && f.sequence > self.sequence {
			self.sequence = f.sequence;
		}
	}

	fn apply_to(&self, c: &mut Counts) {
		fn add(v: u64, d: i64) -> u64 {
			(v as i64 + d).max(0) as u64
		}
		c.files = add(c.files, self.files);
		c.directories = add(c.directories, self.directories);
		c.symlinks = add(c.symlinks, self.symlinks);
		c.deleted = add(c.deleted, self.deleted);
		c.bytes = add(c.bytes, self.bytes);
		if self.sequence > c.sequence {
			c.sequence = self.sequence;
		}
	}
}

/// Count changes accumulated while a transaction is built.
#[derive(Debug, Default)]
pub struct CountsDelta {
	changes: BTreeMap<DeviceId, Delta>,
}

impl CountsDelta {
	pub fn add(&mut self, device: &DeviceId, f: &FileInfo) {
		self.changes.entry(*device).or_default().account(f, 1);
	}

	pub fn remove(&mut self, device: &DeviceId, f: &FileInfo) {
		self.changes.entry(*device).or_default().account(f, -1);
	}

}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	devices: Vec<(DeviceId, Counts)>,
}

/// Thread-safe counts for every device of a folder, persisted on change.
pub struct MetadataTracker {
	key: Vec<u8>,
	counts: Mutex<BTreeMap<DeviceId, Counts>>,
}

impl MetadataTracker {
	pub fn new(key: Vec<u8>) -> Self {
		MetadataTracker { key, counts: Mutex::new(BTreeMap::new()) }
	}

	/// Load persisted counts. Returns false when none were stored.
	pub fn load(&self, backend: &dyn Backend) -> Result<bool, IndexError> {
		let bytes = match backend.get(&self.key)? {
			Some(b) => b,
			None => return Ok(false),
		};
		let snapshot: Snapshot = serde_json::from_slice(&bytes)
			.map_err(|e| IndexError::Corrupted { what: "counts", message: e.to_string() })?;
		let mut counts = self.lock()?;
		*counts = snapshot.devices.into_iter().collect();
		Ok(true)
	}

	fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<DeviceId, Counts>>, IndexError> {
		self.counts
			.lock()
			.map_err(|_| IndexError::Internal { message: "counts lock poisoned".to_string() })
	}

	fn snapshot(&self, counts: &BTreeMap<DeviceId, Counts>) -> Result<Vec<u8>, IndexError> {
		let snapshot = Snapshot { devices: counts.iter().map(|(d, c)| (*d, c.clone())).collect() };
		serde_json::to_vec(&snapshot).map_err(|e| IndexError::Encode { message: e.to_string() })
	}

	fn persist(&self, backend: &dyn Backend, counts: &BTreeMap<DeviceId, Counts>) -> Result<(), IndexError> {
		backend.put(&self.key, &self.snapshot(counts)?)?;
		Ok(())
	}

	/// Commit `tx` together with the counts it changes. The in-memory counts
	/// only move once the commit succeeded.
	pub fn commit(&self, mut tx: Transaction<'_>, delta: CountsDelta) -> Result<(), IndexError> {
		let mut counts = self.lock()?;
		let mut next = counts.clone();
		for (device, d) in delta.changes {
			d.apply_to(next.entry(device).or_default());
		}
		tx.put(self.key.clone(), self.snapshot(&next)?);
		tx.commit()?;
		*counts = next;
		Ok(())
	}

	/// Replace everything, used after a full recount.
	pub fn replace(&self, backend: &dyn Backend, fresh: BTreeMap<DeviceId, Counts>) -> Result<(), IndexError> {
		let mut counts = self.lock()?;
		*counts = fresh;
		self.persist(backend, &counts)
	}

	/// Forget a device entirely.
	pub fn reset(&self, backend: &dyn Backend, device: &DeviceId) -> Result<(), IndexError> {
		let mut counts = self.lock()?;
		counts.remove(device);
		self.persist(backend, &counts)
	}

	pub fn counts(&self, device: &DeviceId) -> Counts {
		match self.counts.lock() {
			Ok(c) => c.get(device).cloned().unwrap_or_default(),
			Err(_) => Counts::default(),
		}
	}

	pub fn sequence(&self, device: &DeviceId) -> i64 {
		self.counts(device).sequence
	}

	/// Reserve the next local sequence number.
	pub fn next_local_sequence(&self) -> Result<i64, IndexError> {
		let mut counts = self.lock()?;
		let c = counts.entry(DeviceId::LOCAL).or_default();
		c.sequence += 1;
		Ok(c.sequence)
	}

	/// Sum of all remote devices' sequences; moves whenever any remote index changes.
	pub fn remote_sequence(&self) -> i64 {
		match self.counts.lock() {
			Ok(c) => c
				.iter()
				.filter(|(d, _)| **d != DeviceId::LOCAL && **d != DeviceId::GLOBAL)
				.map(|(_, c)| c.sequence)
				.sum(),
			Err(_) => 0,
		}
	}
}


// vim: ts=4
