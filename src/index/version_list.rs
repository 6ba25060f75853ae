//! Ordered per-name list of every device's version
//!
//! Index 0 is the global winner. Valid entries come before invalid ones.
//! Among valid entries an entry never precedes one that strictly dominates
//! it, and concurrent entries are ordered by [`wins_conflict`].

use serde::{Deserialize, Serialize};

use crate::conflict::wins_conflict;
use crate::error::IndexError;
use crate::index::need::Versioned;
use crate::types::{DeviceId, FileInfo};
use crate::version::{Ordering, Vector};

/// One device's entry for a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
	pub device: DeviceId,
	pub version: Vector,
	#[serde(default)]
	pub invalid: bool,
	#[serde(default)]
	pub deleted: bool,
}

impl FileVersion {
	pub fn new(device: DeviceId, file: &FileInfo) -> Self {
		FileVersion {
			device,
			version: file.version.clone(),
			invalid: file.is_invalid(),
			deleted: file.is_deleted(),
		}
	}
}

impl Versioned for FileVersion {
	fn is_invalid(&self) -> bool {
		self.invalid
	}

	fn is_deleted(&self) -> bool {
		self.deleted
	}

	fn version(&self) -> &Vector {
		&self.version
	}
}

/// Looks up the full record a device announced, used to break concurrent ties.
pub trait FileLookup {
	fn lookup(&self, device: &DeviceId, name: &str) -> Result<Option<FileInfo>, IndexError>;
}

/// Result of removing a device's entry.
#[derive(Debug, Clone)]
pub struct Removed {
	pub entry: FileVersion,
	pub index: usize,
	/// The winner changed because of the removal.
	pub global_changed: bool,
}

/// Result of [`VersionList::update`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
	pub removed: Option<Removed>,
	pub inserted_at: usize,
	pub global_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionList {
	pub versions: Vec<FileVersion>,
}

impl VersionList {
	pub fn is_empty(&self) -> bool {
		self.versions.is_empty()
	}

	pub fn len(&self) -> usize {
		self.versions.len()
	}

	pub fn global(&self) -> Option<&FileVersion> {
		self.versions.first()
	}

	/// The entry of `device`. More than one entry is an invariant violation.
	pub fn get(&self, device: &DeviceId) -> Result<Option<&FileVersion>, IndexError> {
		let mut found = self.versions.iter().filter(|v| v.device == *device);
		let first = found.next();
		if first.is_some() && found.next().is_some() {
			return Err(IndexError::Internal {
				message: format!("device {} listed more than once", device),
			});
		}
		Ok(first)
	}

	/// Remove `device`'s entry, if any.
	pub fn pop(&mut self, device: &DeviceId) -> Option<Removed> {
		let index = self.versions.iter().position(|v| v.device == *device)?;
		let entry = self.versions.remove(index);
		let global_changed = index == 0
			&& match self.versions.first() {
				None => true,
				Some(next) => next.invalid != entry.invalid || !next.version.equal(&entry.version),
			};
		Some(Removed { entry, index, global_changed })
	}

	/// Replace `device`'s entry with one describing `file`.
	pub fn update(
		&mut self,
		device: &DeviceId,
		name: &str,
		file: &FileInfo,
		lookup: &dyn FileLookup,
	) -> Result<UpdateOutcome, IndexError> {
		let old_global = self.versions.first().cloned();
		let removed = self.pop(device);
		let inserted_at = self.insert(device, name, file, lookup)?;

		let global_changed = match (&old_global, self.versions.first()) {
			(Some(old), Some(new)) => old.invalid != new.invalid || !old.version.equal(&new.version),
			_ => true,
		};
		Ok(UpdateOutcome { removed, inserted_at, global_changed })
	}

	fn insert(
		&mut self,
		device: &DeviceId,
		name: &str,
		file: &FileInfo,
		lookup: &dyn FileLookup,
	) -> Result<usize, IndexError> {
		let invalid = file.is_invalid();
		let mut i = if invalid {
			self.versions.iter().position(|v| v.invalid).unwrap_or(self.versions.len())
		} else {
			0
		};

		while i < self.versions.len() {
			if self.should_insert_before(i, name, file, invalid, lookup)? {
				break;
			}
			i += 1;
		}

		self.versions.insert(i, FileVersion::new(*device, file));
		Ok(i)
	}

	fn should_insert_before(
		&self,
		i: usize,
		name: &str,
		file: &FileInfo,
		invalid: bool,
		lookup: &dyn FileLookup,
	) -> Result<bool, IndexError> {
		let existing = &self.versions[i];
		if !invalid && existing.invalid {
			return Ok(true);
		}

		match existing.version.compare(&file.version) {
			Ordering::Equal | Ordering::Lesser => Ok(true),
			Ordering::Greater => Ok(false),
			Ordering::ConcurrentLesser | Ordering::ConcurrentGreater => {
				match lookup.lookup(&existing.device, name)? {
					// A vanished record cannot win
					None => Ok(true),
					Some(other) => Ok(wins_conflict(file, &other)),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ShortId;
	use std::collections::HashMap;

	#[derive(Default)]
	struct MapLookup {
		files: HashMap<DeviceId, FileInfo>,
	}

	impl FileLookup for MapLookup {
		fn lookup(&self, device: &DeviceId, _name: &str) -> Result<Option<FileInfo>, IndexError> {
			Ok(self.files.get(device).cloned())
		}
	}

	fn dev(n: u8) -> DeviceId {
		let mut b = [0u8; 32];
		b[7] = n;
		DeviceId(b)
	}

	fn file(version: Vector) -> FileInfo {
		FileInfo::file("f", Vec::new()).with_version(version)
	}

	fn apply(list: &mut VersionList, lookup: &mut MapLookup, device: DeviceId, f: FileInfo) -> UpdateOutcome {
		let outcome = list.update(&device, "f", &f, &*lookup).unwrap();
		lookup.files.insert(device, f);
		outcome
	}

	#[test]
	fn test_newer_version_becomes_global() {
		let mut list = VersionList::default();
		let mut lookup = MapLookup::default();
		let v1 = Vector::new().update(ShortId(1));
		let v2 = v1.update(ShortId(1));

		let o = apply(&mut list, &mut lookup, dev(1), file(v1.clone()));
		assert!(o.global_changed);
		let o = apply(&mut list, &mut lookup, dev(2), file(v2.clone()));
		assert_eq!(o.inserted_at, 0);
		assert!(o.global_changed);
		assert_eq!(list.global().unwrap().device, dev(2));

		// Catching up to the same version does not change the winner
		let o = apply(&mut list, &mut lookup, dev(1), file(v2));
		assert!(!o.global_changed);
		assert_eq!(list.len(), 2);
	}

	#[test]
	fn test_older_version_goes_after() {
		let mut list = VersionList::default();
		let mut lookup = MapLookup::default();
		let v1 = Vector::new().update(ShortId(1));
		let v2 = v1.update(ShortId(1));
		apply(&mut list, &mut lookup, dev(1), file(v2));
		let o = apply(&mut list, &mut lookup, dev(2), file(v1));
		assert_eq!(o.inserted_at, 1);
		assert!(!o.global_changed);
	}

	#[test]
	fn test_invalid_entries_sort_last() {
		let mut list = VersionList::default();
		let mut lookup = MapLookup::default();
		let v1 = Vector::new().update(ShortId(1));
		let v5 = v1.update(ShortId(1)).update(ShortId(1)).update(ShortId(1));

		let mut bad = file(v5);
		bad.raw_invalid = true;
		apply(&mut list, &mut lookup, dev(1), bad);
		let o = apply(&mut list, &mut lookup, dev(2), file(v1));
		assert_eq!(o.inserted_at, 0);
		assert!(!list.versions[0].invalid);
		assert!(list.versions[1].invalid);
	}

	#[test]
	fn test_concurrent_uses_conflict_resolution() {
		let mut list = VersionList::default();
		let mut lookup = MapLookup::default();
		let base = Vector::new().update(ShortId(1));
		let older = file(base.update(ShortId(1))).with_modified(100, 0);
		let newer = file(base.update(ShortId(2))).with_modified(200, 0);

		apply(&mut list, &mut lookup, dev(1), older.clone());
		apply(&mut list, &mut lookup, dev(2), newer.clone());
		assert_eq!(list.global().unwrap().device, dev(2));

		// Same result in the other arrival order
		let mut list2 = VersionList::default();
		let mut lookup2 = MapLookup::default();
		apply(&mut list2, &mut lookup2, dev(2), newer);
		apply(&mut list2, &mut lookup2, dev(1), older);
		assert_eq!(list2.global().unwrap().device, dev(2));
	}

	#[test]
	fn test_pop_reports_global_change() {
		let mut list = VersionList::default();
		let mut lookup = MapLookup::default();
		let v1 = Vector::new().update(ShortId(1));
		let v2 = v1.update(ShortId(1));
		apply(&mut list, &mut lookup, dev(1), file(v2.clone()));
		apply(&mut list, &mut lookup, dev(2), file(v2));
		apply(&mut list, &mut lookup, dev(3), file(v1));

		let head = list.global().unwrap().device;
		let removed = list.pop(&head).unwrap();
		assert_eq!(removed.index, 0);
		assert!(!removed.global_changed);

		let head = list.global().unwrap().device;
		let removed = list.pop(&head).unwrap();
		assert!(removed.global_changed);

		assert!(list.pop(&dev(9)).is_none());
	}

	#[test]
	fn test_duplicate_device_is_internal_error() {
		let v = Vector::new().update(ShortId(1));
		let entry = FileVersion { device: dev(1), version: v, invalid: false, deleted: false };
		let list = VersionList { versions: vec![entry.clone(), entry] };
		assert!(matches!(list.get(&dev(1)), Err(IndexError::Internal { .. })));
	}

	#[test]
	fn test_update_is_idempotent() {
		let mut list = VersionList::default();
		let mut lookup = MapLookup::default();
		let base = Vector::new().update(ShortId(1));
		apply(&mut list, &mut lookup, dev(1), file(base.update(ShortId(1))).with_modified(5, 0));
		apply(&mut list, &mut lookup, dev(2), file(base.update(ShortId(2))).with_modified(5, 0));
		apply(&mut list, &mut lookup, dev(3), file(base.clone()));

		let snapshot = list.clone();
		let again = lookup.files[&dev(2)].clone();
		let o = apply(&mut list, &mut lookup, dev(2), again);
		assert!(!o.global_changed);
		assert_eq!(list, snapshot);
	}
}

// vim: ts=4
