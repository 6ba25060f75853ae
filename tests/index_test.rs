/// Index invariant tests
///
/// A long pseudo-random sequence of announcements from several devices is
/// applied to one folder index. After every step the version list, the need
/// set and the running counts must agree with each other.
///
/// Tests verify:
/// 1. Each device appears at most once per name, valid entries before invalid
/// 2. The global record is the head of the version list
/// 3. The need set matches the need predicate over the version list
/// 4. Counts equal a fresh recount, also after reopening without stored counts
/// 5. The global winner does not depend on arrival order
/// 6. A failed write leaves records and counts unchanged together
mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::device;
use peersync::blocks::blocks;
use peersync::index::keys::Keys;
use peersync::index::{need, Counts};
use peersync::error::StoreError;
use peersync::store::{Backend, Batch, RedbBackend};
use peersync::{DeviceId, FileInfo, FileSet, Vector};

const NAMES: [&str; 4] = ["a", "b", "dir/c", "dir/d"];

/// Small deterministic generator so failures are reproducible.
struct Lcg(u64);

impl Lcg {
	fn next(&mut self) -> u64 {
		self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
		self.0 >> 33
	}

	fn below(&mut self, n: u64) -> u64 {
		self.next() % n
	}
}

fn devices() -> Vec<DeviceId> {
	vec![DeviceId::LOCAL, device(1), device(2), device(3)]
}

fn random_record(rng: &mut Lcg, set: &FileSet, device: &DeviceId, name: &str) -> FileInfo {
	let base = match rng.below(3) {
		// Build on the current winner
		0 => set.get_global(name).unwrap().map(|g| g.version).unwrap_or_default(),
		// Build on what this device had
		1 => set.get(device, name).unwrap().map(|f| f.version).unwrap_or_default(),
		// Independent edit
		_ => Vector::new(),
	};
	let version = base.update(device.short());

	let content = format!("{}-{}", name, rng.next());
	let mut f = FileInfo::file(name, blocks(content.as_bytes(), 4).unwrap())
		.with_version(version)
		.with_modified(1_000 + rng.below(50) as i64, 0);
	if rng.below(6) == 0 {
		f = f.into_deleted();
	}
	if rng.below(8) == 0 {
		f.raw_invalid = true;
	}
	f
}

fn needed_names(set: &FileSet) -> Vec<String> {
	let mut names = Vec::new();
	set.with_need(|f| {
		names.push(f.name);
		true
	})
	.unwrap();
	names
}

fn recount(set: &FileSet) -> BTreeMap<DeviceId, Counts> {
	let mut out = BTreeMap::new();
	for d in devices() {
		let mut c = Counts::default();
		set.with_have(&d, |f| {
			c.add_file(&f);
			true
		})
		.unwrap();
		c.sequence = set.counts(&d).sequence;
		out.insert(d, c);
	}
	let mut global = Counts::default();
	set.with_global(|f| {
		global.add_file(&f);
		true
	})
	.unwrap();
	// The highest sequence ever seen is kept even after the record is superseded
	global.sequence = set.global_counts().sequence;
	out.insert(DeviceId::GLOBAL, global);
	out
}

fn check_invariants(set: &FileSet) {
	let mut expected_need = Vec::new();
	for name in NAMES {
		let list = match set.version_list(name).unwrap() {
			Some(l) => l,
			None => continue,
		};
		assert!(!list.is_empty(), "{}: empty list stored", name);

		for d in devices() {
			list.get(&d).unwrap();
		}

		let first_invalid = list.versions.iter().position(|v| v.invalid).unwrap_or(list.len());
		assert!(
			list.versions[first_invalid..].iter().all(|v| v.invalid),
			"{}: valid entry after an invalid one: {:?}",
			name,
			list
		);

		let head = list.global().unwrap();
		let global = set.get_global(name).unwrap().unwrap();
		let head_record = set.get(&head.device, name).unwrap().unwrap();
		assert_eq!(global.version, head_record.version);
		assert_eq!(global.version, head.version);

		let local = list.get(&DeviceId::LOCAL).unwrap();
		if need(head, local.is_some(), local.map(|l| &l.version)) {
			expected_need.push(name.to_string());
		}
	}
	assert_eq!(needed_names(set), expected_need);

	for (device, counts) in recount(set) {
		assert_eq!(set.counts(&device), counts, "counts of {} drifted", device);
	}
}

#[test]
fn test_random_updates_keep_index_consistent() {
	let set = FileSet::open("default", Arc::new(RedbBackend::in_memory().unwrap())).unwrap();
	let mut rng = Lcg(0x5eed);
	let devs = devices();

	for step in 0..300 {
		let device = devs[rng.below(devs.len() as u64) as usize];
		let name = NAMES[rng.below(NAMES.len() as u64) as usize];

		if device != DeviceId::LOCAL && rng.below(25) == 0 {
			set.drop_device(&device).unwrap();
		} else {
			let f = random_record(&mut rng, &set, &device, name);
			set.update(&device, vec![f.clone()]).unwrap();

			// Applying the same record again is a no-op
			let list = set.version_list(name).unwrap();
			let counts = set.global_counts();
			set.update(&device, vec![f]).unwrap();
			assert_eq!(set.version_list(name).unwrap(), list, "step {}", step);
			assert_eq!(set.global_counts(), counts, "step {}", step);
		}
		check_invariants(&set);
	}
}

#[test]
fn test_valid_entry_goes_before_invalid_ones() {
	let set = FileSet::open("default", Arc::new(RedbBackend::in_memory().unwrap())).unwrap();
	let high = Vector::new().update(device(1).short()).update(device(1).short());
	let mut bad = FileInfo::file("x", blocks(&b"zzzz"[..], 4).unwrap()).with_version(high);
	bad.raw_invalid = true;
	set.update(&device(1), vec![bad]).unwrap();

	let low = Vector::new().update(device(2).short());
	set.update(&device(2), vec![FileInfo::file("x", blocks(&b"ok"[..], 4).unwrap()).with_version(low)]).unwrap();

	let list = set.version_list("x").unwrap().unwrap();
	assert_eq!(list.versions[0].device, device(2));
	assert!(list.versions[1].invalid);
	assert_eq!(set.availability("x").unwrap(), vec![device(2)]);
	assert_eq!(needed_names(&set), vec!["x"]);
}

#[test]
fn test_global_winner_independent_of_arrival_order() {
	let records: Vec<(DeviceId, FileInfo)> = (1..=3u8)
		.map(|n| {
			let d = device(n);
			let f = FileInfo::file("f", blocks(format!("v{}", n).as_bytes(), 4).unwrap())
				.with_version(Vector::new().update(d.short()))
				.with_modified(1_000 + n as i64 * 7 % 5, 0);
			(d, f)
		})
		.collect();

	let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
	let mut winners = Vec::new();
	for order in orders {
		let set = FileSet::open("default", Arc::new(RedbBackend::in_memory().unwrap())).unwrap();
		for i in order {
			let (d, f) = &records[i];
			set.update(d, vec![f.clone()]).unwrap();
		}
		winners.push(set.version_list("f").unwrap().unwrap().versions[0].device);
	}
	assert!(winners.iter().all(|w| *w == winners[0]), "winners differ: {:?}", winners);
}

#[test]
fn test_counts_recalculated_when_missing() {
	let backend: Arc<dyn Backend> = Arc::new(RedbBackend::in_memory().unwrap());
	let mut rng = Lcg(42);
	let expected = {
		let set = FileSet::open("default", backend.clone()).unwrap();
		for _ in 0..40 {
			let device = devices()[rng.below(4) as usize];
			let name = NAMES[rng.below(NAMES.len() as u64) as usize];
			let f = random_record(&mut rng, &set, &device, name);
			set.update(&device, vec![f]).unwrap();
		}
		(Counts { sequence: 0, ..set.global_counts() }, set.local_counts())
	};

	backend.delete(&Keys::new("default").meta_counts()).unwrap();
	let set = FileSet::open("default", backend).unwrap();
	assert_eq!((Counts { sequence: 0, ..set.global_counts() }, set.local_counts()), expected);
	check_invariants(&set);
}

/// Store whose next batch write fails when armed.
struct FlakyBackend {
	inner: RedbBackend,
	fail_next: AtomicBool,
}

impl Backend for FlakyBackend {
	fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
		self.inner.get(key)
	}

	fn prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
		self.inner.prefix(prefix)
	}

	fn write_batch(&self, batch: Batch) -> Result<(), StoreError> {
		if self.fail_next.swap(false, Ordering::SeqCst) {
			return Err(StoreError::Backend { message: "disk full".to_string() });
		}
		self.inner.write_batch(batch)
	}
}

#[test]
fn test_failed_write_keeps_counts_with_records() {
	let backend = Arc::new(FlakyBackend { inner: RedbBackend::in_memory().unwrap(), fail_next: AtomicBool::new(false) });
	let set = FileSet::open("default", backend.clone()).unwrap();
	let v = Vector::new().update(device(1).short());
	set.update(&device(1), vec![FileInfo::file("a", blocks(&b"aaaa"[..], 4).unwrap()).with_version(v.clone())])
		.unwrap();

	backend.fail_next.store(true, Ordering::SeqCst);
	let b = FileInfo::file("b", blocks(&b"bbbb"[..], 4).unwrap()).with_version(v.clone());
	assert!(set.update(&device(1), vec![b.clone()]).is_err());
	assert_eq!(set.global_counts().files, 1);
	assert_eq!(set.counts(&device(1)).files, 1);

	// Reopening reads whatever reached the store
	let reopened = FileSet::open("default", backend.clone()).unwrap();
	assert!(reopened.version_list("b").unwrap().is_none());
	assert_eq!(reopened.global_counts().files, 1);
	check_invariants(&reopened);

	reopened.update(&device(1), vec![b]).unwrap();
	let reopened = FileSet::open("default", backend).unwrap();
	assert_eq!(reopened.global_counts().files, 2);
	assert_eq!(reopened.counts(&device(1)).files, 2);
	check_invariants(&reopened);
}

// vim: ts=4
