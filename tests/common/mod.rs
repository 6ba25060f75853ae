//! Shared helpers for integration tests: a block source serving other
//! devices' folders from disk and a local peer with its own index.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use peersync::config::VersioningConfig;
use peersync::fs::{BasicFilesystem, Filesystem};
use peersync::scanner::Scanner;
use peersync::store::RedbBackend;
use peersync::{BlockRequest, BlockSource, DeviceId, FetchError, FileInfo, FileSet, FolderConfig, Puller};

pub const FOLDER: &str = "default";
pub const BLOCK: usize = 4;

pub fn device(n: u8) -> DeviceId {
	DeviceId([n; 32])
}

/// Serves blocks straight from each remote device's folder on disk.
#[derive(Default)]
pub struct FolderSource {
	roots: Mutex<HashMap<DeviceId, PathBuf>>,
	requests: AtomicUsize,
	failing: AtomicBool,
	corrupt: Mutex<HashSet<DeviceId>>,
}

impl FolderSource {
	pub fn new() -> Self {
		FolderSource::default()
	}

	pub fn serve(&self, device: DeviceId, root: &Path) {
		self.roots.lock().unwrap().insert(device, root.to_path_buf());
	}

	pub fn requests(&self) -> usize {
		self.requests.load(Ordering::SeqCst)
	}

	/// Make every request fail as if the device went away.
	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	/// Make `device` answer with damaged data.
	pub fn corrupt(&self, device: DeviceId) {
		self.corrupt.lock().unwrap().insert(device);
	}
}

#[async_trait]
impl BlockSource for FolderSource {
	async fn request_block(&self, device: &DeviceId, req: BlockRequest<'_>) -> Result<Vec<u8>, FetchError> {
		self.requests.fetch_add(1, Ordering::SeqCst);
		if self.failing.load(Ordering::SeqCst) {
			return Err(FetchError::Disconnected);
		}
		let root = self.roots.lock().unwrap().get(device).cloned().ok_or(FetchError::Disconnected)?;
		let file = File::open(root.join(req.name)).map_err(|e| match e.kind() {
			io::ErrorKind::NotFound => FetchError::NoSuchFile,
			_ => FetchError::Remote { message: e.to_string() },
		})?;
		let mut buf = vec![0u8; req.size as usize];
		file.read_exact_at(&mut buf, req.offset).map_err(|e| FetchError::Remote { message: e.to_string() })?;
		if self.corrupt.lock().unwrap().contains(device) {
			if let Some(b) = buf.first_mut() {
				*b ^= 0xff;
			}
		}
		Ok(buf)
	}

	fn connected(&self, device: &DeviceId) -> bool {
		self.roots.lock().unwrap().contains_key(device)
	}
}

/// Scan `dir` as `device` would and return the records it announces.
pub fn announce(dir: &Path, device: DeviceId) -> Vec<FileInfo> {
	let set = FileSet::open(FOLDER, Arc::new(RedbBackend::in_memory().unwrap())).unwrap();
	let fs: Arc<dyn Filesystem> = Arc::new(BasicFilesystem::new(dir));
	Scanner::new(fs, device.short(), BLOCK).scan(&set).unwrap();
	let mut files = Vec::new();
	set.with_have(&DeviceId::LOCAL, |f| {
		files.push(f);
		true
	})
	.unwrap();
	files
}

/// The device under test: a folder, its index and a puller over both.
pub struct Peer {
	pub dir: TempDir,
	pub fileset: Arc<FileSet>,
	pub fs: Arc<dyn Filesystem>,
	pub id: DeviceId,
}

impl Peer {
	pub fn new(id: DeviceId) -> Self {
		let dir = TempDir::new().unwrap();
		let fileset = Arc::new(FileSet::open(FOLDER, Arc::new(RedbBackend::in_memory().unwrap())).unwrap());
		let fs: Arc<dyn Filesystem> = Arc::new(BasicFilesystem::new(dir.path()));
		Peer { dir, fileset, fs, id }
	}

	pub fn path(&self) -> &Path {
		self.dir.path()
	}

	pub fn write(&self, name: &str, content: &[u8]) {
		let path = self.dir.path().join(name);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).unwrap();
		}
		std::fs::write(path, content).unwrap();
	}

	pub fn read(&self, name: &str) -> Option<Vec<u8>> {
		std::fs::read(self.dir.path().join(name)).ok()
	}

	/// Record the folder contents in the local index. Returns the number of changes.
	pub fn scan(&self) -> usize {
		Scanner::new(self.fs.clone(), self.id.short(), BLOCK).scan(&self.fileset).unwrap()
	}

	pub fn config(&self) -> FolderConfig {
		let mut cfg = FolderConfig::new(FOLDER, self.dir.path());
		cfg.block_size = BLOCK;
		cfg.pullers = 4;
		cfg
	}

	pub fn puller(&self, source: Arc<FolderSource>) -> Arc<Puller> {
		self.puller_with(self.config(), source)
	}

	pub fn versioned_puller(&self, source: Arc<FolderSource>) -> Arc<Puller> {
		let mut cfg = self.config();
		cfg.versioning = Some(VersioningConfig { keep: 5 });
		self.puller_with(cfg, source)
	}

	pub fn puller_with(&self, cfg: FolderConfig, source: Arc<FolderSource>) -> Arc<Puller> {
		Arc::new(Puller::new(cfg, self.fileset.clone(), self.fs.clone(), source).unwrap())
	}

	pub fn needed(&self) -> Vec<String> {
		let mut names = Vec::new();
		self.fileset
			.with_need(|f| {
				names.push(f.name);
				true
			})
			.unwrap();
		names
	}
}

// vim: ts=4
