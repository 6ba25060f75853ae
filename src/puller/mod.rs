//! Folder puller
//!
//! The puller makes the local copy of a folder match the global state of the
//! index. Each round takes the currently needed records and
//!
//! 1. creates directories and symlinks,
//! 2. copies files whose whole content already exists locally,
//! 3. feeds every other changed file through the block pipeline
//!    (copiers, pullers, finishers, connected by bounded queues),
//! 4. once the pipeline has drained, removes deleted files and then deleted
//!    directories, deepest first.
//!
//! A file reaches the local index only after its content was verified and
//! moved into place. A failed file stays needed and is retried next round.

pub mod activity;
pub mod matcher;
pub mod schedule;
pub mod shared_state;
mod workers;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{mpsc, watch};

use crate::blocks;
use crate::config::FolderConfig;
use crate::error::{IndexError, PullError, SyncError};
use crate::fs::{in_writable_dir, Filesystem, TempNamer};
use crate::index::FileSet;
use crate::logging::*;
use crate::protocol::BlockSource;
use crate::scanner::Scanner;
use crate::summary::{FileFailure, FolderSummary};
use crate::types::{BlockInfo, DeviceId, FileInfo, ShortId};
use crate::versioner::{SimpleVersioner, Versioner};

use activity::DeviceActivity;
use matcher::{find_whole_file_copies, plan_file, FilePlan, NeedBatch};
use schedule::{Decision, FolderState, PullScheduler, RoundOutcome, Ticker, TokioTicker};
use shared_state::{Progress, SharedPullerState, StateArena, StateHandle};

const QUEUE_DEPTH: usize = 64;

type SharedRx<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// Run file work on the blocking pool so it does not stall the pipeline.
async fn blocking<T, F>(f: F) -> Result<T, PullError>
where
	F: FnOnce() -> Result<T, PullError> + Send + 'static,
	T: Send + 'static,
{
	match tokio::task::spawn_blocking(f).await {
		Ok(r) => r,
		Err(e) => Err(PullError::Index(IndexError::Internal { message: format!("file task failed: {}", e) })),
	}
}

/// Blocks of one file to copy from local sources.
struct CopyJob {
	handle: StateHandle,
	blocks: Vec<BlockInfo>,
}

/// One block to fetch from a device.
struct PullJob {
	handle: StateHandle,
	block: BlockInfo,
}

/// Bookkeeping of one pull round.
struct Round {
	arena: StateArena,
	succeeded: AtomicUsize,
	failures: Mutex<Vec<FileFailure>>,
	fatal: Mutex<Option<IndexError>>,
	blocks: Mutex<Progress>,
}

impl Round {
	fn new() -> Self {
		Round {
			arena: StateArena::new(),
			succeeded: AtomicUsize::new(0),
			failures: Mutex::new(Vec::new()),
			fatal: Mutex::new(None),
			blocks: Mutex::new(Progress::default()),
		}
	}

	fn record(&self, folder: &str, name: &str, result: Result<(), PullError>) {
		let err = match result {
			Ok(()) => {
				debug!("{}: {} is in sync", folder, name);
				self.succeeded.fetch_add(1, Ordering::Relaxed);
				return;
			}
			Err(e) => e,
		};

		let failure = FileFailure { name: name.to_string(), stage: err.stage(), error: err.to_string() };
		let err = SyncError::Pull { name: name.to_string(), source: err };
		warn!("{}: {}", folder, err);
		self.failures.lock().unwrap_or_else(|e| e.into_inner()).push(failure);
		if let SyncError::Pull { source: PullError::Index(e), .. } = err {
			let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
			if fatal.is_none() {
				*fatal = Some(e);
			}
		}
	}

	fn take_fatal(&self) -> Option<IndexError> {
		self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
	}

	fn take_failures(&self) -> Vec<FileFailure> {
		std::mem::take(&mut *self.failures.lock().unwrap_or_else(|e| e.into_inner()))
	}

	fn add_blocks(&self, progress: &Progress) {
		self.blocks.lock().unwrap_or_else(|e| e.into_inner()).add(progress);
	}

	fn blocks(&self) -> Progress {
		*self.blocks.lock().unwrap_or_else(|e| e.into_inner())
	}
}

#[derive(Debug)]
struct Status {
	state: FolderState,
	failures: Vec<FileFailure>,
	blocks: Progress,
}

/// Keeps one folder in sync with the global state of its index.
pub struct Puller {
	cfg: FolderConfig,
	fileset: Arc<FileSet>,
	fs: Arc<dyn Filesystem>,
	source: Arc<dyn BlockSource>,
	versioner: Option<Arc<dyn Versioner>>,
	scanner: Option<Scanner>,
	ticker: Arc<dyn Ticker>,
	activity: Arc<DeviceActivity>,
	namer: TempNamer,
	status: Mutex<Status>,
}

impl Puller {
	pub fn new(
		cfg: FolderConfig,
		fileset: Arc<FileSet>,
		fs: Arc<dyn Filesystem>,
		source: Arc<dyn BlockSource>,
	) -> Result<Self, SyncError> {
		cfg.validate()?;
		let versioner: Option<Arc<dyn Versioner>> = match &cfg.versioning {
			Some(v) => Some(Arc::new(SimpleVersioner::new(v.keep))),
			None => None,
		};
		Ok(Puller {
			cfg,
			fileset,
			fs,
			source,
			versioner,
			scanner: None,
			ticker: Arc::new(TokioTicker),
			activity: Arc::new(DeviceActivity::new()),
			namer: TempNamer::default(),
			status: Mutex::new(Status {
				state: FolderState::Idle,
				failures: Vec::new(),
				blocks: Progress::default(),
			}),
		})
	}

	pub fn with_versioner(mut self, versioner: Arc<dyn Versioner>) -> Self {
		self.versioner = Some(versioner);
		self
	}

	/// Rescan the folder as `local` before pulling.
	pub fn with_scanner(mut self, local: ShortId) -> Self {
		self.scanner = Some(Scanner::new(self.fs.clone(), local, self.cfg.block_size));
		self
	}

	pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
		self.ticker = ticker;
		self
	}

	pub fn folder(&self) -> &str {
		&self.cfg.id
	}

	pub fn fileset(&self) -> &Arc<FileSet> {
		&self.fileset
	}

	fn set_state(&self, state: FolderState) {
		let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
		if status.state != state {
			debug!("{}: {} -> {}", self.cfg.id, status.state, state);
			status.state = state;
		}
	}

	pub fn state(&self) -> FolderState {
		self.status.lock().unwrap_or_else(|e| e.into_inner()).state.clone()
	}

	/// Failures of the last round that had any work.
	pub fn failures(&self) -> Vec<FileFailure> {
		self.status.lock().unwrap_or_else(|e| e.into_inner()).failures.clone()
	}

	pub fn summary(&self) -> Result<FolderSummary, SyncError> {
		let blocks = self.status.lock().unwrap_or_else(|e| e.into_inner()).blocks;
		Ok(FolderSummary {
			folder: self.cfg.id.clone(),
			state: self.state(),
			failures: self.failures(),
			blocks,
			global: self.fileset.global_counts(),
			local: self.fileset.local_counts(),
			need: self.fileset.need_counts()?,
			sequence: self.fileset.sequence(&DeviceId::LOCAL),
		})
	}

	/// Run until `stop` turns true. Returns an error only when the folder
	/// had to stop because of a fatal error.
	pub async fn serve(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> Result<(), SyncError> {
		info!("{}: starting puller for {}", self.cfg.id, self.fs.root().display());
		self.clean_temporaries();

		let mut scheduler = PullScheduler::new(&self.cfg);
		let mut last_scan: Option<Instant> = None;
		let mut delay = Duration::ZERO;

		loop {
			if *stop.borrow() {
				break;
			}
			let sender_gone = tokio::select! {
				changed = stop.changed() => changed.is_err(),
				_ = self.ticker.sleep(delay) => false,
			};
			if sender_gone || *stop.borrow() {
				break;
			}

			let scan_due = self.scanner.is_some()
				&& match (last_scan, self.cfg.scan_interval()) {
					(None, _) => true,
					(Some(t), Some(interval)) => t.elapsed() >= interval,
					(Some(_), None) => false,
				};
			if scan_due {
				last_scan = Some(Instant::now());
				let me = Arc::clone(&self);
				let scanned = tokio::task::spawn_blocking(move || me.scan())
					.await
					.unwrap_or_else(|e| Err(SyncError::Internal { message: format!("scan task failed: {}", e) }));
				match scanned {
					Ok(0) => {}
					Ok(_) => scheduler.invalidate(),
					Err(e) if e.is_fatal() => {
						error!("{}: stopping: {}", self.cfg.id, e);
						self.set_state(FolderState::Error(e.to_string()));
						return Err(e);
					}
					Err(e) => {
						warn!("{}: scan failed: {}", self.cfg.id, e);
						self.set_state(FolderState::Error(e.to_string()));
						delay = self.cfg.pause_interval();
						continue;
					}
				}
			}

			delay = self.pull_until_settled(&mut scheduler, &stop).await?;
		}

		info!("{}: puller stopped", self.cfg.id);
		Ok(())
	}

	fn scan(&self) -> Result<usize, SyncError> {
		match &self.scanner {
			Some(scanner) => {
				self.set_state(FolderState::Scanning);
				let n = scanner.scan(&self.fileset)?;
				self.set_state(FolderState::Idle);
				Ok(n)
			}
			None => Ok(0),
		}
	}

	/// Run rounds while they make progress. Returns how long to wait before
	/// checking again: the pull interval after a round without progress, the
	/// pause interval once the folder pauses.
	async fn pull_until_settled(
		self: &Arc<Self>,
		scheduler: &mut PullScheduler,
		stop: &watch::Receiver<bool>,
	) -> Result<Duration, SyncError> {
		if !scheduler.should_pull(self.fileset.remote_sequence()) {
			return Ok(scheduler.check_interval());
		}

		self.set_state(FolderState::Syncing);
		loop {
			let outcome = match self.pull_iteration().await {
				Ok(o) => o,
				Err(e) => {
					error!("{}: stopping: {}", self.cfg.id, e);
					self.set_state(FolderState::Error(e.to_string()));
					return Err(e);
				}
			};

			match scheduler.round_finished(outcome, self.fileset.remote_sequence()) {
				Decision::Again => {
					if *stop.borrow() {
						return Ok(Duration::ZERO);
					}
				}
				Decision::Settled(d) => {
					self.set_state(FolderState::Idle);
					return Ok(d);
				}
				Decision::Retry(d) => {
					debug!("{}: round made no progress, retrying in {:?}", self.cfg.id, d);
					return Ok(d);
				}
				Decision::Pause(d) => {
					warn!(
						"{}: pausing for {:?} after {} rounds without progress",
						self.cfg.id, d, self.cfg.max_no_progress_rounds
					);
					self.set_state(FolderState::Paused);
					return Ok(d);
				}
			}
		}
	}

	/// Remove temporary files older than the retention window.
	fn clean_temporaries(&self) {
		let entries = match self.fs.walk() {
			Ok(e) => e,
			Err(e) => {
				warn!("{}: cannot look for temporary files: {}", self.cfg.id, e);
				return;
			}
		};
		let keep = self.cfg.keep_temporaries();
		let now = SystemTime::now();
		for entry in entries {
			if !entry.metadata.is_file() || !self.namer.is_temporary(&entry.name) {
				continue;
			}
			let age = entry
				.metadata
				.modified()
				.ok()
				.and_then(|m| now.duration_since(m).ok())
				.unwrap_or_default();
			if age > keep {
				match self.fs.remove(&entry.name) {
					Ok(()) => info!("{}: removed stale temporary {}", self.cfg.id, entry.name),
					Err(e) => warn!("{}: cannot remove {}: {}", self.cfg.id, entry.name, e),
				}
			}
		}
	}

	/// Devices that can serve the global version of `name` right now.
	fn available_devices(&self, name: &str) -> Result<Vec<DeviceId>, IndexError> {
		Ok(self.fileset.availability(name)?.into_iter().filter(|d| self.source.connected(d)).collect())
	}

	/// One pull round.
	pub async fn pull_iteration(self: &Arc<Self>) -> Result<RoundOutcome, SyncError> {
		let mut needed = Vec::new();
		self.fileset.with_need(|f| {
			needed.push(f);
			true
		})?;
		let mut batch = NeedBatch::from_needed(needed);
		if batch.is_empty() {
			self.status.lock().unwrap_or_else(|e| e.into_inner()).failures.clear();
			return Ok(RoundOutcome::default());
		}
		let handled = batch.len();
		debug!("{}: round with {} needed items", self.cfg.id, handled);

		let round = Arc::new(Round::new());
		let (copy_tx, copy_rx) = mpsc::channel::<CopyJob>(QUEUE_DEPTH);
		let (pull_tx, pull_rx) = mpsc::channel::<PullJob>(QUEUE_DEPTH);
		let (finish_tx, finish_rx) = mpsc::channel::<StateHandle>(QUEUE_DEPTH);
		let copy_rx: SharedRx<CopyJob> = Arc::new(tokio::sync::Mutex::new(copy_rx));
		let pull_rx: SharedRx<PullJob> = Arc::new(tokio::sync::Mutex::new(pull_rx));
		let finish_rx: SharedRx<StateHandle> = Arc::new(tokio::sync::Mutex::new(finish_rx));

		let mut workers = Vec::new();
		for _ in 0..self.cfg.copiers {
			let worker = Arc::clone(self).copier_routine(
				Arc::clone(&round),
				Arc::clone(&copy_rx),
				pull_tx.clone(),
				finish_tx.clone(),
			);
			workers.push(tokio::spawn(worker));
		}
		for _ in 0..self.cfg.pullers {
			let worker = Arc::clone(self).puller_routine(Arc::clone(&round), Arc::clone(&pull_rx), finish_tx.clone());
			workers.push(tokio::spawn(worker));
		}
		for _ in 0..self.cfg.finishers {
			let worker = Arc::clone(self).finisher_routine(Arc::clone(&round), Arc::clone(&finish_rx));
			workers.push(tokio::spawn(worker));
		}

		let queued = self.queue_changes(&round, &mut batch, &copy_tx, &pull_tx, &finish_tx).await;

		// Closing the copy queue lets copiers exit, which drops their senders, and so on down the pipeline
		drop(copy_tx);
		drop(pull_tx);
		drop(finish_tx);
		for joined in futures::future::join_all(workers).await {
			if let Err(e) = joined {
				return Err(SyncError::Internal { message: format!("pull worker failed: {}", e) });
			}
		}
		queued?;

		let files = std::mem::take(&mut batch.files_deleted);
		let dirs = std::mem::take(&mut batch.dirs_deleted);
		let me = Arc::clone(self);
		let deleting = Arc::clone(&round);
		tokio::task::spawn_blocking(move || {
			for f in &files {
				deleting.record(&me.cfg.id, &f.name, me.delete_file(f));
			}
			for d in &dirs {
				deleting.record(&me.cfg.id, &d.name, me.delete_dir(d));
			}
		})
		.await
		.map_err(|e| SyncError::Internal { message: format!("deletion task failed: {}", e) })?;

		if let Some(e) = round.take_fatal() {
			return Err(e.into());
		}
		let failures = round.take_failures();
		let failed = failures.len();
		{
			let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
			status.failures = failures;
			status.blocks = round.blocks();
		}

		let succeeded = round.succeeded.load(Ordering::Relaxed);
		if failed > 0 {
			info!("{}: round done, {} in sync, {} failed", self.cfg.id, succeeded, failed);
		} else {
			debug!("{}: round done, {} in sync", self.cfg.id, succeeded);
		}
		Ok(RoundOutcome { handled, failed })
	}

	/// Directories, symlinks, local whole-file copies, then the block pipeline.
	async fn queue_changes(
		self: &Arc<Self>,
		round: &Round,
		batch: &mut NeedBatch,
		copy_tx: &mpsc::Sender<CopyJob>,
		pull_tx: &mpsc::Sender<PullJob>,
		finish_tx: &mpsc::Sender<StateHandle>,
	) -> Result<(), SyncError> {
		for d in &batch.dirs_changed {
			round.record(&self.cfg.id, &d.name, self.handle_dir(d));
		}
		for link in &batch.symlinks_changed {
			round.record(&self.cfg.id, &link.name, self.handle_symlink(link));
		}

		if !batch.files_changed.is_empty() {
			let mut local = Vec::new();
			self.fileset.with_have(&DeviceId::LOCAL, |f| {
				local.push(f);
				true
			})?;
			for (target_name, source) in find_whole_file_copies(&batch.files_changed, local) {
				let target = match batch.files_changed.get(&target_name) {
					Some(t) => t.clone(),
					None => continue,
				};
				let copied = {
					let me = Arc::clone(self);
					let from = source.clone();
					blocking(move || me.copy_whole_file(&from, &target)).await
				};
				match copied {
					Ok(()) => {
						debug!("{}: {} copied from {}", self.cfg.id, target_name, source.name);
						batch.files_changed.remove(&target_name);
						round.record(&self.cfg.id, &target_name, Ok(()));
					}
					Err(PullError::Index(e)) => return Err(e.into()),
					// Fall back to block by block
					Err(e) => debug!("{}: copying {} to {} failed: {}", self.cfg.id, source.name, target_name, e),
				}
			}
		}

		let files = std::mem::take(&mut batch.files_changed);
		for file in files.into_values() {
			self.handle_file(round, file, copy_tx, pull_tx, finish_tx).await?;
		}
		Ok(())
	}

	fn block_size_of(&self, file: &FileInfo) -> usize {
		file.blocks.first().map(|b| b.size as usize).filter(|s| *s > 0).unwrap_or(self.cfg.block_size)
	}

	async fn handle_file(
		self: &Arc<Self>,
		round: &Round,
		file: FileInfo,
		copy_tx: &mpsc::Sender<CopyJob>,
		pull_tx: &mpsc::Sender<PullJob>,
		finish_tx: &mpsc::Sender<StateHandle>,
	) -> Result<(), SyncError> {
		// Nothing is allocated for an announced block before this check
		if let Err(e) = blocks::check_sizes(&file.blocks) {
			round.record(&self.cfg.id, &file.name, Err(PullError::Verify { source: e }));
			return Ok(());
		}

		let current = self.fileset.get(&DeviceId::LOCAL, &file.name)?;
		let temp_name = self.namer.temp_name(&file.name);
		let temp_blocks = {
			let fs = Arc::clone(&self.fs);
			let name = temp_name.clone();
			let block_size = self.block_size_of(&file);
			tokio::task::spawn_blocking(move || blocks::hash_file(&*fs, &name, block_size).ok())
				.await
				.ok()
				.flatten()
		};

		let (wanted, reused) = match plan_file(current.as_ref(), &file, temp_blocks.as_deref()) {
			FilePlan::Shortcut => {
				round.record(&self.cfg.id, &file.name, self.shortcut_file(&file));
				return Ok(());
			}
			FilePlan::Fetch { blocks, reused } => (blocks, reused),
		};

		if temp_blocks.is_some() && reused == 0 {
			if let Err(e) = self.fs.remove(&temp_name) {
				debug!("{}: removing useless temporary {}: {}", self.cfg.id, temp_name, e);
			}
		}

		let mut copy = Vec::new();
		let mut pull = Vec::new();
		{
			let finder = self.fileset.block_finder();
			for b in wanted {
				if finder.contains(&b.hash)? {
					copy.push(b);
				} else {
					pull.push(b);
				}
			}
		}
		debug!(
			"{}: {} needs {} local and {} remote blocks, reusing {}",
			self.cfg.id,
			file.name,
			copy.len(),
			pull.len(),
			reused
		);

		let no_work = copy.is_empty() && pull.is_empty();
		let state = SharedPullerState::new(&self.cfg.id, file, temp_name, reused, copy.len(), pull.len());
		if no_work {
			// Make sure there is a temp file of the right size to finish
			state.temp_file(&*self.fs);
		}
		let handle = round.arena.insert(state);

		let closed = || SyncError::Internal { message: "pull pipeline closed early".to_string() };
		if no_work {
			finish_tx.send(handle).await.map_err(|_| closed())?;
		}
		if !copy.is_empty() {
			copy_tx.send(CopyJob { handle, blocks: copy }).await.map_err(|_| closed())?;
		}
		for block in pull {
			pull_tx.send(PullJob { handle, block }).await.map_err(|_| closed())?;
		}
		Ok(())
	}

	fn update_local(&self, file: &FileInfo) -> Result<(), PullError> {
		self.fileset.update(&DeviceId::LOCAL, vec![file.clone()])?;
		Ok(())
	}

	fn handle_dir(&self, dir: &FileInfo) -> Result<(), PullError> {
		let mode = if dir.no_permissions { 0o755 } else { dir.mode() };
		match self.fs.lstat(&dir.name) {
			Ok(meta) if meta.is_dir() => {
				if !dir.no_permissions {
					self.fs.chmod(&dir.name, mode).map_err(|e| PullError::Metadata { source: e })?;
				}
			}
			Ok(_) => {
				// Something else is in the way
				in_writable_dir(&*self.fs, &dir.name, |n| {
					self.fs.remove(n)?;
					self.fs.mkdir(n, mode)
				})
				.map_err(|e| PullError::Create { source: e })?;
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				in_writable_dir(&*self.fs, &dir.name, |n| self.fs.mkdir(n, mode))
					.map_err(|e| PullError::Create { source: e })?;
			}
			Err(e) => return Err(PullError::Create { source: e }),
		}
		self.update_local(dir)
	}

	fn handle_symlink(&self, link: &FileInfo) -> Result<(), PullError> {
		match self.fs.lstat(&link.name) {
			Ok(meta) if meta.file_type().is_symlink() => {
				let current = self.fs.read_link(&link.name).map_err(|e| PullError::Create { source: e })?;
				if current != link.symlink_target {
					in_writable_dir(&*self.fs, &link.name, |n| {
						self.fs.remove(n)?;
						self.fs.symlink(&link.symlink_target, n)
					})
					.map_err(|e| PullError::Create { source: e })?;
				}
			}
			Ok(_) => {
				in_writable_dir(&*self.fs, &link.name, |n| {
					if let Some(v) = &self.versioner {
						v.archive(&*self.fs, n)?;
					} else {
						self.fs.remove(n)?;
					}
					self.fs.symlink(&link.symlink_target, n)
				})
				.map_err(|e| PullError::Create { source: e })?;
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				in_writable_dir(&*self.fs, &link.name, |n| self.fs.symlink(&link.symlink_target, n))
					.map_err(|e| PullError::Create { source: e })?;
			}
			Err(e) => return Err(PullError::Create { source: e }),
		}
		self.update_local(link)
	}

	/// Content is already right; apply permissions and times only.
	fn shortcut_file(&self, file: &FileInfo) -> Result<(), PullError> {
		if !file.no_permissions {
			self.fs.chmod(&file.name, file.mode()).map_err(|e| PullError::Metadata { source: e })?;
		}
		self.fs
			.chtimes(&file.name, file.modified_s, file.modified_ns)
			.map_err(|e| PullError::Metadata { source: e })?;
		self.update_local(file)
	}

	/// Copy a local file with identical content into place through a temp file.
	fn copy_whole_file(&self, source: &FileInfo, target: &FileInfo) -> Result<(), PullError> {
		let temp_name = self.namer.temp_name(&target.name);
		match self.fs.remove(&temp_name) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(PullError::TempFile { source: e }),
		}

		let mut input = self.fs.open(&source.name).map_err(|e| PullError::SourceRead { source: e })?;
		let mut output = in_writable_dir(&*self.fs, &temp_name, |n| self.fs.create_exclusive(n, 0o644))
			.map_err(|e| PullError::TempFile { source: e })?;
		let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
		drop(output);
		if let Err(e) = copied {
			let _ = self.fs.remove(&temp_name);
			return Err(PullError::DestWrite { source: e });
		}
		self.finish_file(target, &temp_name)
	}

	fn delete_file(&self, file: &FileInfo) -> Result<(), PullError> {
		let removed = match &self.versioner {
			Some(v) if !file.is_symlink() => v.archive(&*self.fs, &file.name),
			_ => in_writable_dir(&*self.fs, &file.name, |n| self.fs.remove(n)),
		};
		match removed {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(PullError::Delete { source: e }),
		}
		self.update_local(file)
	}

	fn delete_dir(&self, dir: &FileInfo) -> Result<(), PullError> {
		// Leftover temporaries must not keep the directory alive
		if let Ok(entries) = self.fs.read_dir(&dir.name) {
			for name in entries.iter().filter(|n| self.namer.is_temporary(n)) {
				let temp = format!("{}/{}", dir.name, name);
				if let Err(e) = self.fs.remove(&temp) {
					debug!("{}: cannot remove {}: {}", self.cfg.id, temp, e);
				}
			}
		}

		match in_writable_dir(&*self.fs, &dir.name, |n| self.fs.remove(n)) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(PullError::Delete { source: e }),
		}
		self.update_local(dir)
	}
}

// vim: ts=4
