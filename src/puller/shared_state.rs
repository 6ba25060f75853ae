//! State shared by all workers handling one file
//!
//! Copiers, pullers and the finisher each hold a [`StateHandle`] instead of
//! the state itself. The [`StateArena`] owns every state of a pull round; a
//! state is released exactly once, when the finisher closes it.

use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PullError;
use crate::fs::{in_writable_dir, Filesystem};
use crate::logging::*;
use crate::types::FileInfo;

/// Block accounting for one file, or summed over a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
	pub copy_total: usize,
	pub copied: usize,
	pub pull_total: usize,
	pub pulled: usize,
	pub reused: usize,
}

impl Progress {
	pub fn add(&mut self, other: &Progress) {
		self.copy_total += other.copy_total;
		self.copied += other.copied;
		self.pull_total += other.pull_total;
		self.pulled += other.pulled;
		self.reused += other.reused;
	}
}

#[derive(Debug, Default)]
struct Inner {
	copy_needed: usize,
	pull_needed: usize,
	progress: Progress,
	temp: Option<Arc<File>>,
	error: Option<PullError>,
	closed: bool,
}

#[derive(Debug)]
pub struct SharedPullerState {
	pub file: FileInfo,
	pub folder: String,
	pub temp_name: String,
	/// Temp file kept from an earlier attempt holds some of the blocks
	pub reused: bool,
	inner: Mutex<Inner>,
}

impl SharedPullerState {
	pub fn new(
		folder: &str,
		file: FileInfo,
		temp_name: String,
		reused_blocks: usize,
		copy_needed: usize,
		pull_needed: usize,
	) -> Self {
		let inner = Inner {
			copy_needed,
			pull_needed,
			progress: Progress {
				copy_total: copy_needed,
				pull_total: pull_needed,
				reused: reused_blocks,
				..Default::default()
			},
			..Default::default()
		};
		SharedPullerState {
			file,
			folder: folder.to_string(),
			temp_name,
			reused: reused_blocks > 0,
			inner: Mutex::new(inner),
		}
	}

	pub fn name(&self) -> &str {
		&self.file.name
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// The temporary file, opened or created on first use. None once failed.
	pub fn temp_file(&self, fs: &dyn Filesystem) -> Option<Arc<File>> {
		let mut inner = self.lock();
		if inner.error.is_some() || inner.closed {
			return None;
		}
		if let Some(f) = &inner.temp {
			return Some(Arc::clone(f));
		}

		let opened = if self.reused {
			fs.open_rw(&self.temp_name)
		} else {
			in_writable_dir(fs, &self.temp_name, |n| fs.create_exclusive(n, 0o644))
		};
		let file = match opened.and_then(|f| f.set_len(self.file.size).map(|_| f)) {
			Ok(f) => Arc::new(f),
			Err(e) => {
				self.fail_locked(&mut inner, PullError::TempFile { source: e });
				return None;
			}
		};
		inner.temp = Some(Arc::clone(&file));
		Some(file)
	}

	fn fail_locked(&self, inner: &mut Inner, err: PullError) {
		if inner.error.is_none() {
			debug!("{}: {}: {} failed: {}", self.folder, self.file.name, err.stage(), err);
			inner.error = Some(err);
		}
		inner.temp = None;
	}

	/// Record a failure. Only the first one is kept.
	pub fn fail(&self, err: PullError) {
		let mut inner = self.lock();
		self.fail_locked(&mut inner, err);
	}

	pub fn failed(&self) -> bool {
		self.lock().error.is_some()
	}

	/// One block was copied from a local file (or skipped after failure).
	pub fn copy_done(&self) {
		let mut inner = self.lock();
		inner.copy_needed = inner.copy_needed.saturating_sub(1);
		inner.progress.copied += 1;
	}

	/// A block that could not be copied locally moves to the pull queue.
	pub fn copy_to_pull(&self) {
		let mut inner = self.lock();
		inner.pull_needed += 1;
		inner.progress.pull_total += 1;
		inner.copy_needed = inner.copy_needed.saturating_sub(1);
		inner.progress.copy_total = inner.progress.copy_total.saturating_sub(1);
	}

	pub fn pull_done(&self) {
		let mut inner = self.lock();
		inner.pull_needed = inner.pull_needed.saturating_sub(1);
		inner.progress.pulled += 1;
	}

	pub fn progress(&self) -> Progress {
		self.lock().progress
	}

	/// Close once every block is accounted for. Returns the outcome exactly
	/// once; later calls and calls with work pending return None.
	pub fn final_close(&self) -> Option<Result<(), PullError>> {
		let mut inner = self.lock();
		if inner.closed || inner.copy_needed + inner.pull_needed > 0 {
			return None;
		}
		inner.closed = true;

		if let Some(f) = inner.temp.take() {
			if inner.error.is_none() {
				if let Err(e) = f.sync_all() {
					inner.error = Some(PullError::DestWrite { source: e });
				}
			}
		}
		Some(match inner.error.take() {
			Some(e) => Err(e),
			None => Ok(()),
		})
	}
}

/// Index into a [`StateArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateHandle(usize);

/// Owns the states of one pull round. Handles are never reused.
#[derive(Debug, Default)]
pub struct StateArena {
	next: AtomicUsize,
	states: Mutex<HashMap<usize, Arc<SharedPullerState>>>,
}

impl StateArena {
	pub fn new() -> Self {
		StateArena::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<usize, Arc<SharedPullerState>>> {
		self.states.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn insert(&self, state: SharedPullerState) -> StateHandle {
		let id = self.next.fetch_add(1, Ordering::Relaxed);
		self.lock().insert(id, Arc::new(state));
		StateHandle(id)
	}

	pub fn get(&self, handle: StateHandle) -> Option<Arc<SharedPullerState>> {
		self.lock().get(&handle.0).cloned()
	}

	/// Remove the state. Returns it the first time only.
	pub fn release(&self, handle: StateHandle) -> Option<Arc<SharedPullerState>> {
		self.lock().remove(&handle.0)
	}

}


// vim: ts=4
