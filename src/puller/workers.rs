//! Copier, puller and finisher workers
//!
//! Workers share their input queue through a mutex around the receiver.
//! A worker exits when its queue is closed and drained, dropping its own
//! senders so the next stage closes in turn. Disk reads and writes run on
//! the blocking pool.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::shared_state::{SharedPullerState, StateHandle};
use super::{blocking, CopyJob, PullJob, Puller, Round, SharedRx};
use crate::blocks;
use crate::error::PullError;
use crate::fs::in_writable_dir;
use crate::logging::*;
use crate::protocol::BlockRequest;
use crate::types::{BlockInfo, FileInfo};

impl Puller {
	pub(super) async fn copier_routine(
		self: Arc<Self>,
		round: Arc<Round>,
		rx: SharedRx<CopyJob>,
		pull_tx: mpsc::Sender<PullJob>,
		finish_tx: mpsc::Sender<StateHandle>,
	) {
		loop {
			let job = rx.lock().await.recv().await;
			let job = match job {
				Some(j) => j,
				None => break,
			};
			let state = match round.arena.get(job.handle) {
				Some(s) => s,
				None => continue,
			};

			for block in job.blocks {
				if state.failed() {
					state.copy_done();
					continue;
				}
				let temp = match state.temp_file(&*self.fs) {
					Some(t) => t,
					None => {
						state.copy_done();
						continue;
					}
				};

				let copied = {
					let me = Arc::clone(&self);
					let wanted = block.clone();
					blocking(move || me.copy_block(&temp, &wanted)).await
				};
				match copied {
					Ok(true) => state.copy_done(),
					Ok(false) => {
						debug!("{}: {}: no usable local copy of block at {}", self.cfg.id, state.name(), block.offset);
						state.copy_to_pull();
						if pull_tx.send(PullJob { handle: job.handle, block }).await.is_err() {
							state.fail(PullError::NoDevice);
							state.pull_done();
						}
					}
					Err(e) => {
						state.fail(e);
						state.copy_done();
					}
				}
			}

			if finish_tx.send(job.handle).await.is_err() {
				break;
			}
		}
	}

	/// Copy one block from any local file that has it. Returns false when no
	/// source produced the right data.
	fn copy_block(&self, temp: &File, block: &BlockInfo) -> Result<bool, PullError> {
		let finder = self.fileset.block_finder();
		let mut buf = vec![0u8; block.size as usize];
		let mut write_err = None;

		let found = finder.iterate(&block.hash, |name, offset| {
			let src = match self.fs.open(name) {
				Ok(f) => f,
				Err(e) => {
					debug!("{}: cannot open {} for copying: {}", self.cfg.id, name, e);
					return false;
				}
			};
			if src.read_exact_at(&mut buf, offset).is_err() {
				return false;
			}
			// The source may have changed since it was indexed
			if blocks::verify_buffer(&buf, block).is_err() {
				return false;
			}
			if let Err(e) = temp.write_all_at(&buf, block.offset) {
				write_err = Some(e);
			}
			true
		})?;

		match write_err {
			Some(e) => Err(PullError::DestWrite { source: e }),
			None => Ok(found),
		}
	}

	pub(super) async fn puller_routine(
		self: Arc<Self>,
		round: Arc<Round>,
		rx: SharedRx<PullJob>,
		finish_tx: mpsc::Sender<StateHandle>,
	) {
		loop {
			let job = rx.lock().await.recv().await;
			let job = match job {
				Some(j) => j,
				None => break,
			};
			let state = match round.arena.get(job.handle) {
				Some(s) => s,
				None => continue,
			};

			if !state.failed() {
				if let Err(e) = self.pull_block(&state, &job.block).await {
					state.fail(e);
				}
			}
			state.pull_done();

			if finish_tx.send(job.handle).await.is_err() {
				break;
			}
		}
	}

	/// Fetch one block, trying available devices from the least busy on.
	async fn pull_block(&self, state: &SharedPullerState, block: &BlockInfo) -> Result<(), PullError> {
		let mut candidates = self.available_devices(state.name())?;
		let temp = match state.temp_file(&*self.fs) {
			Some(t) => t,
			None => return Ok(()),
		};

		let mut last_err = PullError::NoDevice;
		while let Some(device) = self.activity.least_busy(&candidates) {
			candidates.retain(|d| *d != device);

			let fetched = {
				let _busy = self.activity.using(device);
				let req = BlockRequest {
					folder: &self.cfg.id,
					name: state.name(),
					offset: block.offset,
					size: block.size,
					hash: block.hash,
				};
				self.source.request_block(&device, req).await
			};
			let data = match fetched {
				Ok(d) => d,
				Err(e) => {
					debug!("{}: {}: block at {} from {}: {}", self.cfg.id, state.name(), block.offset, device, e);
					last_err = PullError::Fetch { device, source: e };
					continue;
				}
			};
			if let Err(e) = blocks::verify_buffer(&data, block) {
				debug!("{}: {}: bad block at {} from {}: {}", self.cfg.id, state.name(), block.offset, device, e);
				last_err = PullError::Verify { source: e };
				continue;
			}

			let offset = block.offset;
			return blocking(move || temp.write_all_at(&data, offset).map_err(|e| PullError::DestWrite { source: e }))
				.await;
		}
		Err(last_err)
	}

	pub(super) async fn finisher_routine(self: Arc<Self>, round: Arc<Round>, rx: SharedRx<StateHandle>) {
		loop {
			let handle = rx.lock().await.recv().await;
			let handle = match handle {
				Some(h) => h,
				None => break,
			};
			let state = match round.arena.get(handle) {
				Some(s) => s,
				None => continue,
			};
			let finished = {
				let me = Arc::clone(&self);
				let st = Arc::clone(&state);
				blocking(move || {
					Ok(st.final_close().map(|closed| closed.and_then(|()| me.finish_file(&st.file, &st.temp_name))))
				})
				.await
			};
			let result = match finished {
				Ok(Some(r)) => r,
				// Blocks are still outstanding
				Ok(None) => continue,
				Err(e) => Err(e),
			};
			round.arena.release(handle);
			round.add_blocks(&state.progress());
			round.record(&self.cfg.id, state.name(), result);
		}
	}

	/// Move a complete temp file into place and record it in the local index.
	/// On failure the temp file is removed and the real file left untouched.
	pub(super) fn finish_file(&self, file: &FileInfo, temp_name: &str) -> Result<(), PullError> {
		if let Err(e) = self.commit_temp(file, temp_name) {
			if let Err(re) = self.fs.remove(temp_name) {
				if re.kind() != io::ErrorKind::NotFound {
					debug!("{}: cannot remove {}: {}", self.cfg.id, temp_name, re);
				}
			}
			return Err(e);
		}
		self.update_local(file)
	}

	fn commit_temp(&self, file: &FileInfo, temp_name: &str) -> Result<(), PullError> {
		let temp = self.fs.open(temp_name).map_err(|e| PullError::TempFile { source: e })?;
		blocks::verify(io::BufReader::new(temp), &file.blocks).map_err(|e| PullError::Verify { source: e })?;

		if !file.no_permissions {
			self.fs.chmod(temp_name, file.mode()).map_err(|e| PullError::Metadata { source: e })?;
		}
		self.fs
			.chtimes(temp_name, file.modified_s, file.modified_ns)
			.map_err(|e| PullError::Metadata { source: e })?;

		match self.fs.lstat(&file.name) {
			Ok(meta) if meta.is_dir() => {
				// Only an empty directory can be replaced
				in_writable_dir(&*self.fs, &file.name, |n| self.fs.remove(n))
					.map_err(|e| PullError::Rename { source: e })?;
			}
			Ok(_) => {
				if let Some(v) = &self.versioner {
					v.archive(&*self.fs, &file.name).map_err(|e| PullError::Archive { source: e })?;
				}
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(PullError::Rename { source: e }),
		}

		in_writable_dir(&*self.fs, &file.name, |n| self.fs.rename(temp_name, n))
			.map_err(|e| PullError::Rename { source: e })
	}
}

// vim: ts=4
