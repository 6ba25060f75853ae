//! User-visible folder status

use serde::Serialize;
use std::fmt;

use crate::index::Counts;
use crate::puller::schedule::FolderState;
use crate::puller::shared_state::Progress;

/// A file that failed during the last pull round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
	pub name: String,
	pub stage: &'static str,
	pub error: String,
}

impl fmt::Display for FileFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({}): {}", self.name, self.stage, self.error)
	}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
	pub folder: String,
	pub state: FolderState,
	pub failures: Vec<FileFailure>,
	/// Blocks handled by the last round with work
	pub blocks: Progress,
	pub global: Counts,
	pub local: Counts,
	pub need: Counts,
	pub sequence: i64,
}

impl FolderSummary {
	pub fn in_sync(&self) -> bool {
		self.need.total_items() == 0 && self.failures.is_empty()
	}
}

impl fmt::Display for FolderSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "folder {}: {}", self.folder, self.state)?;
		writeln!(
			f,
			"  global: {} files, {} dirs, {} symlinks, {} deleted, {} bytes",
			self.global.files, self.global.directories, self.global.symlinks, self.global.deleted, self.global.bytes
		)?;
		writeln!(
			f,
			"  local:  {} files, {} dirs, {} symlinks, {} deleted, {} bytes (sequence {})",
			self.local.files, self.local.directories, self.local.symlinks, self.local.deleted, self.local.bytes,
			self.sequence
		)?;
		writeln!(f, "  need:   {} items, {} bytes", self.need.total_items(), self.need.bytes)?;
		writeln!(
			f,
			"  blocks: {}/{} copied, {}/{} pulled, {} reused",
			self.blocks.copied, self.blocks.copy_total, self.blocks.pulled, self.blocks.pull_total, self.blocks.reused
		)?;
		if !self.failures.is_empty() {
			writeln!(f, "  {} failing:", self.failures.len())?;
			for failure in &self.failures {
				writeln!(f, "    {}", failure)?;
			}
		}
		Ok(())
	}
}

// vim: ts=4
