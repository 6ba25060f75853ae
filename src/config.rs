//! Configuration
//!
//! A configuration file lists the local device id, where the index database
//! lives and the folders to keep in sync. `.toml` files are parsed as TOML,
//! anything else as JSON5.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::blocks;
use crate::error::SyncError;
use crate::types::{DeviceId, BLOCK_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Hex id of this device
	pub device_id: String,

	/// Path of the index database
	pub database: PathBuf,

	pub folders: Vec<FolderConfig>,
}

impl Default for Config {
	fn default() -> Self {
		Config { device_id: String::new(), database: PathBuf::from("peersync.redb"), folders: Vec::new() }
	}
}

/// Settings of one shared folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FolderConfig {
	pub id: String,
	pub path: PathBuf,

	/// Workers copying blocks from local files
	pub copiers: usize,

	/// Workers fetching blocks from devices
	pub pullers: usize,

	/// Workers committing finished files
	pub finishers: usize,

	pub block_size: usize,

	/// Rescan interval; zero disables periodic scans
	pub scan_interval_secs: u64,

	/// Delay after a round that found nothing to do
	pub pull_interval_secs: u64,

	/// Delay before rechecking an unchanged index
	pub check_interval_secs: u64,

	/// Cooldown after too many rounds without progress
	pub pause_interval_secs: u64,

	pub max_no_progress_rounds: u32,

	/// Temporary files older than this are removed at start
	pub keep_temporaries_hours: u64,

	pub versioning: Option<VersioningConfig>,
}

impl Default for FolderConfig {
	fn default() -> Self {
		FolderConfig {
			id: String::new(),
			path: PathBuf::new(),
			copiers: 1,
			pullers: 16,
			finishers: 2,
			block_size: BLOCK_SIZE,
			scan_interval_secs: 60,
			pull_interval_secs: 10,
			check_interval_secs: 1,
			pause_interval_secs: 60,
			max_no_progress_rounds: 10,
			keep_temporaries_hours: 24,
			versioning: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VersioningConfig {
	/// Archived versions kept per file
	pub keep: usize,
}

impl Default for VersioningConfig {
	fn default() -> Self {
		VersioningConfig { keep: 5 }
	}
}

impl FolderConfig {
	pub fn new<P: AsRef<Path>>(id: &str, path: P) -> Self {
		FolderConfig { id: id.to_string(), path: path.as_ref().to_path_buf(), ..Default::default() }
	}

	pub fn scan_interval(&self) -> Option<Duration> {
		if self.scan_interval_secs == 0 {
			None
		} else {
			Some(Duration::from_secs(self.scan_interval_secs))
		}
	}

	pub fn pull_interval(&self) -> Duration {
		Duration::from_secs(self.pull_interval_secs)
	}

	pub fn check_interval(&self) -> Duration {
		Duration::from_secs(self.check_interval_secs)
	}

	pub fn pause_interval(&self) -> Duration {
		Duration::from_secs(self.pause_interval_secs)
	}

	pub fn keep_temporaries(&self) -> Duration {
		Duration::from_secs(self.keep_temporaries_hours * 3600)
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		let fail = |message: String| Err(SyncError::InvalidConfig { message });
		if self.id.is_empty() || self.id.contains('\0') {
			return fail(format!("invalid folder id {:?}", self.id));
		}
		if self.copiers == 0 || self.pullers == 0 || self.finishers == 0 {
			return fail(format!("folder {}: worker counts must be positive", self.id));
		}
		if self.block_size == 0 || self.block_size > blocks::MAX_BLOCK_SIZE {
			return fail(format!("folder {}: invalid block size {}", self.id, self.block_size));
		}
		if self.max_no_progress_rounds == 0 {
			return fail(format!("folder {}: maxNoProgressRounds must be positive", self.id));
		}
		Ok(())
	}
}

impl Config {
	/// Load and validate a configuration file.
	pub fn load(path: &Path) -> Result<Self, SyncError> {
		let text = std::fs::read_to_string(path)?;
		let config: Config = if path.extension().map_or(false, |e| e == "toml") {
			toml::from_str(&text).map_err(|e| SyncError::InvalidConfig {
				message: format!("{}: {}", path.display(), e),
			})?
		} else {
			json5::from_str(&text).map_err(|e| SyncError::InvalidConfig {
				message: format!("{}: {}", path.display(), e),
			})?
		};
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		if !self.device_id.is_empty() {
			self.local_device()?;
		}
		let mut seen = HashSet::new();
		for folder in &self.folders {
			folder.validate()?;
			if !seen.insert(folder.id.as_str()) {
				return Err(SyncError::InvalidConfig {
					message: format!("duplicate folder id {}", folder.id),
				});
			}
		}
		Ok(())
	}

	pub fn local_device(&self) -> Result<DeviceId, SyncError> {
		self.device_id.parse().map_err(|message| SyncError::InvalidConfig { message })
	}

	pub fn folder(&self, id: &str) -> Option<&FolderConfig> {
		self.folders.iter().find(|f| f.id == id)
	}
}


// vim: ts=4
