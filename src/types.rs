//! Core data types: devices, blocks and file records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::version::Vector;

/// Synthetic size reported for directories and symlinks in counts.
pub const SYNTHETIC_DIRECTORY_SIZE: u64 = 128;

/// Default block size (128 KiB).
pub const BLOCK_SIZE: usize = 128 << 10;

/// Local flag: file type not supported on this device.
pub const FLAG_LOCAL_UNSUPPORTED: u32 = 1 << 0;
/// Local flag: file is ignored locally.
pub const FLAG_LOCAL_IGNORED: u32 = 1 << 1;
/// Local flag: file needs to be rescanned before use.
pub const FLAG_LOCAL_MUST_RESCAN: u32 = 1 << 2;
/// Local flag: file was changed on a receive-only folder.
pub const FLAG_LOCAL_RECEIVE_ONLY: u32 = 1 << 3;

/// Flags that make a file invalid.
pub const LOCAL_INVALID_FLAGS: u32 =
	FLAG_LOCAL_UNSUPPORTED | FLAG_LOCAL_IGNORED | FLAG_LOCAL_MUST_RESCAN | FLAG_LOCAL_RECEIVE_ONLY;

/// Flags that make a file lose every conflict.
pub const LOCAL_CONFLICT_FLAGS: u32 =
	FLAG_LOCAL_UNSUPPORTED | FLAG_LOCAL_IGNORED | FLAG_LOCAL_RECEIVE_ONLY;

/// Compact device identifier used in version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ShortId(pub u64);

impl fmt::Display for ShortId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

/// Full 32-byte device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DeviceId(pub [u8; 32]);

impl DeviceId {
	/// Reserved id under which the local replica is stored.
	pub const LOCAL: DeviceId = DeviceId([0xff; 32]);

	/// Reserved id under which global counts are tracked.
	pub const GLOBAL: DeviceId = DeviceId([0xf8; 32]);

	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		DeviceId(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// First eight bytes as a big-endian integer.
	pub fn short(&self) -> ShortId {
		let mut b = [0u8; 8];
		b.copy_from_slice(&self.0[..8]);
		ShortId(u64::from_be_bytes(b))
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			DeviceId::LOCAL => write!(f, "local"),
			DeviceId::GLOBAL => write!(f, "global"),
			_ => write!(f, "{}", hex::encode_upper(self.0)),
		}
	}
}

impl FromStr for DeviceId {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let cleaned: String = s.chars().filter(|c| *c != '-').collect();
		let bytes = hex::decode(&cleaned).map_err(|e| format!("invalid device id {}: {}", s, e))?;
		if bytes.len() != 32 {
			return Err(format!("invalid device id {}: expected 32 bytes, got {}", s, bytes.len()));
		}
		let mut id = [0u8; 32];
		id.copy_from_slice(&bytes);
		Ok(DeviceId(id))
	}
}

/// A fixed-size content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
	pub offset: u64,
	pub size: u32,
	pub hash: [u8; 32],
	#[serde(default)]
	pub weak_hash: u32,
}

impl BlockInfo {
	pub fn hash_hex(&self) -> String {
		hex::encode(self.hash)
	}

	pub fn is_empty(&self) -> bool {
		self.size == 0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
	File,
	Directory,
	Symlink,
}

/// Metadata record for one file, directory or symlink as announced by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
	pub name: String,
	pub file_type: FileType,
	pub size: u64,
	pub modified_s: i64,
	pub modified_ns: u32,
	pub permissions: u32,
	#[serde(default)]
	pub no_permissions: bool,
	pub version: Vector,
	#[serde(default)]
	pub sequence: i64,
	#[serde(default)]
	pub blocks: Vec<BlockInfo>,
	#[serde(default)]
	pub symlink_target: String,
	#[serde(default)]
	pub deleted: bool,
	#[serde(default)]
	pub raw_invalid: bool,
	#[serde(default)]
	pub local_flags: u32,
	#[serde(default)]
	pub modified_by: ShortId,
}

impl FileInfo {
	fn with_type(name: &str, file_type: FileType) -> Self {
		FileInfo {
			name: name.to_string(),
			file_type,
			size: 0,
			modified_s: 0,
			modified_ns: 0,
			permissions: if file_type == FileType::Directory { 0o755 } else { 0o644 },
			no_permissions: false,
			version: Vector::new(),
			sequence: 0,
			blocks: Vec::new(),
			symlink_target: String::new(),
			deleted: false,
			raw_invalid: false,
			local_flags: 0,
			modified_by: ShortId::default(),
		}
	}

	/// Regular file record with the given blocks; size is derived from them.
	pub fn file(name: &str, blocks: Vec<BlockInfo>) -> Self {
		let mut f = FileInfo::with_type(name, FileType::File);
		f.size = blocks.iter().map(|b| b.size as u64).sum();
		f.blocks = blocks;
		f
	}

	pub fn directory(name: &str) -> Self {
		FileInfo::with_type(name, FileType::Directory)
	}

	pub fn symlink(name: &str, target: &str) -> Self {
		let mut f = FileInfo::with_type(name, FileType::Symlink);
		f.symlink_target = target.to_string();
		f
	}

	pub fn with_version(mut self, version: Vector) -> Self {
		self.version = version;
		self
	}

	pub fn with_modified(mut self, secs: i64, nanos: u32) -> Self {
		self.modified_s = secs;
		self.modified_ns = nanos;
		self
	}

	/// Tombstone for this record: no content, deleted set.
	pub fn into_deleted(mut self) -> Self {
		self.deleted = true;
		self.size = 0;
		self.blocks.clear();
		self
	}

	pub fn is_file(&self) -> bool {
		self.file_type == FileType::File
	}

	pub fn is_directory(&self) -> bool {
		self.file_type == FileType::Directory
	}

	pub fn is_symlink(&self) -> bool {
		self.file_type == FileType::Symlink
	}

	pub fn is_deleted(&self) -> bool {
		self.deleted
	}

	pub fn is_invalid(&self) -> bool {
		self.raw_invalid || self.local_flags & LOCAL_INVALID_FLAGS != 0
	}

	/// Locally flagged records lose every conflict.
	pub fn should_conflict(&self) -> bool {
		self.local_flags & LOCAL_CONFLICT_FLAGS != 0
	}

	/// Size used for accounting.
	pub fn file_size(&self) -> u64 {
		if self.deleted {
			0
		} else if self.is_directory() || self.is_symlink() {
			SYNTHETIC_DIRECTORY_SIZE
		} else {
			self.size
		}
	}

	pub fn mod_time(&self) -> (i64, u32) {
		(self.modified_s, self.modified_ns)
	}

	/// Unix permission bits to apply on disk.
	pub fn mode(&self) -> u32 {
		self.permissions & 0o777
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_device_id_short_and_parse() {
		let mut raw = [0u8; 32];
		raw[7] = 5;
		let id = DeviceId(raw);
		assert_eq!(id.short(), ShortId(5));
		let parsed: DeviceId = id.to_string().parse().unwrap();
		assert_eq!(parsed, id);
		assert!("abcd".parse::<DeviceId>().is_err());
	}

	#[test]
	fn test_reserved_ids_differ() {
		assert_ne!(DeviceId::LOCAL, DeviceId::GLOBAL);
		assert_eq!(DeviceId::LOCAL.to_string(), "local");
	}

	#[test]
	fn test_invalid_flags() {
		let mut f = FileInfo::file("a", Vec::new());
		assert!(!f.is_invalid());
		f.local_flags = FLAG_LOCAL_MUST_RESCAN;
		assert!(f.is_invalid());
		assert!(!f.should_conflict());
		f.local_flags = FLAG_LOCAL_IGNORED;
		assert!(f.should_conflict());
	}

	#[test]
	fn test_file_size_accounting() {
		let f = FileInfo::file("a", vec![BlockInfo { offset: 0, size: 10, hash: [0; 32], weak_hash: 0 }]);
		assert_eq!(f.file_size(), 10);
		assert_eq!(FileInfo::directory("d").file_size(), SYNTHETIC_DIRECTORY_SIZE);
		assert_eq!(f.into_deleted().file_size(), 0);
	}
}

// vim: ts=4
