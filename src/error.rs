//! Error types for peersync operations
//!
//! Errors fall into three groups. Store and index failures are fatal to the
//! folder that hit them. Block and pull failures belong to a single file and
//! are retried on a later round. `Internal` marks a broken invariant.

use std::error::Error;
use std::fmt;
use std::io;

use crate::types::DeviceId;

/// Main error type
#[derive(Debug)]
pub enum SyncError {
	/// Index failure (fatal to the folder)
	Index(IndexError),

	/// Block hashing or verification failure
	Block(BlockError),

	/// Per-file pull failure
	Pull { name: String, source: PullError },

	/// I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// A programming invariant was violated
	Internal { message: String },
}

impl SyncError {
	/// Whether the folder must stop after this error.
	pub fn is_fatal(&self) -> bool {
		matches!(self, SyncError::Index(_) | SyncError::Internal { .. })
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Index(e) => write!(f, "Index error: {}", e),
			SyncError::Block(e) => write!(f, "Block error: {}", e),
			SyncError::Pull { name, source } => {
				write!(f, "Pulling {} failed ({}): {}", name, source.stage(), source)
			}
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::Internal { message } => write!(f, "Internal error: {}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<IndexError> for SyncError {
	fn from(e: IndexError) -> Self {
		match e {
			IndexError::Internal { message } => SyncError::Internal { message },
			e => SyncError::Index(e),
		}
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Index(IndexError::Store(e))
	}
}

impl From<BlockError> for SyncError {
	fn from(e: BlockError) -> Self {
		match e {
			BlockError::NotRegular { name } => {
				SyncError::Internal { message: format!("asked to hash non-regular file {}", name) }
			}
			e => SyncError::Block(e),
		}
	}
}

/// Key-value store failures
#[derive(Debug)]
pub enum StoreError {
	/// The backing database reported an error
	Backend { message: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Backend { message } => write!(f, "Store backend failed: {}", message),
		}
	}
}

impl Error for StoreError {}

/// Wrap any redb error into a [`StoreError`].
pub fn store_err<E: Into<redb::Error>>(e: E) -> StoreError {
	StoreError::Backend { message: e.into().to_string() }
}

/// Folder index failures
#[derive(Debug)]
pub enum IndexError {
	/// Underlying store failed
	Store(StoreError),

	/// A stored record could not be decoded
	Corrupted { what: &'static str, message: String },

	/// Record could not be encoded
	Encode { message: String },

	/// Index structure invariant broken
	Internal { message: String },
}

impl fmt::Display for IndexError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			IndexError::Store(e) => write!(f, "{}", e),
			IndexError::Corrupted { what, message } => {
				write!(f, "Corrupted {} record: {}", what, message)
			}
			IndexError::Encode { message } => write!(f, "Encoding failed: {}", message),
			IndexError::Internal { message } => write!(f, "Index invariant violated: {}", message),
		}
	}
}

impl Error for IndexError {}

impl From<StoreError> for IndexError {
	fn from(e: StoreError) -> Self {
		IndexError::Store(e)
	}
}

/// Block hashing and verification failures
#[derive(Debug)]
pub enum BlockError {
	/// Reading the data failed
	Read { source: io::Error },

	/// Block content hashes differently than recorded
	HashMismatch { offset: u64, expected: String, actual: String },

	/// Buffer length differs from the block size
	SizeMismatch { expected: u32, actual: usize },

	/// Data continues past the last block
	TrailingData,

	/// Attempted to hash something that is not a regular file
	NotRegular { name: String },

	/// Announced block exceeds the largest block size accepted
	TooLarge { offset: u64, size: u32 },
}

impl fmt::Display for BlockError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BlockError::Read { source } => write!(f, "Failed to read block data: {}", source),
			BlockError::HashMismatch { offset, expected, actual } => {
				write!(f, "Hash mismatch at offset {}: expected {}, got {}", offset, expected, actual)
			}
			BlockError::SizeMismatch { expected, actual } => {
				write!(f, "Block size mismatch: expected {}, got {}", expected, actual)
			}
			BlockError::TrailingData => write!(f, "File has data past the last block"),
			BlockError::NotRegular { name } => write!(f, "{} is not a regular file", name),
			BlockError::TooLarge { offset, size } => {
				write!(f, "Block at offset {} is {} bytes, larger than allowed", offset, size)
			}
		}
	}
}

impl Error for BlockError {}

impl From<io::Error> for BlockError {
	fn from(e: io::Error) -> Self {
		BlockError::Read { source: e }
	}
}

/// Failures reported by a block source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
	/// Remote does not have the file or block
	NoSuchFile,

	/// Request timed out
	Timeout,

	/// Device is not connected
	Disconnected,

	/// Remote reported an error
	Remote { message: String },
}

impl fmt::Display for FetchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FetchError::NoSuchFile => write!(f, "no such file"),
			FetchError::Timeout => write!(f, "request timed out"),
			FetchError::Disconnected => write!(f, "device disconnected"),
			FetchError::Remote { message } => write!(f, "remote error: {}", message),
		}
	}
}

impl Error for FetchError {}

/// Failure of one file within a pull round
#[derive(Debug)]
pub enum PullError {
	/// No connected device has the needed version
	NoDevice,

	/// Temporary file could not be created or opened
	TempFile { source: io::Error },

	/// Reading a local source file failed
	SourceRead { source: io::Error },

	/// Writing into the temporary file failed
	DestWrite { source: io::Error },

	/// Block request to a device failed
	Fetch { device: DeviceId, source: FetchError },

	/// Finished content does not match the expected blocks
	Verify { source: BlockError },

	/// Setting permissions or times failed
	Metadata { source: io::Error },

	/// Archiving the previous version failed
	Archive { source: io::Error },

	/// Moving the temporary file into place failed
	Rename { source: io::Error },

	/// Creating a directory or symlink failed
	Create { source: io::Error },

	/// Removing a file or directory failed
	Delete { source: io::Error },

	/// Writing the result into the local index failed
	Index(IndexError),
}

impl PullError {
	/// Pipeline stage that produced the error.
	pub fn stage(&self) -> &'static str {
		match self {
			PullError::NoDevice => "pull",
			PullError::TempFile { .. } => "open temp",
			PullError::SourceRead { .. } => "copy",
			PullError::DestWrite { .. } => "write",
			PullError::Fetch { .. } => "pull",
			PullError::Verify { .. } => "verify",
			PullError::Metadata { .. } => "metadata",
			PullError::Archive { .. } => "archive",
			PullError::Rename { .. } => "rename",
			PullError::Create { .. } => "create",
			PullError::Delete { .. } => "delete",
			PullError::Index(_) => "index",
		}
	}
}

impl fmt::Display for PullError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PullError::NoDevice => write!(f, "no connected device has the needed version"),
			PullError::TempFile { source } => write!(f, "temporary file: {}", source),
			PullError::SourceRead { source } => write!(f, "reading source: {}", source),
			PullError::DestWrite { source } => write!(f, "writing temporary file: {}", source),
			PullError::Fetch { device, source } => {
				write!(f, "request to {} failed: {}", device.short(), source)
			}
			PullError::Verify { source } => write!(f, "{}", source),
			PullError::Metadata { source } => write!(f, "setting metadata: {}", source),
			PullError::Archive { source } => write!(f, "archiving old version: {}", source),
			PullError::Rename { source } => write!(f, "moving into place: {}", source),
			PullError::Create { source } => write!(f, "{}", source),
			PullError::Delete { source } => write!(f, "{}", source),
			PullError::Index(e) => write!(f, "{}", e),
		}
	}
}

impl Error for PullError {}

impl From<IndexError> for PullError {
	fn from(e: IndexError) -> Self {
		PullError::Index(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_index_internal_maps_to_internal() {
		let e: SyncError = IndexError::Internal { message: "two local entries".into() }.into();
		assert!(matches!(e, SyncError::Internal { .. }));
		assert!(e.is_fatal());
	}

	#[test]
	fn test_not_regular_is_internal() {
		let e: SyncError = BlockError::NotRegular { name: "dir".into() }.into();
		assert!(matches!(e, SyncError::Internal { .. }));
	}

	#[test]
	fn test_pull_error_display_includes_stage() {
		let e = SyncError::Pull { name: "a.txt".into(), source: PullError::NoDevice };
		let s = e.to_string();
		assert!(s.contains("a.txt"));
		assert!(s.contains("pull"));
		assert!(!e.is_fatal());
	}
}

// vim: ts=4
