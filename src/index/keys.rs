//! Key layout
//!
//! Every key starts with a one-byte kind, the folder id and a NUL separator,
//! so one database holds many folders and each kind scans as a prefix.
//!
//! | kind     | rest                         | value          |
//! |----------|------------------------------|----------------|
//! | device   | device id (32) + name        | `FileInfo`     |
//! | global   | name                         | `VersionList`  |
//! | need     | name                         | empty          |
//! | block    | hash (32) + name             | offset (u64 BE)|
//! | sequence | sequence (u64 BE)            | name           |
//! | meta     | "counts"                     | counts table   |

use crate::error::IndexError;
use crate::types::DeviceId;

const KIND_DEVICE: u8 = 0x00;
const KIND_GLOBAL: u8 = 0x01;
const KIND_NEED: u8 = 0x02;
const KIND_BLOCK: u8 = 0x03;
const KIND_SEQUENCE: u8 = 0x04;
const KIND_META: u8 = 0x05;

/// Builds and parses the keys of one folder.
#[derive(Debug, Clone)]
pub struct Keys {
	folder: Vec<u8>,
}

impl Keys {
	pub fn new(folder: &str) -> Self {
		Keys { folder: folder.as_bytes().to_vec() }
	}

	fn prefix(&self, kind: u8, extra: usize) -> Vec<u8> {
		let mut k = Vec::with_capacity(2 + self.folder.len() + extra);
		k.push(kind);
		k.extend_from_slice(&self.folder);
		k.push(0);
		k
	}

	fn header_len(&self) -> usize {
		2 + self.folder.len()
	}

	/// Prefix covering every device's files.
	pub fn all_devices_prefix(&self) -> Vec<u8> {
		self.prefix(KIND_DEVICE, 0)
	}

	pub fn device_prefix(&self, device: &DeviceId) -> Vec<u8> {
		let mut k = self.prefix(KIND_DEVICE, 32);
		k.extend_from_slice(device.as_bytes());
		k
	}

	pub fn device_file(&self, device: &DeviceId, name: &str) -> Vec<u8> {
		let mut k = self.device_prefix(device);
		k.extend_from_slice(name.as_bytes());
		k
	}

	/// Device and name from a device file key.
	pub fn parse_device_file(&self, key: &[u8]) -> Result<(DeviceId, String), IndexError> {
		let h = self.header_len();
		if key.len() < h + 32 {
			return Err(corrupt("device file key too short"));
		}
		let mut id = [0u8; 32];
		id.copy_from_slice(&key[h..h + 32]);
		Ok((DeviceId(id), utf8(&key[h + 32..])?))
	}

	pub fn global_prefix(&self) -> Vec<u8> {
		self.prefix(KIND_GLOBAL, 0)
	}

	pub fn global(&self, name: &str) -> Vec<u8> {
		let mut k = self.prefix(KIND_GLOBAL, name.len());
		k.extend_from_slice(name.as_bytes());
		k
	}

	pub fn need_prefix(&self) -> Vec<u8> {
		self.prefix(KIND_NEED, 0)
	}

	pub fn need(&self, name: &str) -> Vec<u8> {
		let mut k = self.prefix(KIND_NEED, name.len());
		k.extend_from_slice(name.as_bytes());
		k
	}

	/// Name from a global or need key.
	pub fn parse_name(&self, key: &[u8]) -> Result<String, IndexError> {
		let h = self.header_len();
		if key.len() < h {
			return Err(corrupt("name key too short"));
		}
		utf8(&key[h..])
	}

	pub fn block_prefix(&self, hash: &[u8; 32]) -> Vec<u8> {
		let mut k = self.prefix(KIND_BLOCK, 32);
		k.extend_from_slice(hash);
		k
	}

	pub fn block(&self, hash: &[u8; 32], name: &str) -> Vec<u8> {
		let mut k = self.block_prefix(hash);
		k.extend_from_slice(name.as_bytes());
		k
	}

	pub fn parse_block_name(&self, key: &[u8]) -> Result<String, IndexError> {
		let h = self.header_len() + 32;
		if key.len() < h {
			return Err(corrupt("block key too short"));
		}
		utf8(&key[h..])
	}

	pub fn sequence_prefix(&self) -> Vec<u8> {
		self.prefix(KIND_SEQUENCE, 8)
	}

	pub fn sequence(&self, seq: i64) -> Vec<u8> {
		let mut k = self.sequence_prefix();
		k.extend_from_slice(&(seq as u64).to_be_bytes());
		k
	}

	pub fn parse_sequence(&self, key: &[u8]) -> Result<i64, IndexError> {
		let h = self.header_len();
		if key.len() != h + 8 {
			return Err(corrupt("bad sequence key length"));
		}
		let mut b = [0u8; 8];
		b.copy_from_slice(&key[h..]);
		Ok(u64::from_be_bytes(b) as i64)
	}

	pub fn meta_counts(&self) -> Vec<u8> {
		let mut k = self.prefix(KIND_META, 6);
		k.extend_from_slice(b"counts");
		k
	}
}

fn corrupt(message: &str) -> IndexError {
	IndexError::Corrupted { what: "key", message: message.to_string() }
}

fn utf8(b: &[u8]) -> Result<String, IndexError> {
	String::from_utf8(b.to_vec()).map_err(|e| IndexError::Corrupted {
		what: "key",
		message: format!("name is not UTF-8: {}", e),
	})
}


// vim: ts=4
