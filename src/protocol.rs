//! Interface to remote devices
//!
//! The puller only needs to fetch single blocks. Connection handling,
//! authentication and index exchange live behind this trait.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::types::DeviceId;

/// One block request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest<'a> {
	pub folder: &'a str,
	pub name: &'a str,
	pub offset: u64,
	pub size: u32,
	pub hash: [u8; 32],
}

#[async_trait]
pub trait BlockSource: Send + Sync {
	/// Fetch `req.size` bytes of `req.name` at `req.offset` from `device`.
	async fn request_block(&self, device: &DeviceId, req: BlockRequest<'_>) -> Result<Vec<u8>, FetchError>;

	/// Whether `device` can currently serve requests.
	fn connected(&self, _device: &DeviceId) -> bool {
		true
	}
}

// vim: ts=4
