//! Fixed-size block hashing, diffing and verification
//!
//! Files are split into blocks of a fixed size (the last one may be short).
//! Each block carries a BLAKE3 strong hash and an Adler-32 weak hash. An empty
//! file is a single zero-length block whose hash is the hash of nothing.

use std::io::{self, Read};

use crate::error::BlockError;
use crate::fs::Filesystem;
use crate::types::BlockInfo;

const ADLER_MOD: u32 = 65521;

/// Largest block size accepted from any device.
pub const MAX_BLOCK_SIZE: usize = 16 << 20;

/// Adler-32 checksum of `data`.
pub fn weak_hash(data: &[u8]) -> u32 {
	let (mut a, mut b) = (1u32, 0u32);
	// 5552 is the largest n keeping the sums below 2^32 before reduction
	for chunk in data.chunks(5552) {
		for &byte in chunk {
			a += byte as u32;
			b += a;
		}
		a %= ADLER_MOD;
		b %= ADLER_MOD;
	}
	(b << 16) | a
}

pub fn strong_hash(data: &[u8]) -> [u8; 32] {
	*blake3::hash(data).as_bytes()
}

/// Fill `buf` as far as the reader allows. Returns the number of bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		match r.read(&mut buf[filled..]) {
			Ok(0) => break,
			Ok(n) => filled += n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e),
		}
	}
	Ok(filled)
}

/// Split the reader's content into blocks of `block_size` bytes.
pub fn blocks<R: Read>(mut r: R, block_size: usize) -> Result<Vec<BlockInfo>, BlockError> {
	let mut buf = vec![0u8; block_size];
	let mut result = Vec::new();
	let mut offset = 0u64;

	loop {
		let n = read_full(&mut r, &mut buf)?;
		if n == 0 {
			break;
		}
		let data = &buf[..n];
		result.push(BlockInfo {
			offset,
			size: n as u32,
			hash: strong_hash(data),
			weak_hash: weak_hash(data),
		});
		offset += n as u64;
		if n < block_size {
			break;
		}
	}

	if result.is_empty() {
		result.push(BlockInfo { offset: 0, size: 0, hash: strong_hash(&[]), weak_hash: 0 });
	}
	Ok(result)
}

/// Hash the regular file `name` inside `fs`.
pub fn hash_file(fs: &dyn Filesystem, name: &str, block_size: usize) -> Result<Vec<BlockInfo>, BlockError> {
	let meta = fs.lstat(name)?;
	if !meta.is_file() {
		return Err(BlockError::NotRegular { name: name.to_string() });
	}
	let file = fs.open(name)?;
	blocks(io::BufReader::new(file), block_size)
}

/// Reject block lists announcing blocks larger than [`MAX_BLOCK_SIZE`].
pub fn check_sizes(blocks: &[BlockInfo]) -> Result<(), BlockError> {
	match blocks.iter().find(|b| b.size as usize > MAX_BLOCK_SIZE) {
		Some(b) => Err(BlockError::TooLarge { offset: b.offset, size: b.size }),
		None => Ok(()),
	}
}

/// Compare the blocks a file has (`src`) with the blocks it should have
/// (`tgt`). Returns the target blocks already present at the same index and
/// the ones that must be fetched.
///
/// A nonempty `src` against an empty `tgt` yields nothing to do.
pub fn block_diff(src: &[BlockInfo], tgt: &[BlockInfo]) -> (Vec<BlockInfo>, Vec<BlockInfo>) {
	if tgt.is_empty() {
		return (Vec::new(), Vec::new());
	}
	if src.is_empty() {
		return (Vec::new(), tgt.to_vec());
	}

	let mut have = Vec::new();
	let mut need = Vec::new();
	for (i, block) in tgt.iter().enumerate() {
		match src.get(i) {
			Some(s) if s.hash == block.hash && s.size == block.size => have.push(block.clone()),
			_ => need.push(block.clone()),
		}
	}
	(have, need)
}

/// True if both lists describe the same content.
pub fn blocks_equal(a: &[BlockInfo], b: &[BlockInfo]) -> bool {
	a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.size == y.size && x.hash == y.hash)
}

/// Check a single block's data against its record.
pub fn verify_buffer(buf: &[u8], block: &BlockInfo) -> Result<(), BlockError> {
	if buf.len() != block.size as usize {
		return Err(BlockError::SizeMismatch { expected: block.size, actual: buf.len() });
	}
	let actual = strong_hash(buf);
	if actual != block.hash {
		return Err(BlockError::HashMismatch {
			offset: block.offset,
			expected: block.hash_hex(),
			actual: hex::encode(actual),
		});
	}
	Ok(())
}

/// Check that the reader's content is exactly the given blocks.
pub fn verify<R: Read>(mut r: R, blocks: &[BlockInfo]) -> Result<(), BlockError> {
	let mut buf = Vec::new();
	for block in blocks {
		buf.resize(block.size as usize, 0);
		let n = read_full(&mut r, &mut buf)?;
		if n != buf.len() {
			return Err(BlockError::SizeMismatch { expected: block.size, actual: n });
		}
		verify_buffer(&buf, block)?;
	}

	let mut extra = [0u8; 1];
	if read_full(&mut r, &mut extra)? != 0 {
		return Err(BlockError::TrailingData);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_weak_hash_known_value() {
		assert_eq!(weak_hash(b"Wikipedia"), 0x11E6_0398);
		assert_eq!(weak_hash(b""), 1);
	}

	#[test]
	fn test_empty_input_is_one_empty_block() {
		let b = blocks(&b""[..], 16).unwrap();
		assert_eq!(b.len(), 1);
		assert_eq!(b[0].size, 0);
		assert_eq!(b[0].hash, strong_hash(&[]));
	}

	#[test]
	fn test_fixed_size_split() {
		let data = vec![7u8; 40];
		let b = blocks(&data[..], 16).unwrap();
		let sizes: Vec<u32> = b.iter().map(|x| x.size).collect();
		let offsets: Vec<u64> = b.iter().map(|x| x.offset).collect();
		assert_eq!(sizes, vec![16, 16, 8]);
		assert_eq!(offsets, vec![0, 16, 32]);
		assert_eq!(b[0].hash, b[1].hash);
	}

	#[test]
	fn test_exact_multiple_has_no_trailing_empty_block() {
		let data = vec![1u8; 32];
		assert_eq!(blocks(&data[..], 16).unwrap().len(), 2);
	}

	#[test]
	fn test_block_diff() {
		let old = blocks(&b"aaaabbbbcccc"[..], 4).unwrap();
		let new = blocks(&b"aaaaXXXXccccdd"[..], 4).unwrap();
		let (have, need) = block_diff(&old, &new);
		assert_eq!(have.len(), 2);
		assert_eq!(need.len(), 2);
		assert_eq!(need[0].offset, 4);
		assert_eq!(need[1].offset, 12);

		let (have, need) = block_diff(&[], &new);
		assert!(have.is_empty());
		assert_eq!(need.len(), new.len());

		let (have, need) = block_diff(&old, &[]);
		assert!(have.is_empty() && need.is_empty());
	}

	#[test]
	fn test_oversized_block_rejected() {
		let mut b = blocks(&b"abcdefgh"[..], 4).unwrap();
		assert!(check_sizes(&b).is_ok());
		b[1].size = (MAX_BLOCK_SIZE + 1) as u32;
		assert!(matches!(check_sizes(&b), Err(BlockError::TooLarge { offset: 4, .. })));
	}

	#[test]
	fn test_diff_reconstructs_target() {
		// Rebuild the new content from "have" (taken from old) and "need" (taken from new).
		let old_data = b"0123456789abcdefghij".to_vec();
		let new_data = b"0123XXXX89abcdefYY".to_vec();
		let old = blocks(&old_data[..], 4).unwrap();
		let new = blocks(&new_data[..], 4).unwrap();
		let (have, need) = block_diff(&old, &new);

		let mut rebuilt = vec![0u8; new_data.len()];
		for b in &have {
			let r = b.offset as usize..b.offset as usize + b.size as usize;
			rebuilt[r.clone()].copy_from_slice(&old_data[r]);
		}
		for b in &need {
			let r = b.offset as usize..b.offset as usize + b.size as usize;
			rebuilt[r.clone()].copy_from_slice(&new_data[r]);
		}
		assert_eq!(rebuilt, new_data);
		assert!(verify(&rebuilt[..], &new).is_ok());
	}

	#[test]
	fn test_verify_detects_corruption_and_trailing_data() {
		let data = b"hello world, hello blocks".to_vec();
		let b = blocks(&data[..], 8).unwrap();
		assert!(verify(&data[..], &b).is_ok());

		let mut bad = data.clone();
		bad[3] ^= 0xff;
		assert!(matches!(verify(&bad[..], &b), Err(BlockError::HashMismatch { offset: 0, .. })));

		let mut long = data.clone();
		long.push(b'!');
		assert!(matches!(verify(&long[..], &b), Err(BlockError::TrailingData)));

		let short = &data[..data.len() - 1];
		assert!(matches!(verify(short, &b), Err(BlockError::SizeMismatch { .. })));
	}

	#[test]
	fn test_verify_buffer() {
		let b = blocks(&b"abcd"[..], 4).unwrap();
		assert!(verify_buffer(b"abcd", &b[0]).is_ok());
		assert!(verify_buffer(b"abce", &b[0]).is_err());
		assert!(matches!(verify_buffer(b"abc", &b[0]), Err(BlockError::SizeMismatch { .. })));
	}

	#[test]
	fn test_blocks_equal() {
		let a = blocks(&b"abcdefgh"[..], 4).unwrap();
		let b = blocks(&b"abcdefgh"[..], 4).unwrap();
		let c = blocks(&b"abcdefgX"[..], 4).unwrap();
		assert!(blocks_equal(&a, &b));
		assert!(!blocks_equal(&a, &c));
		assert!(!blocks_equal(&a, &a[..1]));
	}
}

// vim: ts=4
