//! Keeping old versions of replaced or deleted files

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fs::{in_writable_dir, parent_of, Filesystem};
use crate::logging::*;

/// Directory, relative to the folder root, holding archived versions.
pub const VERSIONS_DIR: &str = ".psversions";

pub trait Versioner: Send + Sync {
	/// Move the file at `name` aside. A missing file is not an error.
	fn archive(&self, fs: &dyn Filesystem, name: &str) -> io::Result<()>;
}

/// `dir/name.ext` + tag -> `dir/name~tag.ext`
pub fn tag_filename(name: &str, tag: &str) -> String {
	let (dir, base) = split(name);
	let (stem, ext) = split_ext(base);
	format!("{}{}~{}{}", dir, stem, tag, ext)
}

/// Inverse of [`tag_filename`]: original name and tag.
pub fn untag_filename(name: &str) -> Option<(String, String)> {
	let (dir, base) = split(name);
	let (stem, ext) = split_ext(base);
	let i = stem.rfind('~')?;
	Some((format!("{}{}{}", dir, &stem[..i], ext), stem[i + 1..].to_string()))
}

fn split(name: &str) -> (&str, &str) {
	match name.rfind('/') {
		Some(i) => (&name[..=i], &name[i + 1..]),
		None => ("", name),
	}
}

fn split_ext(base: &str) -> (&str, &str) {
	match base.rfind('.') {
		Some(0) | None => (base, ""),
		Some(i) => (&base[..i], &base[i..]),
	}
}

/// Keeps the newest `keep` versions of each file under [`VERSIONS_DIR`].
#[derive(Debug, Clone)]
pub struct SimpleVersioner {
	keep: usize,
}

impl SimpleVersioner {
	pub fn new(keep: usize) -> Self {
		SimpleVersioner { keep: keep.max(1) }
	}

	fn expire(&self, fs: &dyn Filesystem, versions_dir: &str, original: &str) -> io::Result<()> {
		let mut tags = Vec::new();
		for file_name in fs.read_dir(versions_dir)? {
			if let Some((base, tag)) = untag_filename(&file_name) {
				if base == original {
					tags.push((tag, file_name));
				}
			}
		}
		if tags.len() <= self.keep {
			return Ok(());
		}

		tags.sort();
		let excess = tags.len() - self.keep;
		for (_, file_name) in tags.into_iter().take(excess) {
			let path = format!("{}/{}", versions_dir, file_name);
			debug!("expiring old version {}", path);
			fs.remove(&path)?;
		}
		Ok(())
	}
}

impl Versioner for SimpleVersioner {
	fn archive(&self, fs: &dyn Filesystem, name: &str) -> io::Result<()> {
		match fs.lstat(name) {
			Ok(meta) if meta.is_dir() => {
				return Err(io::Error::new(
					io::ErrorKind::Other,
					format!("cannot archive directory {}", name),
				));
			}
			Ok(_) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(e),
		}

		let dir = parent_of(name);
		let versions_dir =
			if dir.is_empty() { VERSIONS_DIR.to_string() } else { format!("{}/{}", VERSIONS_DIR, dir) };
		fs.mkdir_all(&versions_dir, 0o755)?;

		let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
		let tag = format!("{}-{:09}", now.as_secs(), now.subsec_nanos());
		let base = &name[if dir.is_empty() { 0 } else { dir.len() + 1 }..];
		let target = format!("{}/{}", versions_dir, tag_filename(base, &tag));

		in_writable_dir(fs, name, |n| fs.rename(n, &target))?;
		info!("archived {} as {}", name, target);
		// The file is safe in the archive; a failed cleanup only keeps extra versions
		if let Err(e) = self.expire(fs, &versions_dir, base) {
			warn!("expiring old versions of {}: {}", name, e);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::BasicFilesystem;
	use std::io::Write;
	use tempfile::TempDir;

	#[test]
	fn test_tag_filename() {
		assert_eq!(tag_filename("a.txt", "t1"), "a~t1.txt");
		assert_eq!(tag_filename("dir/a", "t1"), "dir/a~t1");
		assert_eq!(tag_filename(".hidden", "t"), ".hidden~t");
		assert_eq!(
			untag_filename("dir/a~t1.txt"),
			Some(("dir/a.txt".to_string(), "t1".to_string()))
		);
		assert_eq!(untag_filename("plain.txt"), None);
	}

	#[test]
	fn test_archive_moves_file_and_expires() {
		let dir = TempDir::new().unwrap();
		let fs = BasicFilesystem::new(dir.path());
		let v = SimpleVersioner::new(2);
		fs.mkdir("d", 0o755).unwrap();

		for i in 0..3 {
			let mut f = fs.create_exclusive("d/a.txt", 0o644).unwrap();
			write!(f, "version {}", i).unwrap();
			drop(f);
			v.archive(&fs, "d/a.txt").unwrap();
			assert!(fs.lstat("d/a.txt").is_err());
		}

		let kept = fs.read_dir(&format!("{}/d", VERSIONS_DIR)).unwrap();
		assert_eq!(kept.len(), 2);
		let mut contents: Vec<String> = kept
			.iter()
			.map(|n| std::fs::read_to_string(dir.path().join(VERSIONS_DIR).join("d").join(n)).unwrap())
			.collect();
		contents.sort();
		assert_eq!(contents, vec!["version 1", "version 2"]);
	}

	#[test]
	fn test_archive_succeeds_when_expiry_fails() {
		let dir = TempDir::new().unwrap();
		let fs = BasicFilesystem::new(dir.path());
		let v = SimpleVersioner::new(1);

		// An old "version" that cannot be removed
		let stuck = format!("{}/{}", VERSIONS_DIR, tag_filename("a.txt", "0000000000-000000000"));
		fs.mkdir_all(&stuck, 0o755).unwrap();
		drop(fs.create_exclusive(&format!("{}/inside", stuck), 0o644).unwrap());

		drop(fs.create_exclusive("a.txt", 0o644).unwrap());
		v.archive(&fs, "a.txt").unwrap();
		assert!(fs.lstat("a.txt").is_err());

		let kept = fs.read_dir(VERSIONS_DIR).unwrap();
		assert_eq!(kept.len(), 2);
		assert!(fs.lstat(&stuck).unwrap().is_dir());
	}

	#[test]
	fn test_archive_missing_file_is_ok() {
		let dir = TempDir::new().unwrap();
		let fs = BasicFilesystem::new(dir.path());
		assert!(SimpleVersioner::new(1).archive(&fs, "nope").is_ok());
	}
}

// vim: ts=4
