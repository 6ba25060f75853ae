//! Filesystem access for a folder root
//!
//! All names are folder-relative and use `/` as separator. The [`Filesystem`]
//! trait is the seam between the puller and the disk; [`BasicFilesystem`] is
//! the real implementation.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

/// One entry found by [`Filesystem::walk`].
#[derive(Debug)]
pub struct WalkEntry {
	pub name: String,
	pub metadata: Metadata,
}

pub trait Filesystem: Send + Sync {
	fn root(&self) -> &Path;

	/// Open for reading.
	fn open(&self, name: &str) -> io::Result<File>;

	/// Open an existing file for reading and writing.
	fn open_rw(&self, name: &str) -> io::Result<File>;

	/// Create a new file; fails if it exists.
	fn create_exclusive(&self, name: &str, mode: u32) -> io::Result<File>;

	fn mkdir(&self, name: &str, mode: u32) -> io::Result<()>;

	fn mkdir_all(&self, name: &str, mode: u32) -> io::Result<()>;

	fn chmod(&self, name: &str, mode: u32) -> io::Result<()>;

	fn chtimes(&self, name: &str, secs: i64, nanos: u32) -> io::Result<()>;

	fn rename(&self, from: &str, to: &str) -> io::Result<()>;

	/// Remove a file, symlink or empty directory.
	fn remove(&self, name: &str) -> io::Result<()>;

	fn lstat(&self, name: &str) -> io::Result<Metadata>;

	fn symlink(&self, target: &str, name: &str) -> io::Result<()>;

	fn read_link(&self, name: &str) -> io::Result<String>;

	/// Names of the entries directly inside directory `name`, sorted.
	fn read_dir(&self, name: &str) -> io::Result<Vec<String>>;

	/// Every entry below the root, parents before children, sorted by name.
	fn walk(&self) -> io::Result<Vec<WalkEntry>>;
}

/// Directory-backed filesystem.
#[derive(Debug, Clone)]
pub struct BasicFilesystem {
	root: PathBuf,
}

impl BasicFilesystem {
	pub fn new<P: AsRef<Path>>(root: P) -> Self {
		BasicFilesystem { root: root.as_ref().to_path_buf() }
	}

	fn path(&self, name: &str) -> io::Result<PathBuf> {
		let rel = Path::new(name);
		if rel.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("name escapes folder root: {}", name),
			));
		}
		Ok(self.root.join(rel))
	}

	fn walk_dir(&self, dir: &Path, prefix: &str, out: &mut Vec<WalkEntry>) -> io::Result<()> {
		let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
		entries.sort_by_key(|e| e.file_name());

		for entry in entries {
			let file_name = match entry.file_name().into_string() {
				Ok(s) => s,
				Err(_) => continue,
			};
			let name =
				if prefix.is_empty() { file_name } else { format!("{}/{}", prefix, file_name) };
			let metadata = entry.path().symlink_metadata()?;
			let is_dir = metadata.is_dir();
			out.push(WalkEntry { name: name.clone(), metadata });
			if is_dir {
				self.walk_dir(&entry.path(), &name, out)?;
			}
		}
		Ok(())
	}
}

impl Filesystem for BasicFilesystem {
	fn root(&self) -> &Path {
		&self.root
	}

	fn open(&self, name: &str) -> io::Result<File> {
		File::open(self.path(name)?)
	}

	fn open_rw(&self, name: &str) -> io::Result<File> {
		OpenOptions::new().read(true).write(true).open(self.path(name)?)
	}

	fn create_exclusive(&self, name: &str, mode: u32) -> io::Result<File> {
		OpenOptions::new()
			.read(true)
			.write(true)
			.create_new(true)
			.mode(mode)
			.open(self.path(name)?)
	}

	fn mkdir(&self, name: &str, mode: u32) -> io::Result<()> {
		let path = self.path(name)?;
		fs::create_dir(&path)?;
		fs::set_permissions(&path, fs::Permissions::from_mode(mode))
	}

	fn mkdir_all(&self, name: &str, mode: u32) -> io::Result<()> {
		let path = self.path(name)?;
		fs::create_dir_all(&path)?;
		fs::set_permissions(&path, fs::Permissions::from_mode(mode))
	}

	fn chmod(&self, name: &str, mode: u32) -> io::Result<()> {
		fs::set_permissions(self.path(name)?, fs::Permissions::from_mode(mode))
	}

	fn chtimes(&self, name: &str, secs: i64, nanos: u32) -> io::Result<()> {
		let t = filetime::FileTime::from_unix_time(secs, nanos);
		filetime::set_symlink_file_times(self.path(name)?, t, t)
	}

	fn rename(&self, from: &str, to: &str) -> io::Result<()> {
		fs::rename(self.path(from)?, self.path(to)?)
	}

	fn remove(&self, name: &str) -> io::Result<()> {
		let path = self.path(name)?;
		if path.symlink_metadata()?.is_dir() {
			fs::remove_dir(path)
		} else {
			fs::remove_file(path)
		}
	}

	fn lstat(&self, name: &str) -> io::Result<Metadata> {
		self.path(name)?.symlink_metadata()
	}

	fn symlink(&self, target: &str, name: &str) -> io::Result<()> {
		std::os::unix::fs::symlink(target, self.path(name)?)
	}

	fn read_link(&self, name: &str) -> io::Result<String> {
		let target = fs::read_link(self.path(name)?)?;
		target.into_os_string().into_string().map_err(|_| {
			io::Error::new(io::ErrorKind::InvalidData, format!("non-UTF-8 symlink target: {}", name))
		})
	}

	fn read_dir(&self, name: &str) -> io::Result<Vec<String>> {
		let mut names = Vec::new();
		for entry in fs::read_dir(self.path(name)?)? {
			// Names that are not UTF-8 cannot be addressed through this trait
			if let Ok(n) = entry?.file_name().into_string() {
				names.push(n);
			}
		}
		names.sort();
		Ok(names)
	}

	fn walk(&self) -> io::Result<Vec<WalkEntry>> {
		let mut out = Vec::new();
		self.walk_dir(&self.root, "", &mut out)?;
		Ok(out)
	}
}

/// Parent directory of `name`, or the empty string for top-level names.
pub fn parent_of(name: &str) -> &str {
	match name.rfind('/') {
		Some(i) => &name[..i],
		None => "",
	}
}

/// Run `f` with the parent directory of `name` temporarily made writable.
pub fn in_writable_dir<T, F>(fs: &dyn Filesystem, name: &str, f: F) -> io::Result<T>
where
	F: FnOnce(&str) -> io::Result<T>,
{
	let dir = parent_of(name);
	let dir_path = if dir.is_empty() { fs.root().to_path_buf() } else { fs.root().join(dir) };
	let mode = match dir_path.symlink_metadata() {
		Ok(meta) => meta.permissions().mode() & 0o7777,
		Err(_) => return f(name),
	};

	if mode & 0o200 != 0 {
		return f(name);
	}

	fs::set_permissions(&dir_path, fs::Permissions::from_mode(0o755))?;
	let result = f(name);
	let restored = fs::set_permissions(&dir_path, fs::Permissions::from_mode(mode));
	match (result, restored) {
		(Ok(v), Ok(())) => Ok(v),
		(Err(e), _) => Err(e),
		(Ok(_), Err(e)) => Err(e),
	}
}

/// Names the temporary files used while a file is being assembled.
#[derive(Debug, Clone)]
pub struct TempNamer {
	prefix: &'static str,
	suffix: &'static str,
}

impl Default for TempNamer {
	fn default() -> Self {
		TempNamer { prefix: ".~psync~", suffix: ".tmp" }
	}
}

impl TempNamer {
	/// Temporary name next to `name`, in the same directory.
	pub fn temp_name(&self, name: &str) -> String {
		let dir = parent_of(name);
		let base = if dir.is_empty() { name } else { &name[dir.len() + 1..] };
		if dir.is_empty() {
			format!("{}{}{}", self.prefix, base, self.suffix)
		} else {
			format!("{}/{}{}{}", dir, self.prefix, base, self.suffix)
		}
	}

	pub fn is_temporary(&self, name: &str) -> bool {
		let base = match name.rfind('/') {
			Some(i) => &name[i + 1..],
			None => name,
		};
		base.starts_with(self.prefix) && base.ends_with(self.suffix)
	}
}


// vim: ts=4
