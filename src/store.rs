//! Ordered key-value store
//!
//! The index is written against the byte-oriented [`Backend`] trait. The
//! redb implementation keeps everything in a single table. A [`Transaction`]
//! buffers writes, serves its own pending writes back on reads, and commits
//! them as one atomic batch.

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{store_err, StoreError};

/// Key: raw index key, Value: encoded record
const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Set of writes applied atomically. `None` deletes the key.
#[derive(Debug, Default)]
pub struct Batch {
	ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl Batch {
	pub fn new() -> Self {
		Batch::default()
	}

	pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
		self.ops.push((key, Some(value)));
	}

	pub fn delete(&mut self, key: Vec<u8>) {
		self.ops.push((key, None));
	}

	pub fn len(&self) -> usize {
		self.ops.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}
}

pub trait Backend: Send + Sync {
	fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

	/// All pairs whose key starts with `prefix`, in key order.
	fn prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

	/// Apply all writes or none.
	fn write_batch(&self, batch: Batch) -> Result<(), StoreError>;

	fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
		Ok(self.get(key)?.is_some())
	}

	fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
		let mut batch = Batch::new();
		batch.put(key.to_vec(), value.to_vec());
		self.write_batch(batch)
	}

	fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
		let mut batch = Batch::new();
		batch.delete(key.to_vec());
		self.write_batch(batch)
	}
}

/// Store backed by a redb database
pub struct RedbBackend {
	db: redb::Database,
}

impl RedbBackend {
	/// Open or create a database file
	pub fn open(path: &Path) -> Result<Self, StoreError> {
		let db = redb::Database::create(path).map_err(store_err)?;
		Self::with_database(db)
	}

	/// Database living only in memory
	pub fn in_memory() -> Result<Self, StoreError> {
		let db = redb::Database::builder()
			.create_with_backend(redb::backends::InMemoryBackend::new())
			.map_err(store_err)?;
		Self::with_database(db)
	}

	fn with_database(db: redb::Database) -> Result<Self, StoreError> {
		// Read transactions fail on missing tables, so create it up front
		let write_txn = db.begin_write().map_err(store_err)?;
		{
			let _ = write_txn.open_table(KV_TABLE).map_err(store_err)?;
		}
		write_txn.commit().map_err(store_err)?;
		Ok(RedbBackend { db })
	}
}

impl Backend for RedbBackend {
	fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
		let read_txn = self.db.begin_read().map_err(store_err)?;
		let table = read_txn.open_table(KV_TABLE).map_err(store_err)?;
		let value = table.get(key).map_err(store_err)?;
		Ok(value.map(|v| v.value().to_vec()))
	}

	fn prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
		let read_txn = self.db.begin_read().map_err(store_err)?;
		let table = read_txn.open_table(KV_TABLE).map_err(store_err)?;

		let mut out = Vec::new();
		for item in table.range::<&[u8]>(prefix..).map_err(store_err)? {
			let (k, v) = item.map_err(store_err)?;
			let key = k.value();
			if !key.starts_with(prefix) {
				break;
			}
			out.push((key.to_vec(), v.value().to_vec()));
		}
		Ok(out)
	}

	fn write_batch(&self, batch: Batch) -> Result<(), StoreError> {
		if batch.is_empty() {
			return Ok(());
		}
		let write_txn = self.db.begin_write().map_err(store_err)?;
		{
			let mut table = write_txn.open_table(KV_TABLE).map_err(store_err)?;
			for (key, value) in &batch.ops {
				match value {
					Some(v) => {
						table.insert(key.as_slice(), v.as_slice()).map_err(store_err)?;
					}
					None => {
						table.remove(key.as_slice()).map_err(store_err)?;
					}
				}
			}
		}
		write_txn.commit().map_err(store_err)?;
		Ok(())
	}
}

/// Buffered writes over a backend with read-your-writes semantics.
pub struct Transaction<'a> {
	backend: &'a dyn Backend,
	pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> Transaction<'a> {
	pub fn new(backend: &'a dyn Backend) -> Self {
		Transaction { backend, pending: BTreeMap::new() }
	}

	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
		match self.pending.get(key) {
			Some(v) => Ok(v.clone()),
			None => self.backend.get(key),
		}
	}

	pub fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
		match self.pending.get(key) {
			Some(v) => Ok(v.is_some()),
			None => self.backend.has(key),
		}
	}

	pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
		self.pending.insert(key, Some(value));
	}

	pub fn delete(&mut self, key: Vec<u8>) {
		self.pending.insert(key, None);
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Write everything buffered in one batch. Dropping without commit discards.
	pub fn commit(self) -> Result<(), StoreError> {
		let mut batch = Batch::new();
		for (key, value) in self.pending {
			match value {
				Some(v) => batch.put(key, v),
				None => batch.delete(key),
			}
		}
		self.backend.write_batch(batch)
	}
}


// vim: ts=4
