//! Key-value persistence backed by redb.
//!
//! Every entity lives in one logical table with ordered byte keys. The
//! first key byte is a type discriminator; the rest identifies the entity.
//! One writer at a time; readers see the last committed state. A write
//! transaction left open commits when it is dropped, so a batch of model
//! mutations persists atomically on every exit path.

pub mod migrations;
pub mod records;

use std::path::Path;

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DbError;
use crate::logging::*;

/// One-byte key discriminators
pub mod prefix {
	pub const MISC: u8 = 0x01;
	pub const DEVICE: u8 = 0x10;
	pub const FOLDER: u8 = 0x11;
	pub const FOLDER_INFO: u8 = 0x12;
	pub const FILE_INFO: u8 = 0x13;
	pub const IGNORED_DEVICE: u8 = 0x14;
	pub const IGNORED_FOLDER: u8 = 0x15;
	pub const PENDING_FOLDER: u8 = 0x16;
	pub const BLOCK_INFO: u8 = 0x17;
	pub const PENDING_DEVICE: u8 = 0x18;

	/// Every entity prefix, in key order
	pub const ALL: [u8; 9] = [
		DEVICE,
		FOLDER,
		FOLDER_INFO,
		FILE_INFO,
		IGNORED_DEVICE,
		IGNORED_FOLDER,
		PENDING_FOLDER,
		BLOCK_INFO,
		PENDING_DEVICE,
	];
}

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entities");

const DB_VERSION: &str = "db_version";

/// Builds a misc-table key: `0x01 || name`
pub fn misc_key(name: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(1 + name.len());
	key.push(prefix::MISC);
	key.extend_from_slice(name.as_bytes());
	key
}

/// Serializes a record for storage
pub fn encode<T: Serialize>(value: &T, entity: &'static str) -> Result<Vec<u8>, DbError> {
	bincode::serialize(value).map_err(|_| DbError::Encode { entity })
}

/// Restores a record from storage
pub fn decode<T: DeserializeOwned>(bytes: &[u8], entity: &'static str) -> Result<T, DbError> {
	bincode::deserialize(bytes).map_err(|_| DbError::Decode { entity })
}

/// The store
pub struct Db {
	db: redb::Database,
}

impl Db {
	/// Opens or creates the database file and makes sure the table exists
	pub fn open(path: &Path) -> Result<Self, DbError> {
		let db = redb::Database::create(path)?;
		{
			let txn = db.begin_write()?;
			txn.open_table(TABLE)?;
			txn.commit()?;
		}
		Ok(Db { db })
	}

	/// Starts the single read-write transaction
	pub fn begin_write(&self) -> Result<Txn, DbError> {
		Ok(Txn { txn: Some(self.db.begin_write()?) })
	}

	/// Schema version of the stored data; 0 when the store is fresh
	pub fn version(&self) -> Result<u32, DbError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TABLE)?;
		let key = misc_key(DB_VERSION);
		match table.get(key.as_slice())? {
			Some(guard) => decode_version(guard.value()),
			None => Ok(0),
		}
	}

	/// Point lookup outside of any write transaction
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TABLE)?;
		Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
	}

	/// All entity pairs under one prefix, in key order, anchors excluded
	pub fn load_prefix(&self, prefix: u8) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TABLE)?;
		let lo = [prefix];
		let hi = [prefix + 1];
		let mut out = Vec::new();
		for item in table.range::<&[u8]>(lo.as_slice()..hi.as_slice())? {
			let (k, v) = item?;
			if k.value().len() > 1 {
				out.push((k.value().to_vec(), v.value().to_vec()));
			}
		}
		Ok(out)
	}
}

fn decode_version(bytes: &[u8]) -> Result<u32, DbError> {
	let arr: [u8; 4] = bytes
		.try_into()
		.map_err(|_| DbError::VersionSizeMismatch { actual: bytes.len() })?;
	Ok(u32::from_be_bytes(arr))
}

/// The read-write transaction
///
/// Commits on [`commit`](Txn::commit) or, failing that, on drop.
pub struct Txn {
	txn: Option<redb::WriteTransaction>,
}

impl Txn {
	fn inner(&self) -> Result<&redb::WriteTransaction, DbError> {
		self.txn
			.as_ref()
			.ok_or_else(|| DbError::Backend { message: "transaction already closed".to_string() })
	}

	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
		let mut table = self.inner()?.open_table(TABLE)?;
		table.insert(key, value)?;
		Ok(())
	}

	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
		let table = self.inner()?.open_table(TABLE)?;
		let result = table.get(key)?.map(|guard| guard.value().to_vec());
		Ok(result)
	}

	pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
		let mut table = self.inner()?.open_table(TABLE)?;
		table.remove(key)?;
		Ok(())
	}

	/// All entity pairs under one prefix, in key order, anchors excluded
	pub fn load_prefix(&self, prefix: u8) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
		let table = self.inner()?.open_table(TABLE)?;
		let lo = [prefix];
		let hi = [prefix + 1];
		let mut out = Vec::new();
		for item in table.range::<&[u8]>(lo.as_slice()..hi.as_slice())? {
			let (k, v) = item?;
			if k.value().len() > 1 {
				out.push((k.value().to_vec(), v.value().to_vec()));
			}
		}
		Ok(out)
	}

	pub fn version(&self) -> Result<u32, DbError> {
		match self.get(&misc_key(DB_VERSION))? {
			Some(bytes) => decode_version(&bytes),
			None => Ok(0),
		}
	}

	pub fn put_version(&self, version: u32) -> Result<(), DbError> {
		self.put(&misc_key(DB_VERSION), &version.to_be_bytes())
	}

	/// Auto-increment sequence for one logical table
	pub fn next_sequence(&self, prefix: u8) -> Result<u64, DbError> {
		let key = misc_key(&format!("seq_{:02x}", prefix));
		let current = match self.get(&key)? {
			Some(bytes) => {
				let arr: [u8; 8] = bytes
					.as_slice()
					.try_into()
					.map_err(|_| DbError::Decode { entity: "sequence" })?;
				u64::from_be_bytes(arr)
			}
			None => 0,
		};
		let next = current + 1;
		self.put(&key, &next.to_be_bytes())?;
		Ok(next)
	}

	/// Commits explicitly, surfacing the error
	pub fn commit(mut self) -> Result<(), DbError> {
		match self.txn.take() {
			Some(txn) => Ok(txn.commit()?),
			None => Ok(()),
		}
	}

	/// Rolls every pending write back
	pub fn abort(mut self) -> Result<(), DbError> {
		match self.txn.take() {
			Some(txn) => Ok(txn.abort()?),
			None => Ok(()),
		}
	}
}

impl Drop for Txn {
	fn drop(&mut self) {
		if let Some(txn) = self.txn.take() {
			if let Err(e) = txn.commit() {
				debug!("implicit transaction commit failed: {}", e);
			}
		}
	}
}


// vim: ts=4
