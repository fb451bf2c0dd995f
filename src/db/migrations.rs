//! Ordered, forward-only schema migrations.
//!
//! On startup the caller reads the stored version and runs `migrate` with
//! the local device record; every step rewrites what it must and stamps the
//! next version. All steps run inside one write transaction, so a crash
//! mid-migration rolls the store back to where it started. Downgrades are
//! refused.

use crate::db::{decode, encode, prefix, records, Txn};
use crate::error::DbError;
use crate::logging::*;

/// Current schema version
pub const VERSION: u32 = 3;

/// Brings a store at schema `from` up to [`VERSION`] and commits
pub fn migrate(
	mut from: u32,
	local_key: &[u8],
	local: &records::Device,
	txn: Txn,
) -> Result<(), DbError> {
	while from != VERSION {
		if let Err(e) = do_migrate(from, local_key, local, &txn) {
			txn.abort()?;
			return Err(e);
		}
		from += 1;
	}
	txn.commit()
}

fn do_migrate(from: u32, local_key: &[u8], local: &records::Device, txn: &Txn) -> Result<(), DbError> {
	debug!("migrating database schema {} -> {}", from, from + 1);
	match from {
		0 => migrate_0(local_key, local, txn),
		1 => migrate_1(local_key, txn),
		2 => migrate_2(txn),
		_ => Err(DbError::CannotDowngrade { from, supported: VERSION }),
	}
}

/// Initial layout: anchors for every prefix plus the local device record
fn migrate_0(local_key: &[u8], local: &records::Device, txn: &Txn) -> Result<(), DbError> {
	txn.put_version(1)?;
	for p in prefix::ALL {
		txn.put(&[p], &[0])?;
	}
	txn.put(local_key, &encode(local, "device")?)
}

/// Every folder-info gains the key of the device that introduced it
fn migrate_1(local_key: &[u8], txn: &Txn) -> Result<(), DbError> {
	for (key, value) in txn.load_prefix(prefix::FOLDER_INFO)? {
		let mut rec: records::FolderInfo = decode(&value, "folder-info")?;
		rec.introducer_device_key = local_key.to_vec();
		txn.put(&key, &encode(&rec, "folder-info")?)?;
	}
	txn.put_version(2)
}

/// Block records shrink from weak-hash-plus-size to size only
fn migrate_2(txn: &Txn) -> Result<(), DbError> {
	for (key, value) in txn.load_prefix(prefix::BLOCK_INFO)? {
		let Ok(legacy) = decode::<records::LegacyBlockInfo>(&value, "block-info") else {
			continue;
		};
		let rec = records::BlockInfo { size: legacy.size };
		txn.put(&key, &encode(&rec, "block-info")?)?;
	}
	txn.put_version(VERSION)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::Db;
	use tempfile::TempDir;

	fn local() -> (Vec<u8>, records::Device) {
		let mut key = vec![prefix::DEVICE];
		key.extend_from_slice(&[0xAA; 32]);
		(key, records::Device { name: "local".to_string(), ..records::Device::default() })
	}

	#[test]
	fn test_fresh_store_migrates_to_current() {
		let tmp = TempDir::new().unwrap();
		let db = Db::open(&tmp.path().join("m.redb")).unwrap();
		let (key, device) = local();

		migrate(0, &key, &device, db.begin_write().unwrap()).unwrap();

		assert_eq!(db.version().unwrap(), VERSION);
		for p in prefix::ALL {
			assert_eq!(db.get(&[p]).unwrap(), Some(vec![0]));
		}
		let stored: records::Device = decode(&db.get(&key).unwrap().unwrap(), "device").unwrap();
		assert_eq!(stored.name, "local");
	}

	#[test]
	fn test_downgrade_refused() {
		let tmp = TempDir::new().unwrap();
		let db = Db::open(&tmp.path().join("m.redb")).unwrap();
		let (key, device) = local();

		let r = migrate(VERSION + 1, &key, &device, db.begin_write().unwrap());
		assert!(matches!(r, Err(DbError::CannotDowngrade { .. })));
	}

	#[test]
	fn test_up_to_date_store_is_noop() {
		let tmp = TempDir::new().unwrap();
		let db = Db::open(&tmp.path().join("m.redb")).unwrap();
		let (key, device) = local();
		migrate(0, &key, &device, db.begin_write().unwrap()).unwrap();
		migrate(VERSION, &key, &device, db.begin_write().unwrap()).unwrap();
		assert_eq!(db.version().unwrap(), VERSION);
	}

	#[test]
	fn test_block_records_coerced() {
		let tmp = TempDir::new().unwrap();
		let db = Db::open(&tmp.path().join("m.redb")).unwrap();
		let (key, device) = local();

		// a legacy block record written under schema 2
		let mut block_key = vec![prefix::BLOCK_INFO];
		block_key.extend_from_slice(&[0x42; 32]);
		{
			let txn = db.begin_write().unwrap();
			txn.put_version(2).unwrap();
			let legacy = records::LegacyBlockInfo { weak_hash: 77, size: 4096 };
			txn.put(&block_key, &encode(&legacy, "block-info").unwrap()).unwrap();
			txn.commit().unwrap();
		}

		migrate(2, &key, &device, db.begin_write().unwrap()).unwrap();

		let rec: records::BlockInfo =
			decode(&db.get(&block_key).unwrap().unwrap(), "block-info").unwrap();
		assert_eq!(rec.size, 4096);
		assert_eq!(db.version().unwrap(), VERSION);
	}

	#[test]
	fn test_folder_infos_gain_introducer_key() {
		let tmp = TempDir::new().unwrap();
		let db = Db::open(&tmp.path().join("m.redb")).unwrap();
		let (key, device) = local();

		let mut fi_key = vec![prefix::FOLDER_INFO];
		fi_key.extend_from_slice(&[1; 32]);
		fi_key.extend_from_slice(&[2; 16]);
		fi_key.extend_from_slice(&[3; 16]);
		{
			let txn = db.begin_write().unwrap();
			txn.put_version(1).unwrap();
			let rec = records::FolderInfo { index_id: 5, max_sequence: 9, ..Default::default() };
			txn.put(&fi_key, &encode(&rec, "folder-info").unwrap()).unwrap();
			txn.commit().unwrap();
		}

		migrate(1, &key, &device, db.begin_write().unwrap()).unwrap();

		let rec: records::FolderInfo =
			decode(&db.get(&fi_key).unwrap().unwrap(), "folder-info").unwrap();
		assert_eq!(rec.index_id, 5);
		assert_eq!(rec.introducer_device_key, key);
		assert_eq!(db.version().unwrap(), VERSION);
	}
}

// vim: ts=4
