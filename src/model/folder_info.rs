//! One device's replica state of a folder.
//!
//! A folder-info carries the replica's `index_id` (a random marker that
//! changes when the peer resets its index) and `max_sequence`, the highest
//! file sequence observed. It owns the replica's file map. Invariant: every
//! file's sequence is at most `max_sequence`.

use uuid::Uuid;

use crate::db::prefix;
use crate::db::records;
use crate::error::ModelError;
use crate::model::block::BlockMap;
use crate::model::file_info::{FileInfo, FileMap};
use crate::model::{DeviceSha, UUID_LENGTH};

const KEY_LENGTH: usize = 1 + 32 + UUID_LENGTH * 2;

/// Per-device replica of a folder
#[derive(Debug)]
pub struct FolderInfo {
	uuid: Uuid,
	device: DeviceSha,
	folder: Uuid,
	index_id: u64,
	max_sequence: i64,
	introducer_device_key: Vec<u8>,
	files: FileMap,
}

impl FolderInfo {
	pub fn new(uuid: Uuid, device: DeviceSha, folder: Uuid, index_id: u64, max_sequence: i64) -> Self {
		FolderInfo {
			uuid,
			device,
			folder,
			index_id,
			max_sequence,
			introducer_device_key: Vec::new(),
			files: FileMap::new(),
		}
	}

	/// Restores a replica from its persisted key and record
	///
	/// The key layout is `prefix || device-sha256 || folder-uuid ||
	/// folder-info-uuid`; device and folder must match the owners.
	pub fn from_key(
		key: &[u8],
		record: &records::FolderInfo,
		device: &DeviceSha,
		folder: Uuid,
	) -> Result<Self, ModelError> {
		if key.len() != KEY_LENGTH {
			return Err(ModelError::InvalidKeyLength { expected: KEY_LENGTH, actual: key.len() });
		}
		if key[0] != prefix::FOLDER_INFO {
			return Err(ModelError::InvalidKeyPrefix {
				expected: prefix::FOLDER_INFO,
				actual: key[0],
			});
		}
		if key[1..33] != device[..] || key[33..33 + UUID_LENGTH] != folder.as_bytes()[..] {
			return Err(ModelError::MalformedRecord { entity: "folder-info" });
		}
		let uuid = Uuid::from_slice(&key[33 + UUID_LENGTH..])
			.map_err(|_| ModelError::MalformedRecord { entity: "folder-info" })?;
		let mut fi = FolderInfo::new(uuid, *device, folder, record.index_id, record.max_sequence);
		fi.introducer_device_key = record.introducer_device_key.clone();
		Ok(fi)
	}

	pub fn uuid(&self) -> Uuid {
		self.uuid
	}

	pub fn device(&self) -> &DeviceSha {
		&self.device
	}

	pub fn folder(&self) -> Uuid {
		self.folder
	}

	/// The persistent composite key
	pub fn db_key(&self) -> Vec<u8> {
		let mut key = Vec::with_capacity(KEY_LENGTH);
		key.push(prefix::FOLDER_INFO);
		key.extend_from_slice(&self.device);
		key.extend_from_slice(self.folder.as_bytes());
		key.extend_from_slice(self.uuid.as_bytes());
		key
	}

	pub fn index_id(&self) -> u64 {
		self.index_id
	}

	/// Adopts a new index id; a change means the peer reset the replica,
	/// so every known file of it is stale and dropped
	pub fn set_index(&mut self, value: u64, blocks: &mut BlockMap) {
		if value != self.index_id {
			self.index_id = value;
			self.files.clear(blocks);
		}
	}

	pub fn max_sequence(&self) -> i64 {
		self.max_sequence
	}

	pub fn set_max_sequence(&mut self, value: i64) {
		self.max_sequence = value;
	}

	pub fn files(&self) -> &FileMap {
		&self.files
	}

	pub fn files_mut(&mut self) -> &mut FileMap {
		&mut self.files
	}

	/// Inserts a file, optionally advancing `max_sequence`
	pub fn add(&mut self, file: FileInfo, inc_max_sequence: bool) {
		let seq = file.sequence();
		if inc_max_sequence && seq > self.max_sequence {
			self.max_sequence = seq;
		} else {
			debug_assert!(seq <= self.max_sequence);
		}
		self.files.put(file);
	}

	pub fn introducer_device_key(&self) -> &[u8] {
		&self.introducer_device_key
	}

	pub fn set_introducer_device_key(&mut self, key: Vec<u8>) {
		self.introducer_device_key = key;
	}

	pub fn as_record(&self) -> records::FolderInfo {
		records::FolderInfo {
			index_id: self.index_id,
			max_sequence: self.max_sequence,
			introducer_device_key: self.introducer_device_key.clone(),
		}
	}
}

/// Replicas of one folder, indexed by uuid and by device
#[derive(Debug, Default)]
pub struct FolderInfoMap {
	by_uuid: std::collections::BTreeMap<Uuid, FolderInfo>,
	by_device: std::collections::HashMap<DeviceSha, Uuid>,
}

impl FolderInfoMap {
	pub fn new() -> Self {
		FolderInfoMap::default()
	}

	pub fn put(&mut self, folder_info: FolderInfo) {
		self.by_device.insert(*folder_info.device(), folder_info.uuid());
		self.by_uuid.insert(folder_info.uuid(), folder_info);
	}

	pub fn by_uuid(&self, uuid: &Uuid) -> Option<&FolderInfo> {
		self.by_uuid.get(uuid)
	}

	pub fn by_uuid_mut(&mut self, uuid: &Uuid) -> Option<&mut FolderInfo> {
		self.by_uuid.get_mut(uuid)
	}

	pub fn by_device(&self, device: &DeviceSha) -> Option<&FolderInfo> {
		self.by_device.get(device).and_then(|uuid| self.by_uuid.get(uuid))
	}

	pub fn by_device_mut(&mut self, device: &DeviceSha) -> Option<&mut FolderInfo> {
		let uuid = *self.by_device.get(device)?;
		self.by_uuid.get_mut(&uuid)
	}

	pub fn remove(&mut self, uuid: &Uuid) -> Option<FolderInfo> {
		let fi = self.by_uuid.remove(uuid)?;
		self.by_device.remove(fi.device());
		Some(fi)
	}

	pub fn iter(&self) -> impl Iterator<Item = &FolderInfo> {
		self.by_uuid.values()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FolderInfo> {
		self.by_uuid.values_mut()
	}

	pub fn len(&self) -> usize {
		self.by_uuid.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_uuid.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::path_cache::PathCache;
	use crate::proto;

	fn file(paths: &mut PathCache, fi: Uuid, name: &str, sequence: i64) -> FileInfo {
		let msg = proto::FileInfo {
			name: name.to_string(),
			version: proto::Vector { counters: vec![proto::Counter { id: 1, value: 1 }] },
			sequence,
			..Default::default()
		};
		FileInfo::from_proto(Uuid::new_v4(), &msg, fi, paths).unwrap()
	}

	#[test]
	fn test_key_round_trip() {
		let device = [7u8; 32];
		let folder = Uuid::new_v4();
		let fi = FolderInfo::new(Uuid::new_v4(), device, folder, 42, 10);
		let key = fi.db_key();
		assert_eq!(key.len(), 65);
		let restored = FolderInfo::from_key(&key, &fi.as_record(), &device, folder).unwrap();
		assert_eq!(restored.uuid(), fi.uuid());
		assert_eq!(restored.index_id(), 42);
		assert_eq!(restored.max_sequence(), 10);
	}

	#[test]
	fn test_mismatched_owner_rejected() {
		let device = [7u8; 32];
		let folder = Uuid::new_v4();
		let fi = FolderInfo::new(Uuid::new_v4(), device, folder, 42, 10);
		let key = fi.db_key();
		let other = [8u8; 32];
		assert!(FolderInfo::from_key(&key, &fi.as_record(), &other, folder).is_err());
	}

	#[test]
	fn test_add_tracks_max_sequence() {
		let mut paths = PathCache::new();
		let mut fi = FolderInfo::new(Uuid::new_v4(), [1; 32], Uuid::new_v4(), 1, 0);
		fi.add(file(&mut paths, fi.uuid(), "a", 1), true);
		fi.add(file(&mut paths, fi.uuid(), "b", 5), true);
		assert_eq!(fi.max_sequence(), 5);
		// every file sequence stays at or below max_sequence
		for f in fi.files().iter() {
			assert!(f.sequence() <= fi.max_sequence());
		}
	}

	#[test]
	fn test_index_change_resets_files() {
		let mut paths = PathCache::new();
		let mut blocks = BlockMap::new();
		let mut fi = FolderInfo::new(Uuid::new_v4(), [1; 32], Uuid::new_v4(), 1, 0);
		fi.add(file(&mut paths, fi.uuid(), "a", 1), true);
		assert_eq!(fi.files().len(), 1);

		fi.set_index(1, &mut blocks);
		assert_eq!(fi.files().len(), 1);

		fi.set_index(2, &mut blocks);
		assert_eq!(fi.files().len(), 0);
		assert_eq!(fi.index_id(), 2);
	}

	#[test]
	fn test_map_by_device() {
		let folder = Uuid::new_v4();
		let mut map = FolderInfoMap::new();
		map.put(FolderInfo::new(Uuid::new_v4(), [1; 32], folder, 1, 0));
		map.put(FolderInfo::new(Uuid::new_v4(), [2; 32], folder, 2, 0));
		assert_eq!(map.len(), 2);
		assert_eq!(map.by_device(&[2; 32]).unwrap().index_id(), 2);
		assert!(map.by_device(&[3; 32]).is_none());
	}
}

// vim: ts=4
