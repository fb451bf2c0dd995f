//! Folder definitions and their per-device replicas map.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::records::{self, FolderType, PullOrder};
use crate::db::prefix;
use crate::error::ModelError;
use crate::model::device::DeviceMap;
use crate::model::folder_info::FolderInfoMap;
use crate::model::{DeviceSha, UUID_LENGTH};
use crate::proto;

/// Configured folder fields, as persisted and exchanged
#[derive(Debug, Clone, Default)]
pub struct FolderData {
	pub id: String,
	pub label: String,
	pub path: PathBuf,
	pub folder_type: FolderType,
	pub pull_order: PullOrder,
	pub rescan_interval: u32,
	pub read_only: bool,
	pub ignore_permissions: bool,
	pub ignore_delete: bool,
	pub disable_temp_indexes: bool,
	pub paused: bool,
	pub scheduled: bool,
}

impl FolderData {
	pub fn from_record(rec: &records::Folder) -> Self {
		FolderData {
			id: rec.id.clone(),
			label: rec.label.clone(),
			path: PathBuf::from(&rec.path),
			folder_type: rec.folder_type,
			pull_order: rec.pull_order,
			rescan_interval: rec.rescan_interval,
			read_only: rec.read_only,
			ignore_permissions: rec.ignore_permissions,
			ignore_delete: rec.ignore_delete,
			disable_temp_indexes: rec.disable_temp_indexes,
			paused: rec.paused,
			scheduled: rec.scheduled,
		}
	}

	pub fn as_record(&self) -> records::Folder {
		records::Folder {
			id: self.id.clone(),
			label: self.label.clone(),
			read_only: self.read_only,
			ignore_permissions: self.ignore_permissions,
			ignore_delete: self.ignore_delete,
			disable_temp_indexes: self.disable_temp_indexes,
			paused: self.paused,
			scheduled: self.scheduled,
			path: self.path.to_string_lossy().into_owned(),
			folder_type: self.folder_type,
			pull_order: self.pull_order,
			rescan_interval: self.rescan_interval,
		}
	}
}

/// A labeled directory tree replicated among a subset of devices
#[derive(Debug)]
pub struct Folder {
	uuid: Uuid,
	data: FolderData,
	folder_infos: FolderInfoMap,
	scan_start: Option<DateTime<Utc>>,
	scan_finish: Option<DateTime<Utc>>,
	synchronizing: i32,
	suspended: bool,
}

impl Folder {
	pub fn new(uuid: Uuid, record: &records::Folder) -> Result<Self, ModelError> {
		if record.id.is_empty() {
			return Err(ModelError::EmptyFolderName);
		}
		Ok(Folder {
			uuid,
			data: FolderData::from_record(record),
			folder_infos: FolderInfoMap::new(),
			scan_start: None,
			scan_finish: None,
			synchronizing: 0,
			suspended: false,
		})
	}

	/// Restores a folder from its persisted key and record
	pub fn from_key(key: &[u8], record: &records::Folder) -> Result<Self, ModelError> {
		let expected = 1 + UUID_LENGTH;
		if key.len() != expected {
			return Err(ModelError::InvalidKeyLength { expected, actual: key.len() });
		}
		if key[0] != prefix::FOLDER {
			return Err(ModelError::InvalidKeyPrefix { expected: prefix::FOLDER, actual: key[0] });
		}
		let uuid = Uuid::from_slice(&key[1..])
			.map_err(|_| ModelError::MalformedRecord { entity: "folder" })?;
		Self::new(uuid, record)
	}

	pub fn uuid(&self) -> Uuid {
		self.uuid
	}

	/// The persistent key: prefix byte plus uuid
	pub fn db_key(&self) -> Vec<u8> {
		let mut key = Vec::with_capacity(1 + UUID_LENGTH);
		key.push(prefix::FOLDER);
		key.extend_from_slice(self.uuid.as_bytes());
		key
	}

	pub fn id(&self) -> &str {
		&self.data.id
	}

	pub fn label(&self) -> &str {
		&self.data.label
	}

	pub fn data(&self) -> &FolderData {
		&self.data
	}

	pub fn data_mut(&mut self) -> &mut FolderData {
		&mut self.data
	}

	pub fn folder_type(&self) -> FolderType {
		self.data.folder_type
	}

	pub fn pull_order(&self) -> PullOrder {
		self.data.pull_order
	}

	pub fn is_paused(&self) -> bool {
		self.data.paused
	}

	pub fn is_scheduled(&self) -> bool {
		self.data.scheduled
	}

	pub fn folder_infos(&self) -> &FolderInfoMap {
		&self.folder_infos
	}

	pub fn folder_infos_mut(&mut self) -> &mut FolderInfoMap {
		&mut self.folder_infos
	}

	/// The replica of `device`, when the folder is shared with it
	pub fn is_shared_with(&self, device: &DeviceSha) -> Option<Uuid> {
		self.folder_infos.by_device(device).map(|fi| fi.uuid())
	}

	pub fn as_record(&self) -> records::Folder {
		self.data.as_record()
	}

	/// Renders the BEP Folder message for `target`, with one entry per
	/// sharing device, or nothing when the folder is not shared with it
	pub fn generate(&self, target: &DeviceSha, devices: &DeviceMap) -> Option<proto::Folder> {
		self.is_shared_with(target)?;

		let mut msg = proto::Folder {
			id: self.data.id.clone(),
			label: self.data.label.clone(),
			read_only: self.data.read_only,
			ignore_permissions: self.data.ignore_permissions,
			ignore_delete: self.data.ignore_delete,
			disable_temp_indexes: self.data.disable_temp_indexes,
			paused: self.data.paused,
			devices: Vec::new(),
		};
		for fi in self.folder_infos.iter() {
			let Some(device) = devices.by_sha256(fi.device()) else { continue };
			msg.devices.push(proto::Device {
				id: fi.device().to_vec(),
				name: device.name().to_string(),
				addresses: Vec::new(),
				compression: device.compression(),
				cert_name: device.cert_name().unwrap_or("").to_string(),
				max_sequence: fi.max_sequence(),
				introducer: device.is_introducer(),
				index_id: fi.index_id(),
				skip_introduction_removals: device.skip_introduction_removals(),
			});
		}
		Some(msg)
	}

	pub fn scan_start(&self) -> Option<DateTime<Utc>> {
		self.scan_start
	}

	pub fn set_scan_start(&mut self, value: DateTime<Utc>) {
		self.scan_start = Some(value);
	}

	pub fn scan_finish(&self) -> Option<DateTime<Utc>> {
		self.scan_finish
	}

	pub fn set_scan_finish(&mut self, value: DateTime<Utc>) {
		debug_assert!(self.scan_start.is_some());
		self.scan_finish = Some(value);
	}

	/// A scan is running when it started and has not finished since
	pub fn is_scanning(&self) -> bool {
		match (self.scan_start, self.scan_finish) {
			(None, _) => false,
			(Some(_), None) => true,
			(Some(start), Some(finish)) => start > finish,
		}
	}

	pub fn is_synchronizing(&self) -> bool {
		self.synchronizing > 0
	}

	/// Tracks how many transfer sessions currently touch this folder
	pub fn adjust_synchronization(&mut self, delta: i32) {
		self.synchronizing += delta;
		debug_assert!(self.synchronizing >= 0);
	}

	pub fn is_suspended(&self) -> bool {
		self.suspended
	}

	pub fn mark_suspended(&mut self, value: bool) {
		self.suspended = value;
	}
}

/// Folders of the cluster, indexed by uuid and by folder-id string
#[derive(Debug, Default)]
pub struct FolderMap {
	by_uuid: std::collections::BTreeMap<Uuid, Folder>,
	by_id: std::collections::HashMap<String, Uuid>,
}

impl FolderMap {
	pub fn new() -> Self {
		FolderMap::default()
	}

	pub fn put(&mut self, folder: Folder) {
		self.by_id.insert(folder.id().to_string(), folder.uuid());
		self.by_uuid.insert(folder.uuid(), folder);
	}

	pub fn by_uuid(&self, uuid: &Uuid) -> Option<&Folder> {
		self.by_uuid.get(uuid)
	}

	pub fn by_uuid_mut(&mut self, uuid: &Uuid) -> Option<&mut Folder> {
		self.by_uuid.get_mut(uuid)
	}

	pub fn by_id(&self, id: &str) -> Option<&Folder> {
		self.by_id.get(id).and_then(|uuid| self.by_uuid.get(uuid))
	}

	pub fn by_id_mut(&mut self, id: &str) -> Option<&mut Folder> {
		let uuid = *self.by_id.get(id)?;
		self.by_uuid.get_mut(&uuid)
	}

	pub fn remove(&mut self, uuid: &Uuid) -> Option<Folder> {
		let folder = self.by_uuid.remove(uuid)?;
		self.by_id.remove(folder.id());
		Some(folder)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Folder> {
		self.by_uuid.values()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Folder> {
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

	fn record(id: &str) -> records::Folder {
		records::Folder { id: id.to_string(), label: id.to_uppercase(), ..Default::default() }
	}

	#[test]
	fn test_empty_id_rejected() {
		let r = Folder::new(Uuid::new_v4(), &records::Folder::default());
		assert!(matches!(r, Err(ModelError::EmptyFolderName)));
	}

	#[test]
	fn test_key_round_trip() {
		let folder = Folder::new(Uuid::new_v4(), &record("docs")).unwrap();
		let key = folder.db_key();
		assert_eq!(key.len(), 17);
		assert_eq!(key[0], prefix::FOLDER);
		let restored = Folder::from_key(&key, &folder.as_record()).unwrap();
		assert_eq!(restored.uuid(), folder.uuid());
		assert_eq!(restored.id(), "docs");
	}

	#[test]
	fn test_is_scanning() {
		let mut folder = Folder::new(Uuid::new_v4(), &record("docs")).unwrap();
		assert!(!folder.is_scanning());

		let t0 = Utc::now();
		folder.set_scan_start(t0);
		assert!(folder.is_scanning());

		folder.set_scan_finish(t0 + chrono::Duration::seconds(1));
		assert!(!folder.is_scanning());

		folder.set_scan_start(t0 + chrono::Duration::seconds(2));
		assert!(folder.is_scanning());
	}

	#[test]
	fn test_synchronizing_counter() {
		let mut folder = Folder::new(Uuid::new_v4(), &record("docs")).unwrap();
		assert!(!folder.is_synchronizing());
		folder.adjust_synchronization(1);
		folder.adjust_synchronization(1);
		assert!(folder.is_synchronizing());
		folder.adjust_synchronization(-1);
		assert!(folder.is_synchronizing());
		folder.adjust_synchronization(-1);
		assert!(!folder.is_synchronizing());
	}

	#[test]
	fn test_map_indexes() {
		let mut map = FolderMap::new();
		let folder = Folder::new(Uuid::new_v4(), &record("music")).unwrap();
		let uuid = folder.uuid();
		map.put(folder);
		assert!(map.by_id("music").is_some());
		assert!(map.by_uuid(&uuid).is_some());
		map.remove(&uuid);
		assert!(map.by_id("music").is_none());
	}
}

// vim: ts=4
