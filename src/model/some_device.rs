//! Pending and ignored devices and folders.
//!
//! A pending device has knocked but was not accepted yet; an ignored one
//! was rejected and is kept so it is not offered again. Both share the
//! same lightweight record, distinguished only by their key prefix.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::records;
use crate::error::ModelError;
use crate::model::device_id::DeviceId;
use crate::model::DeviceSha;

/// A device known only by sight: pending introduction or ignored
#[derive(Debug)]
pub struct SomeDevice {
	id: DeviceId,
	name: String,
	client_name: String,
	client_version: String,
	address: String,
	last_seen: DateTime<Utc>,
}

impl SomeDevice {
	pub fn new(id: DeviceId, record: &records::SomeDevice) -> Self {
		SomeDevice {
			id,
			name: record.name.clone(),
			client_name: record.client_name.clone(),
			client_version: record.client_version.clone(),
			address: record.address.clone(),
			last_seen: DateTime::<Utc>::from_timestamp(record.last_seen, 0).unwrap_or_default(),
		}
	}

	/// Restores from a persisted key under the given prefix
	pub fn from_key(key: &[u8], prefix: u8, record: &records::SomeDevice) -> Result<Self, ModelError> {
		if key.len() != 33 {
			return Err(ModelError::InvalidKeyLength { expected: 33, actual: key.len() });
		}
		if key[0] != prefix {
			return Err(ModelError::InvalidKeyPrefix { expected: prefix, actual: key[0] });
		}
		let mut sha = [0u8; 32];
		sha.copy_from_slice(&key[1..]);
		Ok(Self::new(DeviceId::from_sha256(&sha), record))
	}

	pub fn id(&self) -> &DeviceId {
		&self.id
	}

	pub fn sha256(&self) -> &DeviceSha {
		self.id.sha256()
	}

	/// The persistent key under the given prefix
	pub fn db_key(&self, prefix: u8) -> Vec<u8> {
		let mut key = Vec::with_capacity(33);
		key.push(prefix);
		key.extend_from_slice(self.id.sha256());
		key
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn client_name(&self) -> &str {
		&self.client_name
	}

	pub fn client_version(&self) -> &str {
		&self.client_version
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	pub fn last_seen(&self) -> DateTime<Utc> {
		self.last_seen
	}

	pub fn set_last_seen(&mut self, value: DateTime<Utc>) {
		self.last_seen = value;
	}

	pub fn as_record(&self) -> records::SomeDevice {
		records::SomeDevice {
			name: self.name.clone(),
			client_name: self.client_name.clone(),
			client_version: self.client_version.clone(),
			address: self.address.clone(),
			last_seen: self.last_seen.timestamp(),
		}
	}
}

/// Pending or ignored devices, keyed by certificate digest
#[derive(Debug, Default)]
pub struct SomeDeviceMap {
	devices: BTreeMap<DeviceSha, SomeDevice>,
}

impl SomeDeviceMap {
	pub fn new() -> Self {
		SomeDeviceMap::default()
	}

	pub fn by_sha256(&self, sha: &DeviceSha) -> Option<&SomeDevice> {
		self.devices.get(sha)
	}

	pub fn put(&mut self, device: SomeDevice) {
		self.devices.insert(*device.sha256(), device);
	}

	pub fn remove(&mut self, sha: &DeviceSha) -> Option<SomeDevice> {
		self.devices.remove(sha)
	}

	pub fn iter(&self) -> impl Iterator<Item = &SomeDevice> {
		self.devices.values()
	}

	pub fn len(&self) -> usize {
		self.devices.len()
	}

	pub fn is_empty(&self) -> bool {
		self.devices.is_empty()
	}
}

/// A folder a peer offered that the user has not accepted yet
#[derive(Debug)]
pub struct PendingFolder {
	uuid: Uuid,
	device: DeviceSha,
	folder: records::Folder,
	index_id: u64,
	max_sequence: i64,
}

impl PendingFolder {
	pub fn new(
		uuid: Uuid,
		device: DeviceSha,
		folder: records::Folder,
		index_id: u64,
		max_sequence: i64,
	) -> Self {
		PendingFolder { uuid, device, folder, index_id, max_sequence }
	}

	pub fn uuid(&self) -> Uuid {
		self.uuid
	}

	pub fn device(&self) -> &DeviceSha {
		&self.device
	}

	pub fn folder_id(&self) -> &str {
		&self.folder.id
	}

	pub fn folder(&self) -> &records::Folder {
		&self.folder
	}

	pub fn index_id(&self) -> u64 {
		self.index_id
	}

	pub fn max_sequence(&self) -> i64 {
		self.max_sequence
	}

	pub fn db_key(&self) -> Vec<u8> {
		let mut key = Vec::with_capacity(17);
		key.push(crate::db::prefix::PENDING_FOLDER);
		key.extend_from_slice(self.uuid.as_bytes());
		key
	}

	pub fn as_record(&self) -> records::PendingFolder {
		records::PendingFolder {
			folder: self.folder.clone(),
			folder_info: records::FolderInfo {
				index_id: self.index_id,
				max_sequence: self.max_sequence,
				introducer_device_key: Vec::new(),
			},
		}
	}
}

/// Offered folders, looked up by uuid or by (device, folder-id)
#[derive(Debug, Default)]
pub struct PendingFolderMap {
	by_uuid: BTreeMap<Uuid, PendingFolder>,
}

impl PendingFolderMap {
	pub fn new() -> Self {
		PendingFolderMap::default()
	}

	pub fn put(&mut self, folder: PendingFolder) {
		self.by_uuid.insert(folder.uuid(), folder);
	}

	pub fn by_uuid(&self, uuid: &Uuid) -> Option<&PendingFolder> {
		self.by_uuid.get(uuid)
	}

	pub fn by_device_and_id(&self, device: &DeviceSha, folder_id: &str) -> Option<&PendingFolder> {
		self.by_uuid
			.values()
			.find(|p| p.device() == device && p.folder_id() == folder_id)
	}

	pub fn remove(&mut self, uuid: &Uuid) -> Option<PendingFolder> {
		self.by_uuid.remove(uuid)
	}

	pub fn iter(&self) -> impl Iterator<Item = &PendingFolder> {
		self.by_uuid.values()
	}

	pub fn len(&self) -> usize {
		self.by_uuid.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_uuid.is_empty()
	}
}

/// A folder the user rejected; kept so peers do not re-offer it
#[derive(Debug)]
pub struct IgnoredFolder {
	id: String,
	label: String,
}

impl IgnoredFolder {
	pub fn new(id: &str, label: &str) -> Self {
		IgnoredFolder { id: id.to_string(), label: label.to_string() }
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn db_key(&self) -> Vec<u8> {
		let mut key = Vec::with_capacity(1 + self.id.len());
		key.push(crate::db::prefix::IGNORED_FOLDER);
		key.extend_from_slice(self.id.as_bytes());
		key
	}

	pub fn as_record(&self) -> records::IgnoredFolder {
		records::IgnoredFolder { label: self.label.clone() }
	}
}

/// Rejected folders, keyed by folder id
#[derive(Debug, Default)]
pub struct IgnoredFolderMap {
	by_id: BTreeMap<String, IgnoredFolder>,
}

impl IgnoredFolderMap {
	pub fn new() -> Self {
		IgnoredFolderMap::default()
	}

	pub fn put(&mut self, folder: IgnoredFolder) {
		self.by_id.insert(folder.id().to_string(), folder);
	}

	pub fn by_id(&self, id: &str) -> Option<&IgnoredFolder> {
		self.by_id.get(id)
	}

	pub fn remove(&mut self, id: &str) -> Option<IgnoredFolder> {
		self.by_id.remove(id)
	}

	pub fn len(&self) -> usize {
		self.by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_id.is_empty()
	}
}


// vim: ts=4
