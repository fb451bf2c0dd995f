//! Paired devices and their connection state.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::db::records;
use crate::error::ModelError;
use crate::model::device_id::DeviceId;
use crate::model::DeviceSha;
use crate::proto;

/// Connection lifecycle of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
	#[default]
	Offline,
	Discovering,
	Connecting,
	Online,
}

/// What a peer last told us about one replica:
/// `(folder, device) -> {index_id, max_sequence}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteView {
	pub index_id: u64,
	pub max_sequence: i64,
}

/// Per-peer map of observed replica states
#[derive(Debug, Default)]
pub struct RemoteViewMap {
	views: HashMap<(String, DeviceSha), RemoteView>,
}

impl RemoteViewMap {
	pub fn push(&mut self, folder_id: &str, device: &DeviceSha, view: RemoteView) {
		self.views.insert((folder_id.to_string(), *device), view);
	}

	pub fn get(&self, folder_id: &str, device: &DeviceSha) -> Option<&RemoteView> {
		self.views.get(&(folder_id.to_string(), *device))
	}

	pub fn len(&self) -> usize {
		self.views.len()
	}

	pub fn is_empty(&self) -> bool {
		self.views.is_empty()
	}
}

/// A paired device
#[derive(Debug)]
pub struct Device {
	id: DeviceId,
	name: String,
	cert_name: Option<String>,
	client_name: String,
	client_version: String,
	compression: proto::Compression,
	introducer: bool,
	auto_accept: bool,
	paused: bool,
	skip_introduction_removals: bool,
	static_addresses: Vec<String>,
	addresses: Vec<String>,
	state: DeviceState,
	connection_id: String,
	last_seen: DateTime<Utc>,
	rx_bytes: u64,
	tx_bytes: u64,
	iterator_live: bool,
	remote_views: RemoteViewMap,
}

impl Device {
	pub fn new(id: DeviceId, name: &str, cert_name: &str) -> Self {
		Device {
			id,
			name: name.to_string(),
			cert_name: if cert_name.is_empty() { None } else { Some(cert_name.to_string()) },
			client_name: String::new(),
			client_version: String::new(),
			compression: proto::Compression::Metadata,
			introducer: false,
			auto_accept: false,
			paused: false,
			skip_introduction_removals: false,
			static_addresses: Vec::new(),
			addresses: Vec::new(),
			state: DeviceState::Offline,
			connection_id: String::new(),
			last_seen: DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default(),
			rx_bytes: 0,
			tx_bytes: 0,
			iterator_live: false,
			remote_views: RemoteViewMap::default(),
		}
	}

	/// Restores a device from its persisted key and record
	pub fn from_key(key: &[u8], record: &records::Device) -> Result<Self, ModelError> {
		if key.len() != 33 {
			return Err(ModelError::InvalidKeyLength { expected: 33, actual: key.len() });
		}
		if key[0] != crate::db::prefix::DEVICE {
			return Err(ModelError::InvalidKeyPrefix {
				expected: crate::db::prefix::DEVICE,
				actual: key[0],
			});
		}
		let mut sha = [0u8; 32];
		sha.copy_from_slice(&key[1..]);
		let id = DeviceId::from_sha256(&sha);
		let mut device = Device::new(id, &record.name, &record.cert_name);
		device.assign(record);
		Ok(device)
	}

	/// Replaces the configured fields from a record
	pub fn assign(&mut self, record: &records::Device) {
		self.name = record.name.clone();
		self.compression = record.compression;
		self.cert_name = if record.cert_name.is_empty() {
			None
		} else {
			Some(record.cert_name.clone())
		};
		self.introducer = record.introducer;
		self.auto_accept = record.auto_accept;
		self.paused = record.paused;
		self.skip_introduction_removals = record.skip_introduction_removals;
		self.last_seen = DateTime::<Utc>::from_timestamp(record.last_seen, 0).unwrap_or_default();
		self.static_addresses = record.addresses.clone();
		self.addresses.clear();
	}

	pub fn id(&self) -> &DeviceId {
		&self.id
	}

	pub fn sha256(&self) -> &DeviceSha {
		self.id.sha256()
	}

	pub fn key(&self) -> &[u8; 33] {
		self.id.key()
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn cert_name(&self) -> Option<&str> {
		self.cert_name.as_deref()
	}

	pub fn client_name(&self) -> &str {
		&self.client_name
	}

	pub fn client_version(&self) -> &str {
		&self.client_version
	}

	pub fn compression(&self) -> proto::Compression {
		self.compression
	}

	pub fn is_introducer(&self) -> bool {
		self.introducer
	}

	pub fn set_introducer(&mut self, value: bool) {
		self.introducer = value;
	}

	pub fn has_auto_accept(&self) -> bool {
		self.auto_accept
	}

	pub fn is_paused(&self) -> bool {
		self.paused
	}

	pub fn skip_introduction_removals(&self) -> bool {
		self.skip_introduction_removals
	}

	/// A device without static addresses is located via discovery
	pub fn is_dynamic(&self) -> bool {
		self.static_addresses.is_empty()
	}

	pub fn static_addresses(&self) -> &[String] {
		&self.static_addresses
	}

	pub fn set_static_addresses(&mut self, addresses: Vec<String>) {
		self.static_addresses = addresses;
	}

	/// Currently resolved addresses
	pub fn addresses(&self) -> &[String] {
		&self.addresses
	}

	pub fn assign_addresses(&mut self, addresses: Vec<String>) {
		self.addresses = addresses;
	}

	pub fn state(&self) -> DeviceState {
		self.state
	}

	pub fn connection_id(&self) -> &str {
		&self.connection_id
	}

	/// Applies a state transition
	///
	/// Entering or leaving online refreshes last-seen. When several
	/// connections race, the shortest connection id wins, ties broken
	/// lexicographically; leaving online clears the id.
	pub fn update_state(&mut self, new_state: DeviceState, connection_id: &str) {
		if self.state == DeviceState::Online || new_state == DeviceState::Online {
			self.last_seen = Utc::now();
			if new_state == DeviceState::Online {
				debug_assert!(!connection_id.is_empty());
				let new_wins = self.connection_id.is_empty()
					|| connection_id.len() < self.connection_id.len()
					|| (connection_id.len() == self.connection_id.len()
						&& connection_id < self.connection_id.as_str());
				if new_wins {
					self.connection_id = connection_id.to_string();
				}
			}
		}
		if new_state != DeviceState::Online {
			self.connection_id.clear();
		}
		self.state = new_state;
	}

	/// Records what the peer's Hello told us
	pub fn update_contact(&mut self, client_name: &str, client_version: &str) {
		self.client_name = client_name.to_string();
		self.client_version = client_version.to_string();
	}

	pub fn last_seen(&self) -> DateTime<Utc> {
		self.last_seen
	}

	pub fn rx_bytes(&self) -> u64 {
		self.rx_bytes
	}

	pub fn set_rx_bytes(&mut self, value: u64) {
		self.rx_bytes = value;
	}

	pub fn tx_bytes(&self) -> u64 {
		self.tx_bytes
	}

	pub fn set_tx_bytes(&mut self, value: u64) {
		self.tx_bytes = value;
	}

	pub fn remote_views(&self) -> &RemoteViewMap {
		&self.remote_views
	}

	pub fn remote_views_mut(&mut self) -> &mut RemoteViewMap {
		&mut self.remote_views
	}

	/// At most one live file iterator per device
	pub fn iterator_live(&self) -> bool {
		self.iterator_live
	}

	pub fn set_iterator_live(&mut self, value: bool) {
		self.iterator_live = value;
	}

	pub fn as_record(&self) -> records::Device {
		records::Device {
			name: self.name.clone(),
			addresses: self.static_addresses.clone(),
			compression: self.compression,
			cert_name: self.cert_name.clone().unwrap_or_default(),
			introducer: self.introducer,
			skip_introduction_removals: self.skip_introduction_removals,
			auto_accept: self.auto_accept,
			paused: self.paused,
			last_seen: self.last_seen.timestamp(),
		}
	}
}

/// Paired devices, keyed by certificate digest
#[derive(Debug, Default)]
pub struct DeviceMap {
	devices: BTreeMap<DeviceSha, Device>,
}

impl DeviceMap {
	pub fn new() -> Self {
		DeviceMap::default()
	}

	pub fn by_sha256(&self, sha: &DeviceSha) -> Option<&Device> {
		self.devices.get(sha)
	}

	pub fn by_sha256_mut(&mut self, sha: &DeviceSha) -> Option<&mut Device> {
		self.devices.get_mut(sha)
	}

	/// Inserts the device; refuses duplicates
	pub fn put(&mut self, device: Device) -> Result<(), ModelError> {
		let sha = *device.sha256();
		if self.devices.contains_key(&sha) {
			return Err(ModelError::DeviceAlreadyExists);
		}
		self.devices.insert(sha, device);
		Ok(())
	}

	pub fn remove(&mut self, sha: &DeviceSha) -> Option<Device> {
		self.devices.remove(sha)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Device> {
		self.devices.values()
	}

	pub fn len(&self) -> usize {
		self.devices.len()
	}

	pub fn is_empty(&self) -> bool {
		self.devices.is_empty()
	}
}


// vim: ts=4
