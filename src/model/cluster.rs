//! The top-level cluster aggregate.
//!
//! The cluster owns every model map plus the shared machinery: the path
//! cache, the per-path lock registry used by transfer sessions, and a
//! deterministic RNG seeded by the caller so identifier generation is
//! reproducible under test. All mutation flows through diff application on
//! a single thread; the first failed diff latches `tainted` and further
//! diffs are rejected without touching state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::diff::{Diff, DiffKind};
use crate::error::ModelError;
use crate::logging::*;
use crate::model::block::BlockMap;
use crate::model::device::{Device, DeviceMap};
use crate::model::device_id::DeviceId;
use crate::model::folder::FolderMap;
use crate::model::path_cache::PathCache;
use crate::model::some_device::{IgnoredFolderMap, PendingFolderMap, SomeDeviceMap};
use crate::model::DeviceSha;
use crate::proto;

/// Cluster-wide per-path mutual exclusion
///
/// At most one guard per path may exist; the guard releases the path when
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
	inner: Arc<Mutex<HashSet<String>>>,
}

impl PathLocks {
	pub fn new() -> Self {
		PathLocks::default()
	}

	fn set(&self) -> MutexGuard<'_, HashSet<String>> {
		match self.inner.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	/// Takes the lock for `name`; `None` when some guard already holds it
	pub fn lock(&self, name: &str) -> Option<PathGuard> {
		let mut set = self.set();
		if !set.insert(name.to_string()) {
			return None;
		}
		Some(PathGuard { name: name.to_string(), locks: self.inner.clone() })
	}

	pub fn is_locked(&self, name: &str) -> bool {
		self.set().contains(name)
	}
}

/// Scoped ownership of one path
pub struct PathGuard {
	name: String,
	locks: Arc<Mutex<HashSet<String>>>,
}

impl Drop for PathGuard {
	fn drop(&mut self) {
		let mut set = match self.locks.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		set.remove(&self.name);
	}
}

/// The in-memory graph of devices, folders, replicas, files and blocks
pub struct Cluster {
	local_device: DeviceId,
	devices: DeviceMap,
	folders: FolderMap,
	blocks: BlockMap,
	pending_devices: SomeDeviceMap,
	ignored_devices: SomeDeviceMap,
	pending_folders: PendingFolderMap,
	ignored_folders: IgnoredFolderMap,
	paths: PathCache,
	locks: PathLocks,
	rng: StdRng,
	write_requests: i32,
	tainted: bool,
}

impl Cluster {
	/// Builds an empty cluster around the local device
	///
	/// `seed` drives uuid and index-id generation; `write_requests` caps
	/// how many write operations may be outstanding at once.
	pub fn new(local_device: DeviceId, seed: u64, write_requests: i32) -> Self {
		let mut devices = DeviceMap::new();
		let _ = devices.put(Device::new(local_device.clone(), "", ""));
		Cluster {
			local_device,
			devices,
			folders: FolderMap::new(),
			blocks: BlockMap::new(),
			pending_devices: SomeDeviceMap::new(),
			ignored_devices: SomeDeviceMap::new(),
			pending_folders: PendingFolderMap::new(),
			ignored_folders: IgnoredFolderMap::new(),
			paths: PathCache::new(),
			locks: PathLocks::new(),
			rng: StdRng::seed_from_u64(seed),
			write_requests,
			tainted: false,
		}
	}

	pub fn local_device(&self) -> &DeviceId {
		&self.local_device
	}

	pub fn local_sha(&self) -> DeviceSha {
		*self.local_device.sha256()
	}

	pub fn devices(&self) -> &DeviceMap {
		&self.devices
	}

	pub fn devices_mut(&mut self) -> &mut DeviceMap {
		&mut self.devices
	}

	pub fn folders(&self) -> &FolderMap {
		&self.folders
	}

	pub fn folders_mut(&mut self) -> &mut FolderMap {
		&mut self.folders
	}

	pub fn blocks(&self) -> &BlockMap {
		&self.blocks
	}

	pub fn blocks_mut(&mut self) -> &mut BlockMap {
		&mut self.blocks
	}

	/// Folders and blocks borrowed together, for diff application
	pub fn folders_and_blocks_mut(&mut self) -> (&mut FolderMap, &mut BlockMap) {
		(&mut self.folders, &mut self.blocks)
	}

	pub fn pending_devices(&self) -> &SomeDeviceMap {
		&self.pending_devices
	}

	pub fn pending_devices_mut(&mut self) -> &mut SomeDeviceMap {
		&mut self.pending_devices
	}

	pub fn ignored_devices(&self) -> &SomeDeviceMap {
		&self.ignored_devices
	}

	pub fn ignored_devices_mut(&mut self) -> &mut SomeDeviceMap {
		&mut self.ignored_devices
	}

	pub fn pending_folders(&self) -> &PendingFolderMap {
		&self.pending_folders
	}

	pub fn pending_folders_mut(&mut self) -> &mut PendingFolderMap {
		&mut self.pending_folders
	}

	pub fn ignored_folders(&self) -> &IgnoredFolderMap {
		&self.ignored_folders
	}

	pub fn ignored_folders_mut(&mut self) -> &mut IgnoredFolderMap {
		&mut self.ignored_folders
	}

	pub fn paths_mut(&mut self) -> &mut PathCache {
		&mut self.paths
	}

	pub fn locks(&self) -> &PathLocks {
		&self.locks
	}

	/// Takes the per-path lock; at most one guard per path exists
	pub fn lock(&self, name: &str) -> Option<PathGuard> {
		self.locks.lock(name)
	}

	pub fn is_locked(&self, name: &str) -> bool {
		self.locks.is_locked(name)
	}

	/// Next deterministic uuid
	pub fn next_uuid(&mut self) -> Uuid {
		let mut bytes = [0u8; 16];
		self.rng.fill(&mut bytes);
		uuid::Builder::from_random_bytes(bytes).into_uuid()
	}

	/// Next deterministic 64-bit value, e.g. a fresh index id
	pub fn next_u64(&mut self) -> u64 {
		self.rng.gen()
	}

	pub fn write_requests(&self) -> i32 {
		self.write_requests
	}

	/// Tracks outstanding writes for back-pressure; delta is +1 or -1
	pub fn modify_write_requests(&mut self, delta: i32) {
		debug_assert!(delta == 1 || delta == -1);
		self.write_requests += delta;
		debug_assert!(self.write_requests >= 0);
	}

	pub fn is_tainted(&self) -> bool {
		self.tainted
	}

	pub fn mark_tainted(&mut self) {
		self.tainted = true;
	}

	/// Creates the peer's file iterator; at most one may be live
	pub fn create_file_iterator(
		&mut self,
		peer: &DeviceSha,
	) -> Result<crate::model::FileIterator, ModelError> {
		let device = self.devices.by_sha256_mut(peer).ok_or(ModelError::UnknownDevice)?;
		if device.iterator_live() {
			return Err(ModelError::AlreadySynchronizing { name: hex::encode(peer) });
		}
		device.set_iterator_live(true);
		Ok(crate::model::FileIterator::new(self, *peer))
	}

	/// Releases the peer's file iterator slot
	pub fn release_file_iterator(&mut self, peer: &DeviceSha) {
		if let Some(device) = self.devices.by_sha256_mut(peer) {
			device.set_iterator_live(false);
		}
	}

	/// Renders the outgoing ClusterConfig for `target`
	pub fn generate(&self, target: &DeviceSha) -> proto::ClusterConfig {
		let mut msg = proto::ClusterConfig::default();
		for folder in self.folders.iter() {
			if let Some(f) = folder.generate(target, &self.devices) {
				msg.folders.push(f);
			}
		}
		msg
	}

	/// Turns a peer's ClusterConfig into a diff tree
	///
	/// Folders the local device shares get their peer replica upserted;
	/// unknown folders become pending; remote-view entries are refreshed
	/// for every device the peer listed.
	pub fn process_cluster_config(
		&mut self,
		msg: &proto::ClusterConfig,
		peer: &DeviceSha,
	) -> Result<Option<Diff>, ModelError> {
		if self.devices.by_sha256(peer).is_none() {
			return Err(ModelError::UnknownDevice);
		}
		let mut diffs: Vec<Diff> = Vec::new();

		for f in &msg.folders {
			let known = self
				.folders
				.by_id(&f.id)
				.map(|folder| folder.is_shared_with(&self.local_sha()).is_some())
				.unwrap_or(false);

			let peer_entry = f.devices.iter().find(|d| d.id.as_slice() == peer.as_slice());

			if known {
				if let Some(entry) = peer_entry {
					let existing = self
						.folders
						.by_id(&f.id)
						.and_then(|folder| folder.folder_infos().by_device(peer))
						.map(|fi| fi.uuid());
					let uuid = match existing {
						Some(uuid) => uuid,
						None => self.next_uuid(),
					};
					diffs.push(Diff::new(DiffKind::UpsertFolderInfo(
						crate::diff::UpsertFolderInfo {
							uuid,
							device: *peer,
							folder_id: f.id.clone(),
							index_id: entry.index_id,
							max_sequence: entry.max_sequence,
						},
					)));
				}
				for entry in &f.devices {
					let sha = decode_sha(&entry.id)?;
					diffs.push(Diff::new(DiffKind::UpdateRemoteView(
						crate::diff::UpdateRemoteView {
							peer: *peer,
							folder_id: f.id.clone(),
							device: sha,
							index_id: entry.index_id,
							max_sequence: entry.max_sequence,
						},
					)));
				}
			} else if self.ignored_folders.by_id(&f.id).is_none() {
				let (index_id, max_sequence) =
					peer_entry.map(|e| (e.index_id, e.max_sequence)).unwrap_or((0, 0));
				let existing = self.pending_folders.by_device_and_id(peer, &f.id).map(|p| p.uuid());
				let uuid = match existing {
					Some(uuid) => uuid,
					None => self.next_uuid(),
				};
				debug!("unknown folder '{}' offered by peer, keeping it pending", f.id);
				diffs.push(Diff::new(DiffKind::AddPendingFolder(crate::diff::AddPendingFolder {
					uuid,
					device: *peer,
					folder: folder_record_from_wire(f),
					index_id,
					max_sequence,
				})));
			} else {
				debug!("folder '{}' offered by peer is ignored", f.id);
			}
		}
		Ok(Diff::chain(diffs))
	}

	/// Turns a peer's full Index into per-file upsert diffs
	pub fn process_index(
		&mut self,
		msg: &proto::Index,
		peer: &DeviceSha,
	) -> Result<Option<Diff>, ModelError> {
		self.process_files(&msg.folder, &msg.files, peer)
	}

	/// Turns a peer's IndexUpdate into per-file upsert diffs
	pub fn process_index_update(
		&mut self,
		msg: &proto::IndexUpdate,
		peer: &DeviceSha,
	) -> Result<Option<Diff>, ModelError> {
		self.process_files(&msg.folder, &msg.files, peer)
	}

	fn process_files(
		&mut self,
		folder_id: &str,
		files: &[proto::FileInfo],
		peer: &DeviceSha,
	) -> Result<Option<Diff>, ModelError> {
		let folder = self
			.folders
			.by_id(folder_id)
			.ok_or_else(|| ModelError::FolderDoesNotExist { folder_id: folder_id.to_string() })?;
		if folder.is_shared_with(peer).is_none() {
			return Err(ModelError::FolderNotShared { folder_id: folder_id.to_string() });
		}

		let mut diffs = Vec::with_capacity(files.len());
		for file in files {
			diffs.push(Diff::new(DiffKind::NewFile(crate::diff::NewFile {
				folder_id: folder_id.to_string(),
				device: *peer,
				file: file.clone(),
				assign_sequence: false,
			})));
		}
		Ok(Diff::chain(diffs))
	}
}

fn decode_sha(raw: &[u8]) -> Result<DeviceSha, ModelError> {
	let mut sha = [0u8; 32];
	if raw.len() != 32 {
		return Err(ModelError::MalformedDeviceId);
	}
	sha.copy_from_slice(raw);
	Ok(sha)
}

fn folder_record_from_wire(f: &proto::Folder) -> crate::db::records::Folder {
	crate::db::records::Folder {
		id: f.id.clone(),
		label: f.label.clone(),
		read_only: f.read_only,
		ignore_permissions: f.ignore_permissions,
		ignore_delete: f.ignore_delete,
		disable_temp_indexes: f.disable_temp_indexes,
		paused: f.paused,
		scheduled: false,
		path: String::new(),
		folder_type: Default::default(),
		pull_order: Default::default(),
		rescan_interval: 0,
	}
}


// vim: ts=4
