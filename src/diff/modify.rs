//! Folder, replica, file and pending-table mutations.

use uuid::Uuid;

use crate::db::records;
use crate::diff::{Diff, DiffKind};
use crate::error::{Error, ModelError};
use crate::logging::*;
use crate::model::block::BlockInfo;
use crate::model::device::RemoteView;
use crate::model::file_info::{FileInfo, FileKind};
use crate::model::folder::Folder;
use crate::model::folder_info::FolderInfo;
use crate::model::some_device::{IgnoredFolder, PendingFolder, SomeDevice};
use crate::model::version::record_update;
use crate::model::{BlockHash, Cluster, DeviceSha};
use crate::proto;

fn padded_hash(block: &proto::BlockInfo) -> Result<BlockHash, ModelError> {
	if block.hash.len() > 32 {
		return Err(ModelError::InvalidKeyLength { expected: 32, actual: block.hash.len() });
	}
	let mut hash = [0u8; 32];
	hash[..block.hash.len()].copy_from_slice(&block.hash);
	Ok(hash)
}

pub(crate) struct UpsertOptions {
	pub assign_sequence: bool,
	pub mark_all_available: bool,
}

/// Inserts or replaces one file in the replica of `device`
///
/// Missing blocks are created in the store first. An existing entry of the
/// same kind is updated in place, preserving the local availability of
/// blocks that survive; a kind change replaces the entry wholesale. The
/// replica's max-sequence follows the inserted file.
pub(crate) fn upsert_file(
	cluster: &mut Cluster,
	folder_id: &str,
	device: &DeviceSha,
	msg: &proto::FileInfo,
	opts: UpsertOptions,
) -> Result<(), Error> {
	let (folder_uuid, fi_uuid, max_sequence, existing) = {
		let folder = cluster
			.folders()
			.by_id(folder_id)
			.ok_or_else(|| ModelError::FolderDoesNotExist { folder_id: folder_id.to_string() })?;
		let fi = folder
			.folder_infos()
			.by_device(device)
			.ok_or_else(|| ModelError::FolderNotShared { folder_id: folder_id.to_string() })?;
		let existing = fi.files().by_name(&msg.name).map(|f| (f.uuid(), f.kind()));
		(folder.uuid(), fi.uuid(), fi.max_sequence(), existing)
	};

	let mut msg = msg.clone();
	if opts.assign_sequence {
		msg.sequence = max_sequence + 1;
	}

	let kind = FileKind::from_proto(msg.tp);
	// the freshly built file always gets its own uuid: when an entry of the
	// same kind already exists it only serves as the metadata source and
	// must not alias the stored file's block back-references
	let uuid = cluster.next_uuid();
	let final_uuid = match existing {
		Some((prev_uuid, prev_kind)) if prev_kind == kind => prev_uuid,
		_ => uuid,
	};

	// make sure every block that will be referenced exists in the store;
	// zero-sized entries carry no slots and create nothing
	if msg.size > 0 {
		let blocks = cluster.blocks_mut();
		for b in &msg.blocks {
			let hash = padded_hash(b)?;
			if blocks.by_hash(&hash).is_none() {
				blocks.put(BlockInfo::from_proto(b)?);
			}
		}
	}

	let mut file = FileInfo::from_proto(uuid, &msg, fi_uuid, cluster.paths_mut())?;
	{
		let blocks = cluster.blocks_mut();
		let slots = file.block_count();
		for (i, b) in msg.blocks.iter().take(slots).enumerate() {
			file.assign_block(blocks, &padded_hash(b)?, i)?;
		}
	}

	let slots = file.block_count();
	let (folders, blocks) = cluster.folders_and_blocks_mut();
	let folder = folders
		.by_uuid_mut(&folder_uuid)
		.ok_or_else(|| ModelError::FolderDoesNotExist { folder_id: folder_id.to_string() })?;
	let fi = folder
		.folder_infos_mut()
		.by_uuid_mut(&fi_uuid)
		.ok_or_else(|| ModelError::FolderNotShared { folder_id: folder_id.to_string() })?;

	match existing {
		Some((prev_uuid, prev_kind)) if prev_kind == kind => {
			// take the entry out while its indexes are still consistent,
			// replace its metadata and blocks, then reindex
			if let Some(mut prev) = fi.files_mut().remove(&prev_uuid) {
				prev.update(&file, blocks)?;
				fi.add(prev, true);
			}
			file.remove_blocks(blocks);
		}
		Some((prev_uuid, _)) => {
			if let Some(mut prev) = fi.files_mut().remove(&prev_uuid) {
				prev.remove_blocks(blocks);
			}
			fi.add(file, true);
		}
		None => fi.add(file, true),
	}

	if opts.mark_all_available {
		if let Some(stored) = fi.files_mut().by_uuid_mut(&final_uuid) {
			for i in 0..slots {
				if !stored.is_block_available(i) {
					stored.mark_local_available(blocks, i);
				}
			}
			stored.mark_local(true);
		}
	}
	Ok(())
}

/// Creates a folder together with the local device's replica
pub struct CreateFolder {
	pub uuid: Uuid,
	pub folder: records::Folder,
}

impl CreateFolder {
	/// Fails early when the folder id is taken; the child diff creates the
	/// local replica with a fresh uuid and index id
	pub fn create(cluster: &mut Cluster, folder: records::Folder) -> Result<Diff, ModelError> {
		if folder.id.is_empty() {
			return Err(ModelError::EmptyFolderName);
		}
		if cluster.folders().by_id(&folder.id).is_some() {
			return Err(ModelError::FolderAlreadyExists { folder_id: folder.id });
		}
		let uuid = cluster.next_uuid();
		let fi_uuid = cluster.next_uuid();
		let index_id = cluster.next_u64();
		let folder_id = folder.id.clone();
		let local = cluster.local_sha();
		Ok(Diff::new(DiffKind::CreateFolder(CreateFolder { uuid, folder })).with_child(Diff::new(
			DiffKind::UpsertFolderInfo(UpsertFolderInfo {
				uuid: fi_uuid,
				device: local,
				folder_id,
				index_id,
				max_sequence: 0,
			}),
		)))
	}

	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!("applying create_folder, id = {}", self.folder.id);
		if cluster.folders().by_id(&self.folder.id).is_some() {
			return Err(ModelError::FolderAlreadyExists { folder_id: self.folder.id.clone() }.into());
		}
		let folder = Folder::new(self.uuid, &self.folder)?;
		cluster.folders_mut().put(folder);
		Ok(())
	}
}

/// Creates or updates one device's replica of a folder
pub struct UpsertFolderInfo {
	pub uuid: Uuid,
	pub device: DeviceSha,
	pub folder_id: String,
	pub index_id: u64,
	pub max_sequence: i64,
}

impl UpsertFolderInfo {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!(
			"applying upsert_folder_info, folder = {}, index = {:#x}",
			self.folder_id,
			self.index_id
		);
		if cluster.devices().by_sha256(&self.device).is_none() {
			return Err(ModelError::UnknownDevice.into());
		}
		let local_key = cluster.local_device().key().to_vec();
		let (folders, blocks) = cluster.folders_and_blocks_mut();
		let folder = folders.by_id_mut(&self.folder_id).ok_or_else(|| {
			ModelError::FolderDoesNotExist { folder_id: self.folder_id.clone() }
		})?;
		let folder_uuid = folder.uuid();
		match folder.folder_infos_mut().by_device_mut(&self.device) {
			Some(fi) => {
				fi.set_index(self.index_id, blocks);
				fi.set_max_sequence(self.max_sequence);
			}
			None => {
				let mut fi = FolderInfo::new(
					self.uuid,
					self.device,
					folder_uuid,
					self.index_id,
					self.max_sequence,
				);
				fi.set_introducer_device_key(local_key);
				folder.folder_infos_mut().put(fi);
			}
		}
		Ok(())
	}
}

/// Promotes a pending folder offered by a peer into a shared one
pub struct ShareFolder {
	pub device: DeviceSha,
	pub folder_id: String,
	pub pending_uuid: Uuid,
}

impl ShareFolder {
	/// The folder must exist locally and the peer must have offered it;
	/// the child diff upserts the peer's replica from the offer
	pub fn create(cluster: &mut Cluster, device: &DeviceSha, folder_id: &str) -> Result<Diff, ModelError> {
		if cluster.devices().by_sha256(device).is_none() {
			return Err(ModelError::SourceDeviceMissing);
		}
		if cluster.folders().by_id(folder_id).is_none() {
			return Err(ModelError::FolderDoesNotExist { folder_id: folder_id.to_string() });
		}
		let pending = cluster
			.pending_folders()
			.by_device_and_id(device, folder_id)
			.ok_or_else(|| ModelError::FolderDoesNotExist { folder_id: folder_id.to_string() })?;
		let pending_uuid = pending.uuid();
		let index_id = pending.index_id();
		let max_sequence = pending.max_sequence();
		let fi_uuid = cluster.next_uuid();
		Ok(Diff::new(DiffKind::ShareFolder(ShareFolder {
			device: *device,
			folder_id: folder_id.to_string(),
			pending_uuid,
		}))
		.with_child(Diff::new(DiffKind::UpsertFolderInfo(UpsertFolderInfo {
			uuid: fi_uuid,
			device: *device,
			folder_id: folder_id.to_string(),
			index_id,
			max_sequence,
		}))))
	}

	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!("applying share_folder, folder = {}", self.folder_id);
		cluster.pending_folders_mut().remove(&self.pending_uuid);
		Ok(())
	}
}

/// Registers a folder a peer offered and the user has not decided on
pub struct AddPendingFolder {
	pub uuid: Uuid,
	pub device: DeviceSha,
	pub folder: records::Folder,
	pub index_id: u64,
	pub max_sequence: i64,
}

impl AddPendingFolder {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		cluster.pending_folders_mut().put(PendingFolder::new(
			self.uuid,
			self.device,
			self.folder.clone(),
			self.index_id,
			self.max_sequence,
		));
		Ok(())
	}
}

/// Registers a device that knocked but was not accepted
pub struct AddPendingDevice {
	pub device: DeviceSha,
	pub record: records::SomeDevice,
}

impl AddPendingDevice {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		let id = crate::model::DeviceId::from_sha256(&self.device);
		cluster.pending_devices_mut().put(SomeDevice::new(id, &self.record));
		Ok(())
	}
}

/// Drops a pending device entry
pub struct RemovePendingDevice {
	pub device: DeviceSha,
}

impl RemovePendingDevice {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		cluster.pending_devices_mut().remove(&self.device);
		Ok(())
	}
}

/// Rejects a folder; pending offers for it are dropped everywhere
pub struct AddIgnoredFolder {
	pub folder_id: String,
	pub label: String,
}

impl AddIgnoredFolder {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		cluster
			.ignored_folders_mut()
			.put(IgnoredFolder::new(&self.folder_id, &self.label));
		let stale: Vec<Uuid> = cluster
			.pending_folders()
			.iter()
			.filter(|p| p.folder_id() == self.folder_id)
			.map(|p| p.uuid())
			.collect();
		for uuid in stale {
			cluster.pending_folders_mut().remove(&uuid);
		}
		Ok(())
	}
}

/// Rejects a device; its pending entry is dropped
pub struct AddIgnoredDevice {
	pub device: DeviceSha,
	pub record: records::SomeDevice,
}

impl AddIgnoredDevice {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		cluster.pending_devices_mut().remove(&self.device);
		let id = crate::model::DeviceId::from_sha256(&self.device);
		cluster.ignored_devices_mut().put(SomeDevice::new(id, &self.record));
		Ok(())
	}
}

/// Refreshes what `peer` reported about one replica
pub struct UpdateRemoteView {
	pub peer: DeviceSha,
	pub folder_id: String,
	pub device: DeviceSha,
	pub index_id: u64,
	pub max_sequence: i64,
}

impl UpdateRemoteView {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		let peer = cluster
			.devices_mut()
			.by_sha256_mut(&self.peer)
			.ok_or(ModelError::UnknownDevice)?;
		peer.remote_views_mut().push(
			&self.folder_id,
			&self.device,
			RemoteView { index_id: self.index_id, max_sequence: self.max_sequence },
		);
		Ok(())
	}
}

/// Inserts a file into a replica, creating missing blocks
pub struct NewFile {
	pub folder_id: String,
	pub device: DeviceSha,
	pub file: proto::FileInfo,
	pub assign_sequence: bool,
}

impl NewFile {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!("applying new_file, folder = {}, name = {}", self.folder_id, self.file.name);
		upsert_file(
			cluster,
			&self.folder_id,
			&self.device,
			&self.file,
			UpsertOptions { assign_sequence: self.assign_sequence, mark_all_available: false },
		)
	}
}

/// Scanner-originated replacement of a local file's metadata and blocks
///
/// Carries the hashes whose only referent was the previous incarnation of
/// this file, so observers can drop their persisted records.
pub struct LocalUpdate {
	pub folder_id: String,
	pub file: proto::FileInfo,
	pub removed_blocks: Vec<BlockHash>,
}

impl LocalUpdate {
	pub fn create(
		cluster: &Cluster,
		folder_id: &str,
		file: proto::FileInfo,
	) -> Result<Diff, ModelError> {
		let folder = cluster
			.folders()
			.by_id(folder_id)
			.ok_or_else(|| ModelError::FolderDoesNotExist { folder_id: folder_id.to_string() })?;
		let local = cluster.local_device().sha256();
		let fi = folder
			.folder_infos()
			.by_device(local)
			.ok_or_else(|| ModelError::FolderNotShared { folder_id: folder_id.to_string() })?;

		// blocks whose only referent is the previous file and which do not
		// reappear in the new block set will become orphans
		let mut kept: std::collections::HashSet<BlockHash> = Default::default();
		for b in &file.blocks {
			kept.insert(padded_hash(b)?);
		}
		let mut removed_blocks = Vec::new();
		if let Some(prev) = fi.files().by_name(&file.name) {
			for slot in prev.blocks().iter().flatten() {
				if kept.contains(&slot.hash) {
					continue;
				}
				let single_user = cluster
					.blocks()
					.by_hash(&slot.hash)
					.map(|b| b.use_count() == 1)
					.unwrap_or(false);
				if single_user {
					removed_blocks.push(slot.hash);
				}
			}
		}
		Ok(Diff::new(DiffKind::LocalUpdate(LocalUpdate {
			folder_id: folder_id.to_string(),
			file,
			removed_blocks,
		})))
	}

	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		let folder = match cluster.folders().by_id(&self.folder_id) {
			Some(folder) => folder,
			None => {
				debug!(
					"local_update, folder = {}, name = {}, folder is not available, ignoring",
					self.folder_id, self.file.name
				);
				return Ok(());
			}
		};
		if folder.is_suspended() {
			debug!(
				"local_update, folder = {}, name = {}, folder is suspended, ignoring",
				self.folder_id, self.file.name
			);
			return Ok(());
		}
		let local = cluster.local_sha();
		let local_uint = cluster.local_device().uint();

		// the local device authored this change
		let mut msg = self.file.clone();
		msg.modified_by = local_uint;
		if let Some(fi) = folder.folder_infos().by_device(&local) {
			if let Some(prev) = fi.files().by_name(&msg.name) {
				msg.version = prev.version().as_proto();
			}
		}
		record_update(&mut msg.version, local_uint);

		upsert_file(
			cluster,
			&self.folder_id,
			&local,
			&msg,
			UpsertOptions { assign_sequence: true, mark_all_available: true },
		)
	}
}

/// Post-condition check that a file became fully available locally
pub struct FlushFile {
	pub folder_id: String,
	pub device: DeviceSha,
	pub file_name: String,
}

impl FlushFile {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!("applying flush_file, folder = {}, file = {}", self.folder_id, self.file_name);
		let available = cluster
			.folders()
			.by_id(&self.folder_id)
			.and_then(|folder| folder.folder_infos().by_device(&self.device))
			.and_then(|fi| fi.files().by_name(&self.file_name))
			.map(|f| f.is_locally_available())
			.unwrap_or(false);
		if !available {
			return Err(ModelError::NotLocallyAvailable { name: self.file_name.clone() }.into());
		}
		Ok(())
	}
}

// vim: ts=4
