//! File metadata and block slots.
//!
//! A file either owns a vector of block slots or a symlink target; a
//! deleted file carries an empty block vector. Each slot records the block
//! hash and whether that block's payload is already present in the local
//! copy of the file. Wire-visible flags travel with Index messages; the
//! local flags (scanned, fully available, unreachable, synchronizing) never
//! leave this device and survive metadata replacement.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::{prefix, records};
use crate::error::ModelError;
use crate::logging::*;
use crate::model::block::BlockMap;
use crate::model::cluster::{PathGuard, PathLocks};
use crate::model::device_id::DeviceId;
use crate::model::path_cache::{PathCache, PathEntry};
use crate::model::version::Version;
use crate::model::{BlockHash, UUID_LENGTH};
use crate::proto;

/// Identifies a file across the cluster: owning replica plus file uuid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
	pub folder_info: Uuid,
	pub file: Uuid,
}

/// File entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
	File,
	Dir,
	Symlink,
}

impl FileKind {
	pub fn from_proto(tp: proto::FileInfoType) -> Self {
		use proto::FileInfoType as T;
		match tp {
			T::File => FileKind::File,
			T::Directory => FileKind::Dir,
			T::SymlinkFile | T::SymlinkDirectory | T::Symlink => FileKind::Symlink,
		}
	}

	pub fn as_proto(&self) -> proto::FileInfoType {
		match self {
			FileKind::File => proto::FileInfoType::File,
			FileKind::Dir => proto::FileInfoType::Directory,
			FileKind::Symlink => proto::FileInfoType::Symlink,
		}
	}
}

/// One block slot: the referenced block plus the local-availability bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSlot {
	pub hash: BlockHash,
	pub size: i32,
	pub available: bool,
}

#[derive(Debug)]
enum Content {
	File { blocks: Vec<Option<BlockSlot>> },
	NotFile { symlink_target: String },
}

// hash of the zero-length payload, emitted for empty non-deleted files
static EMPTY_PAYLOAD_HASH: LazyLock<BlockHash> = LazyLock::new(|| Sha256::digest(b"").into());

/// File metadata within one folder replica
#[derive(Debug)]
pub struct FileInfo {
	key: FileKey,
	name: Arc<PathEntry>,
	kind: FileKind,
	deleted: bool,
	invalid: bool,
	no_permissions: bool,
	local: bool,
	available: bool,
	unreachable: bool,
	synchronizing: Arc<AtomicBool>,
	permissions: u32,
	modified_s: i64,
	modified_ns: i32,
	modified_by: u64,
	sequence: i64,
	size: i64,
	block_size: i32,
	version: Version,
	content: Content,
}

impl FileInfo {
	/// Restores a file from its persisted key and record
	///
	/// The key must be `prefix || folder-info-uuid || file-uuid` and match
	/// the owning replica.
	pub fn from_record(
		key: &[u8],
		record: &records::FileInfo,
		folder_info: Uuid,
		paths: &mut PathCache,
	) -> Result<Self, ModelError> {
		let expected = 1 + UUID_LENGTH * 2;
		if key.len() != expected {
			return Err(ModelError::InvalidKeyLength { expected, actual: key.len() });
		}
		if key[0] != prefix::FILE_INFO {
			return Err(ModelError::InvalidKeyPrefix { expected: prefix::FILE_INFO, actual: key[0] });
		}
		if key[1..1 + UUID_LENGTH] != folder_info.as_bytes()[..] {
			return Err(ModelError::MalformedRecord { entity: "file-info" });
		}
		let file = Uuid::from_slice(&key[1 + UUID_LENGTH..])
			.map_err(|_| ModelError::MalformedRecord { entity: "file-info" })?;

		let msg = proto::FileInfo {
			name: record.name.clone(),
			tp: record.tp,
			size: record.size,
			permissions: record.permissions,
			modified_s: record.modified_s,
			modified_ns: record.modified_ns,
			modified_by: record.modified_by,
			deleted: record.deleted,
			invalid: record.invalid,
			no_permissions: record.no_permissions,
			version: record.version.clone(),
			sequence: record.sequence,
			block_size: record.block_size,
			blocks: record
				.blocks
				.iter()
				.map(|h| proto::BlockInfo { offset: 0, size: 0, hash: h.clone(), weak_hash: 0 })
				.collect(),
			symlink_target: record.symlink_target.clone(),
		};
		Self::from_proto(file, &msg, folder_info, paths)
	}

	/// Builds a file from a protocol message under a fresh or known uuid
	pub fn from_proto(
		uuid: Uuid,
		msg: &proto::FileInfo,
		folder_info: Uuid,
		paths: &mut PathCache,
	) -> Result<Self, ModelError> {
		if msg.version.counters.is_empty() {
			return Err(ModelError::MissingVersion);
		}
		if msg.sequence < 0 {
			return Err(ModelError::InvalidSequence { sequence: msg.sequence });
		}
		let kind = FileKind::from_proto(msg.tp);
		if msg.deleted && kind == FileKind::File && !msg.blocks.is_empty() {
			return Err(ModelError::UnexpectedBlocks);
		}
		if kind == FileKind::File && msg.size > 0 {
			for b in &msg.blocks {
				if b.size as i64 > msg.size {
					return Err(ModelError::InvalidBlockSize);
				}
			}
		}

		let content = match kind {
			FileKind::File => {
				let slots = if msg.size > 0 { msg.blocks.len() } else { 0 };
				Content::File { blocks: vec![None; slots] }
			}
			_ => Content::NotFile { symlink_target: msg.symlink_target.clone() },
		};

		Ok(FileInfo {
			key: FileKey { folder_info, file: uuid },
			name: paths.get(&msg.name),
			kind,
			deleted: msg.deleted,
			invalid: msg.invalid,
			no_permissions: msg.no_permissions,
			local: false,
			available: false,
			unreachable: false,
			synchronizing: Arc::new(AtomicBool::new(false)),
			permissions: msg.permissions,
			modified_s: msg.modified_s,
			modified_ns: msg.modified_ns,
			modified_by: msg.modified_by,
			sequence: msg.sequence,
			size: msg.size,
			block_size: msg.block_size,
			version: Version::from_proto(&msg.version),
			content,
		})
	}

	pub fn key(&self) -> FileKey {
		self.key
	}

	pub fn uuid(&self) -> Uuid {
		self.key.file
	}

	/// The persistent key: prefix, owning replica uuid, file uuid
	pub fn db_key(&self) -> Vec<u8> {
		let mut key = Vec::with_capacity(1 + UUID_LENGTH * 2);
		key.push(prefix::FILE_INFO);
		key.extend_from_slice(self.key.folder_info.as_bytes());
		key.extend_from_slice(self.key.file.as_bytes());
		key
	}

	pub fn name(&self) -> &Arc<PathEntry> {
		&self.name
	}

	pub fn kind(&self) -> FileKind {
		self.kind
	}

	pub fn is_file(&self) -> bool {
		self.kind == FileKind::File
	}

	pub fn is_deleted(&self) -> bool {
		self.deleted
	}

	pub fn is_invalid(&self) -> bool {
		self.invalid
	}

	pub fn is_unreachable(&self) -> bool {
		self.unreachable
	}

	/// Transient: the path failed persistently, keep it out of iteration
	pub fn mark_unreachable(&mut self, value: bool) {
		self.unreachable = value;
	}

	/// True once the local scanner has seen this entry
	pub fn is_local(&self) -> bool {
		self.local
	}

	pub fn version(&self) -> &Version {
		&self.version
	}

	pub fn version_mut(&mut self) -> &mut Version {
		&mut self.version
	}

	pub fn sequence(&self) -> i64 {
		self.sequence
	}

	pub fn set_sequence(&mut self, value: i64) {
		self.sequence = value;
	}

	pub fn modified_s(&self) -> i64 {
		self.modified_s
	}

	pub fn modified_by(&self) -> u64 {
		self.modified_by
	}

	pub fn permissions(&self) -> u32 {
		self.permissions
	}

	pub fn has_no_permissions(&self) -> bool {
		self.no_permissions
	}

	pub fn block_size(&self) -> i32 {
		self.block_size
	}

	/// Logical size; deleted and invalid entries count as empty
	pub fn size(&self) -> i64 {
		if self.kind != FileKind::File || self.deleted || self.invalid {
			0
		} else {
			self.size
		}
	}

	pub fn symlink_target(&self) -> Option<&str> {
		match &self.content {
			Content::NotFile { symlink_target } if self.kind == FileKind::Symlink => {
				Some(symlink_target)
			}
			_ => None,
		}
	}

	pub fn blocks(&self) -> &[Option<BlockSlot>] {
		match &self.content {
			Content::File { blocks } => blocks,
			Content::NotFile { .. } => &[],
		}
	}

	pub fn block_count(&self) -> usize {
		self.blocks().len()
	}

	/// Byte offset of a block within the file
	pub fn block_offset(&self, index: usize) -> u64 {
		self.block_size as u64 * index as u64
	}

	/// Flips the scanned-locally bit; losing it also loses availability
	pub fn mark_local(&mut self, value: bool) {
		self.local = value;
		if !value {
			self.available = false;
			return;
		}
		let all = self.blocks().iter().all(|s| matches!(s, Some(slot) if slot.available));
		if self.kind != FileKind::File || all {
			self.available = true;
		}
	}

	/// Fills one slot with a block from the store
	///
	/// The slot must be empty; the block gains one reference and a
	/// back-pointer to this position.
	pub fn assign_block(
		&mut self,
		blocks: &mut BlockMap,
		hash: &BlockHash,
		index: usize,
	) -> Result<(), ModelError> {
		let key = self.key;
		let slots = match &mut self.content {
			Content::File { blocks } => blocks,
			Content::NotFile { .. } => return Err(ModelError::UnexpectedBlocks),
		};
		if index >= slots.len() {
			return Err(ModelError::MismatchedFileSize);
		}
		if slots[index].is_some() {
			return Err(ModelError::BlockSlotOccupied { index });
		}
		let block = blocks.by_hash_mut(hash).ok_or(ModelError::UnknownBlock)?;
		block.ref_inc();
		block.link(key, index);
		slots[index] = Some(BlockSlot { hash: *hash, size: block.size(), available: false });
		Ok(())
	}

	/// Marks one slot locally available and refreshes the file-level bit
	pub fn mark_local_available(&mut self, blocks: &mut BlockMap, index: usize) {
		let key = self.key;
		let slots = match &mut self.content {
			Content::File { blocks } => blocks,
			Content::NotFile { .. } => return,
		};
		let Some(Some(slot)) = slots.get_mut(index) else {
			return;
		};
		slot.available = true;
		if let Some(block) = blocks.by_hash_mut(&slot.hash) {
			block.mark_local_available(&key);
		}
		if !self.available {
			let all = slots.iter().all(|s| matches!(s, Some(s) if s.available));
			if all {
				self.available = true;
			}
		}
	}

	pub fn is_block_available(&self, index: usize) -> bool {
		matches!(self.blocks().get(index), Some(Some(slot)) if slot.available)
	}

	/// True when nothing remains to fetch for this entry
	pub fn is_locally_available(&self) -> bool {
		self.kind != FileKind::File || self.available || self.blocks().is_empty()
	}

	/// Detaches every block, releasing one reference per slot
	///
	/// Blocks reaching zero references are dropped from the store.
	pub fn remove_blocks(&mut self, blocks: &mut BlockMap) {
		let key = self.key;
		let slots = match &mut self.content {
			Content::File { blocks } => blocks,
			Content::NotFile { .. } => return,
		};
		for i in 0..slots.len() {
			let Some(slot) = slots[i] else { continue };
			let Some(block) = blocks.by_hash_mut(&slot.hash) else { continue };
			let mut drop_block = false;
			for freed in block.unlink(&key) {
				slots[freed] = None;
				if block.ref_dec() == 0 {
					drop_block = true;
				}
			}
			if drop_block {
				trace!("releasing orphaned block {}", hex::encode(slot.hash));
				blocks.remove(&slot.hash);
			}
		}
		self.available = false;
	}

	/// Replaces metadata and blocks from another file of the same entry
	///
	/// Wire flags, times, version and sequence are copied; local flags are
	/// preserved. Slots whose hash was locally available before and still
	/// appears in `other` keep their availability. `other` must be a
	/// distinct entity: sharing this file's key would alias the block
	/// back-references.
	pub fn update(&mut self, other: &FileInfo, blocks: &mut BlockMap) -> Result<(), ModelError> {
		debug_assert_eq!(self.kind, other.kind);
		debug_assert!(Arc::ptr_eq(&self.name, &other.name));
		debug_assert!(self.key != other.key);

		self.permissions = other.permissions;
		self.modified_s = other.modified_s;
		self.modified_ns = other.modified_ns;
		self.modified_by = other.modified_by;
		self.deleted = other.deleted;
		self.invalid = other.invalid;
		self.no_permissions = other.no_permissions;
		self.version = other.version.clone();
		self.sequence = other.sequence;
		self.size = other.size;
		self.block_size = other.block_size;

		if self.kind != FileKind::File {
			let target = match &other.content {
				Content::NotFile { symlink_target } => symlink_target.clone(),
				Content::File { .. } => {
					return Err(ModelError::MalformedRecord { entity: "file-info" })
				}
			};
			if let Content::NotFile { symlink_target } = &mut self.content {
				*symlink_target = target;
			}
			return Ok(());
		}

		let other_slots = match &other.content {
			Content::File { blocks } => blocks.clone(),
			Content::NotFile { .. } => {
				return Err(ModelError::MalformedRecord { entity: "file-info" })
			}
		};
		let preserved: HashSet<BlockHash> =
			self.blocks().iter().flatten().filter(|s| s.available).map(|s| s.hash).collect();

		self.remove_blocks(blocks);
		if let Content::File { blocks: slots } = &mut self.content {
			slots.clear();
			slots.resize(other_slots.len(), None);
		}
		for (i, slot) in other_slots.iter().enumerate() {
			let Some(slot) = slot else { continue };
			self.assign_block(blocks, &slot.hash, i)?;
			if preserved.contains(&slot.hash) {
				self.mark_local_available(blocks, i);
			}
		}
		Ok(())
	}

	/// The `.sync-conflict-` sibling name for this entry
	///
	/// Timestamp is local-zone from the modification time; the device part
	/// is the short form of the best counter's device.
	pub fn make_conflicting_name(&self) -> String {
		let own = self.name.own_name();
		let (stem, ext) = match own.rfind('.') {
			Some(pos) if pos > 0 => (&own[..pos], &own[pos..]),
			_ => (own, ""),
		};
		let utc = chrono::DateTime::from_timestamp(self.modified_s, 0).unwrap_or_default();
		let local = utc.with_timezone(&chrono::Local);
		let device_short = DeviceId::make_short(self.version.best().id);
		let conflicted = format!(
			"{}.sync-conflict-{}-{}{}",
			stem,
			local.format("%Y%m%d-%H%M%S"),
			device_short,
			ext
		);
		let parent = self.name.parent_name();
		if parent.is_empty() {
			conflicted
		} else {
			format!("{}/{}", parent, conflicted)
		}
	}

	pub fn is_synchronizing(&self) -> bool {
		self.synchronizing.load(Ordering::Relaxed)
	}

	/// Claims this file for one transfer session
	///
	/// Sets the synchronizing flag and takes the cluster-wide path lock;
	/// both are released when the guard is dropped.
	pub fn guard(&self, locks: &PathLocks) -> Result<FileGuard, ModelError> {
		if self
			.synchronizing
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return Err(ModelError::AlreadySynchronizing {
				name: self.name.full_name().to_string(),
			});
		}
		match locks.lock(self.name.full_name()) {
			Some(path_guard) => {
				Ok(FileGuard { _path_guard: path_guard, flag: self.synchronizing.clone() })
			}
			None => {
				self.synchronizing.store(false, Ordering::Release);
				Err(ModelError::AlreadySynchronizing { name: self.name.full_name().to_string() })
			}
		}
	}

	/// True when the message describes exactly this version and block set
	pub fn identical_to(&self, msg: &proto::FileInfo) -> bool {
		if !self.version.identical_to(&Version::from_proto(&msg.version)) {
			return false;
		}
		let slots = self.blocks();
		if msg.blocks.len() != slots.len() {
			return false;
		}
		for (slot, b) in slots.iter().zip(&msg.blocks) {
			match slot {
				Some(slot) => {
					let mut hash = [0u8; 32];
					if b.hash.len() > 32 {
						return false;
					}
					hash[..b.hash.len()].copy_from_slice(&b.hash);
					if slot.hash != hash {
						return false;
					}
				}
				None => return false,
			}
		}
		true
	}

	/// Renders the wire form; `include_blocks` controls the block vector
	pub fn as_proto(&self, include_blocks: bool) -> proto::FileInfo {
		let mut msg = proto::FileInfo {
			name: self.name.full_name().to_string(),
			tp: self.kind.as_proto(),
			size: self.size(),
			permissions: self.permissions,
			modified_s: self.modified_s,
			modified_ns: self.modified_ns,
			modified_by: self.modified_by,
			deleted: self.deleted,
			invalid: self.invalid,
			no_permissions: self.no_permissions,
			version: self.version.as_proto(),
			sequence: self.sequence,
			block_size: self.block_size,
			blocks: Vec::new(),
			symlink_target: self.symlink_target().unwrap_or("").to_string(),
		};
		if include_blocks && self.kind == FileKind::File {
			let mut offset = 0i64;
			for slot in self.blocks().iter().flatten() {
				msg.blocks.push(proto::BlockInfo {
					offset,
					size: slot.size,
					hash: slot.hash.to_vec(),
					weak_hash: 0,
				});
				offset += slot.size as i64;
			}
			if self.blocks().is_empty() && !self.deleted {
				msg.blocks.push(proto::BlockInfo {
					offset: 0,
					size: 0,
					hash: EMPTY_PAYLOAD_HASH.to_vec(),
					weak_hash: 0,
				});
			}
		}
		msg
	}

	/// Renders the persistent record
	pub fn as_record(&self, include_blocks: bool) -> records::FileInfo {
		records::FileInfo {
			name: self.name.full_name().to_string(),
			tp: self.kind.as_proto(),
			size: self.size(),
			permissions: self.permissions,
			modified_s: self.modified_s,
			modified_ns: self.modified_ns,
			modified_by: self.modified_by,
			deleted: self.deleted,
			invalid: self.invalid,
			no_permissions: self.no_permissions,
			version: self.version.as_proto(),
			sequence: self.sequence,
			block_size: self.block_size,
			blocks: if include_blocks {
				self.blocks().iter().flatten().map(|s| s.hash.to_vec()).collect()
			} else {
				Vec::new()
			},
			symlink_target: self.symlink_target().unwrap_or("").to_string(),
		}
	}
}

/// RAII ownership of one file transfer: synchronizing flag plus path lock
pub struct FileGuard {
	_path_guard: PathGuard,
	flag: Arc<AtomicBool>,
}

impl Drop for FileGuard {
	fn drop(&mut self) {
		self.flag.store(false, Ordering::Release);
	}
}

/// Files of one replica, indexed by uuid, name and sequence
///
/// The sequence index is ordered so streaming and iteration can range-scan
/// `(seen + 1 ..= max_sequence)`.
#[derive(Debug, Default)]
pub struct FileMap {
	by_uuid: BTreeMap<Uuid, FileInfo>,
	by_name: HashMap<String, Uuid>,
	by_sequence: BTreeMap<i64, Uuid>,
}

impl FileMap {
	pub fn new() -> Self {
		FileMap::default()
	}

	/// Inserts or replaces a file, keeping all three indexes consistent
	///
	/// A displaced entry must have been detached from its blocks already;
	/// the map cannot release block references itself.
	pub fn put(&mut self, file: FileInfo) {
		if let Some(prev) = self.by_uuid.remove(&file.uuid()) {
			debug_assert!(prev.blocks().iter().all(|s| s.is_none()));
			self.by_name.remove(prev.name.full_name());
			self.by_sequence.remove(&prev.sequence);
		}
		if let Some(other) = self.by_name.remove(file.name.full_name()) {
			if let Some(prev) = self.by_uuid.remove(&other) {
				debug_assert!(prev.blocks().iter().all(|s| s.is_none()));
				self.by_sequence.remove(&prev.sequence);
			}
		}
		self.by_name.insert(file.name.full_name().to_string(), file.uuid());
		self.by_sequence.insert(file.sequence, file.uuid());
		self.by_uuid.insert(file.uuid(), file);
	}

	pub fn remove(&mut self, uuid: &Uuid) -> Option<FileInfo> {
		let file = self.by_uuid.remove(uuid)?;
		self.by_name.remove(file.name.full_name());
		self.by_sequence.remove(&file.sequence);
		Some(file)
	}

	pub fn by_uuid(&self, uuid: &Uuid) -> Option<&FileInfo> {
		self.by_uuid.get(uuid)
	}

	pub fn by_uuid_mut(&mut self, uuid: &Uuid) -> Option<&mut FileInfo> {
		self.by_uuid.get_mut(uuid)
	}

	pub fn by_name(&self, name: &str) -> Option<&FileInfo> {
		self.by_name.get(name).and_then(|uuid| self.by_uuid.get(uuid))
	}

	pub fn by_name_mut(&mut self, name: &str) -> Option<&mut FileInfo> {
		let uuid = *self.by_name.get(name)?;
		self.by_uuid.get_mut(&uuid)
	}

	pub fn by_sequence(&self, sequence: i64) -> Option<&FileInfo> {
		self.by_sequence.get(&sequence).and_then(|uuid| self.by_uuid.get(uuid))
	}

	/// Uuids of files with `lower <= sequence <= upper`, in sequence order
	pub fn range(&self, range: RangeInclusive<i64>) -> Vec<Uuid> {
		self.by_sequence.range(range).map(|(_, uuid)| *uuid).collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
		self.by_uuid.values()
	}

	pub fn len(&self) -> usize {
		self.by_uuid.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_uuid.is_empty()
	}

	/// Drops every file, detaching their blocks first
	pub fn clear(&mut self, blocks: &mut BlockMap) {
		for (_, mut file) in std::mem::take(&mut self.by_uuid) {
			file.remove_blocks(blocks);
		}
		self.by_name.clear();
		self.by_sequence.clear();
	}
}


// vim: ts=4
