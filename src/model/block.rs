//! Content-addressed block store.
//!
//! Blocks are shared between files and refcounted: the count equals the
//! number of live file slots holding the block, and a block reaching zero
//! is dropped from the store. Each block keeps weak `(file, index)` back
//! references so availability changes and orphan detection can walk from a
//! block to its users. Lock, single-position mode and the reference count
//! share one 32-bit counter word.

use std::collections::BTreeMap;

use crate::db::{prefix, records};
use crate::error::ModelError;
use crate::model::file_info::FileKey;
use crate::model::BlockHash;
use crate::proto;

const LOCK_MASK: u32 = 1 << 31;
const SINGLE_MASK: u32 = 1 << 30;
const COUNTER_MASK: u32 = !(LOCK_MASK | SINGLE_MASK);

/// Weak back reference from a block to one slot of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBlock {
	pub file: FileKey,
	pub index: u32,
	pub local: bool,
}

impl FileBlock {
	fn matches(&self, file: &FileKey) -> bool {
		self.file == *file
	}
}

#[derive(Debug)]
enum Positions {
	Empty,
	Single(FileBlock),
	Multi(Vec<FileBlock>),
}

/// One content-addressed block
#[derive(Debug)]
pub struct BlockInfo {
	hash: BlockHash,
	size: i32,
	counter: u32,
	positions: Positions,
}

impl BlockInfo {
	/// Builds a block from its wire form; short hashes are zero-padded
	pub fn from_proto(block: &proto::BlockInfo) -> Result<Self, ModelError> {
		if block.hash.len() > 32 {
			return Err(ModelError::InvalidKeyLength { expected: 32, actual: block.hash.len() });
		}
		let mut hash = [0u8; 32];
		hash[..block.hash.len()].copy_from_slice(&block.hash);
		Ok(BlockInfo { hash, size: block.size, counter: 0, positions: Positions::Empty })
	}

	/// Builds a block from a persisted key and record
	pub fn from_key(key: &[u8], record: &records::BlockInfo) -> Result<Self, ModelError> {
		if key.len() != 33 {
			return Err(ModelError::InvalidKeyLength { expected: 33, actual: key.len() });
		}
		if key[0] != prefix::BLOCK_INFO {
			return Err(ModelError::InvalidKeyPrefix { expected: prefix::BLOCK_INFO, actual: key[0] });
		}
		let mut hash = [0u8; 32];
		hash.copy_from_slice(&key[1..]);
		Ok(BlockInfo { hash, size: record.size, counter: 0, positions: Positions::Empty })
	}

	pub fn hash(&self) -> &BlockHash {
		&self.hash
	}

	pub fn size(&self) -> i32 {
		self.size
	}

	/// The persistent key: prefix byte plus hash
	pub fn key(&self) -> [u8; 33] {
		let mut key = [0u8; 33];
		key[0] = prefix::BLOCK_INFO;
		key[1..].copy_from_slice(&self.hash);
		key
	}

	pub fn as_record(&self) -> records::BlockInfo {
		records::BlockInfo { size: self.size }
	}

	pub fn as_bep(&self, offset: i64) -> proto::BlockInfo {
		proto::BlockInfo { offset, size: self.size, hash: self.hash.to_vec(), weak_hash: 0 }
	}

	/// Registers a `(file, index)` position
	///
	/// Zero positions become the inline single mode; a second position
	/// switches to the vector, retaining the first.
	pub fn link(&mut self, file: FileKey, index: usize) {
		let fb = FileBlock { file, index: index as u32, local: false };
		let positions = std::mem::replace(&mut self.positions, Positions::Empty);
		self.positions = match positions {
			Positions::Empty => {
				self.counter |= SINGLE_MASK;
				Positions::Single(fb)
			}
			Positions::Single(first) => {
				self.counter &= !SINGLE_MASK;
				Positions::Multi(vec![first, fb])
			}
			Positions::Multi(mut v) => {
				v.push(fb);
				Positions::Multi(v)
			}
		};
	}

	/// Removes every position of `file`; returns the freed slot indices
	///
	/// When exactly one position remains it collapses back to single mode.
	pub fn unlink(&mut self, file: &FileKey) -> Vec<usize> {
		let mut removed = Vec::with_capacity(1);
		let positions = std::mem::replace(&mut self.positions, Positions::Empty);
		self.positions = match positions {
			Positions::Empty => Positions::Empty,
			Positions::Single(fb) => {
				if fb.matches(file) {
					removed.push(fb.index as usize);
					self.counter &= !SINGLE_MASK;
					Positions::Empty
				} else {
					Positions::Single(fb)
				}
			}
			Positions::Multi(mut v) => {
				v.retain(|fb| {
					if fb.matches(file) {
						removed.push(fb.index as usize);
						false
					} else {
						true
					}
				});
				if v.len() == 1 {
					self.counter |= SINGLE_MASK;
					Positions::Single(v[0])
				} else if v.is_empty() {
					Positions::Empty
				} else {
					Positions::Multi(v)
				}
			}
		};
		removed
	}

	/// Marks one position of `file` locally available
	pub fn mark_local_available(&mut self, file: &FileKey) {
		match &mut self.positions {
			Positions::Empty => {}
			Positions::Single(fb) => {
				if fb.matches(file) {
					fb.local = true;
				}
			}
			Positions::Multi(v) => {
				if let Some(fb) = v.iter_mut().find(|fb| fb.matches(file)) {
					fb.local = true;
				}
			}
		}
	}

	/// A position whose payload is already present locally, if any
	///
	/// Transfer sessions use it to clone the block instead of fetching it.
	pub fn local_file(&self) -> Option<FileBlock> {
		self.positions().find(|fb| fb.local).copied()
	}

	/// Iterates over the registered positions
	pub fn positions(&self) -> impl Iterator<Item = &FileBlock> {
		let slice: &[FileBlock] = match &self.positions {
			Positions::Empty => &[],
			Positions::Single(fb) => std::slice::from_ref(fb),
			Positions::Multi(v) => v,
		};
		slice.iter()
	}

	pub fn positions_len(&self) -> usize {
		match &self.positions {
			Positions::Empty => 0,
			Positions::Single(_) => 1,
			Positions::Multi(v) => v.len(),
		}
	}

	pub fn is_single_mode(&self) -> bool {
		self.counter & SINGLE_MASK != 0
	}

	pub fn is_locked(&self) -> bool {
		self.counter & LOCK_MASK != 0
	}

	/// Taken by the transfer coordinator while this hash is being fetched
	pub fn lock(&mut self) {
		debug_assert!(!self.is_locked());
		self.counter |= LOCK_MASK;
	}

	pub fn unlock(&mut self) {
		debug_assert!(self.is_locked());
		self.counter &= !LOCK_MASK;
	}

	/// Bumps the reference count, preserving the flag bits
	pub fn ref_inc(&mut self) {
		let flags = self.counter & (LOCK_MASK | SINGLE_MASK);
		let value = (self.counter & COUNTER_MASK) + 1;
		self.counter = flags | (value & COUNTER_MASK);
	}

	/// Drops one reference; returns the remaining count
	pub fn ref_dec(&mut self) -> u32 {
		let flags = self.counter & (LOCK_MASK | SINGLE_MASK);
		let value = (self.counter & COUNTER_MASK).saturating_sub(1);
		self.counter = flags | value;
		value
	}

	pub fn use_count(&self) -> u32 {
		self.counter & COUNTER_MASK
	}
}

/// The cluster-wide pool of blocks, keyed by hash
#[derive(Debug, Default)]
pub struct BlockMap {
	blocks: BTreeMap<BlockHash, BlockInfo>,
}

impl BlockMap {
	pub fn new() -> Self {
		BlockMap { blocks: BTreeMap::new() }
	}

	pub fn by_hash(&self, hash: &BlockHash) -> Option<&BlockInfo> {
		self.blocks.get(hash)
	}

	pub fn by_hash_mut(&mut self, hash: &BlockHash) -> Option<&mut BlockInfo> {
		self.blocks.get_mut(hash)
	}

	/// Inserts the block unless a block with the same hash already exists
	pub fn put(&mut self, block: BlockInfo) -> bool {
		match self.blocks.entry(block.hash) {
			std::collections::btree_map::Entry::Occupied(_) => false,
			std::collections::btree_map::Entry::Vacant(e) => {
				e.insert(block);
				true
			}
		}
	}

	pub fn remove(&mut self, hash: &BlockHash) -> Option<BlockInfo> {
		self.blocks.remove(hash)
	}

	pub fn len(&self) -> usize {
		self.blocks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.blocks.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &BlockInfo> {
		self.blocks.values()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use uuid::Uuid;

	fn key(n: u8) -> FileKey {
		FileKey {
			folder_info: Uuid::from_bytes([n; 16]),
			file: Uuid::from_bytes([n.wrapping_add(1); 16]),
		}
	}

	fn block(size: i32) -> BlockInfo {
		BlockInfo::from_proto(&proto::BlockInfo {
			offset: 0,
			size,
			hash: vec![0xAB; 32],
			weak_hash: 0,
		})
		.unwrap()
	}

	#[test]
	fn test_link_modes() {
		let mut b = block(1024);
		assert_eq!(b.positions_len(), 0);
		assert!(!b.is_single_mode());

		b.link(key(1), 0);
		assert!(b.is_single_mode());
		assert_eq!(b.positions_len(), 1);

		b.link(key(2), 0);
		assert!(!b.is_single_mode());
		assert_eq!(b.positions_len(), 2);

		b.link(key(3), 4);
		assert_eq!(b.positions_len(), 3);
	}

	#[test]
	fn test_unlink_collapses_to_single() {
		let mut b = block(1024);
		b.link(key(1), 0);
		b.link(key(2), 0);

		let removed = b.unlink(&key(1));
		assert_eq!(removed, vec![0]);
		assert!(b.is_single_mode());
		assert_eq!(b.positions_len(), 1);

		let removed = b.unlink(&key(2));
		assert_eq!(removed, vec![0]);
		assert_eq!(b.positions_len(), 0);
		assert!(!b.is_single_mode());
	}

	#[test]
	fn test_unlink_removes_all_positions_of_file() {
		let mut b = block(64);
		b.link(key(1), 0);
		b.link(key(1), 3);
		b.link(key(2), 1);

		let mut removed = b.unlink(&key(1));
		removed.sort_unstable();
		assert_eq!(removed, vec![0, 3]);
		assert!(b.is_single_mode());
	}

	#[test]
	fn test_refcount_preserves_flags() {
		let mut b = block(8);
		b.link(key(1), 0);
		b.lock();
		b.ref_inc();
		b.ref_inc();
		assert_eq!(b.use_count(), 2);
		assert!(b.is_locked());
		assert!(b.is_single_mode());
		assert_eq!(b.ref_dec(), 1);
		assert!(b.is_locked());
		b.unlock();
		assert!(!b.is_locked());
		assert_eq!(b.use_count(), 1);
	}

	#[test]
	fn test_local_availability() {
		let mut b = block(8);
		b.link(key(1), 0);
		b.link(key(2), 5);
		assert!(b.local_file().is_none());

		b.mark_local_available(&key(2));
		let local = b.local_file().unwrap();
		assert_eq!(local.file, key(2));
		assert_eq!(local.index, 5);
	}

	#[test]
	fn test_map_put_is_insert_only() {
		let mut map = BlockMap::new();
		let b = block(16);
		let hash = *b.hash();
		assert!(map.put(b));
		assert!(!map.put(block(16)));
		assert!(map.by_hash(&hash).is_some());
		map.remove(&hash);
		assert!(map.by_hash(&hash).is_none());
	}

	#[test]
	fn test_key_round_trip() {
		let b = block(512);
		let key_bytes = b.key();
		assert_eq!(key_bytes[0], prefix::BLOCK_INFO);
		let restored = BlockInfo::from_key(&key_bytes, &b.as_record()).unwrap();
		assert_eq!(restored.hash(), b.hash());
		assert_eq!(restored.size(), 512);
	}
}

// vim: ts=4
