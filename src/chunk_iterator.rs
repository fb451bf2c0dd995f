//! Per-file cursor over the blocks of a partially transferred file.
//!
//! The iterator reads unhashed block payloads from the partial local copy
//! through a random-read backend, hands them to the hasher, and collects
//! acknowledgments: a matching hash marks the position valid. A read error
//! abandons the whole file; the worker posts the failure back to the loop
//! and the entry is retried later.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::model::file_info::FileInfo;
use crate::model::{BlockHash, FileKey};

/// Random-read access to the partial file
pub trait ChunkSource {
	fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// Plain filesystem backend
pub struct FileSource {
	file: File,
}

impl FileSource {
	pub fn open(path: &Path) -> io::Result<Self> {
		Ok(FileSource { file: File::open(path)? })
	}
}

impl ChunkSource for FileSource {
	fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
		self.file.seek(SeekFrom::Start(offset))?;
		let mut buf = vec![0u8; len];
		self.file.read_exact(&mut buf)?;
		Ok(buf)
	}
}

/// One payload chunk plus its block index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
	pub data: Vec<u8>,
	pub index: usize,
}

/// Cursor yielding unhashed chunks of one file
pub struct ChunkIterator {
	file: FileKey,
	hashes: Vec<BlockHash>,
	block_size: i64,
	file_size: i64,
	backend: Box<dyn ChunkSource + Send>,
	last_queued_block: usize,
	unhashed_blocks: usize,
	valid_blocks: Vec<bool>,
	valid_count: usize,
	abandoned: bool,
}

impl ChunkIterator {
	/// Binds the cursor to a file's block list and a local backend
	pub fn new(file: &FileInfo, backend: Box<dyn ChunkSource + Send>) -> Self {
		let hashes: Vec<BlockHash> =
			file.blocks().iter().map(|s| s.map(|slot| slot.hash).unwrap_or([0u8; 32])).collect();
		let total = hashes.len();
		ChunkIterator {
			file: file.key(),
			hashes,
			block_size: file.block_size() as i64,
			file_size: file.size(),
			backend,
			last_queued_block: 0,
			unhashed_blocks: total,
			valid_blocks: vec![false; total],
			valid_count: 0,
			abandoned: false,
		}
	}

	pub fn file(&self) -> FileKey {
		self.file
	}

	pub fn has_more_chunks(&self) -> bool {
		!self.abandoned && self.last_queued_block < self.hashes.len()
	}

	pub fn is_abandoned(&self) -> bool {
		self.abandoned
	}

	/// Reads the next block payload
	///
	/// The final block may be shorter than the block size. A failed read
	/// abandons the iterator.
	pub fn read(&mut self) -> io::Result<Chunk> {
		debug_assert!(!self.abandoned);
		let index = self.last_queued_block;
		let offset = self.block_size * index as i64;
		let remaining = self.file_size - offset;
		let size = remaining.min(self.block_size).max(0) as usize;
		match self.backend.read_at(offset as u64, size) {
			Ok(data) => {
				self.last_queued_block += 1;
				Ok(Chunk { data, index })
			}
			Err(e) => {
				self.abandoned = true;
				Err(e)
			}
		}
	}

	/// One outstanding hash computation finished
	pub fn ack_hashing(&mut self) {
		self.unhashed_blocks = self.unhashed_blocks.saturating_sub(1);
	}

	/// A computed digest came back for one block position
	pub fn ack_block(&mut self, digest: &BlockHash, index: usize) {
		let Some(expected) = self.hashes.get(index) else { return };
		if expected != digest {
			return;
		}
		if !self.valid_blocks[index] {
			self.valid_blocks[index] = true;
			self.valid_count += 1;
		}
	}

	/// Every block's hash has been acknowledged
	pub fn is_complete(&self) -> bool {
		self.unhashed_blocks == 0
	}

	/// At least one position matched its expected hash
	pub fn has_valid_blocks(&self) -> bool {
		self.valid_count > 0
	}

	pub fn valid_blocks(&self) -> &[bool] {
		&self.valid_blocks
	}
}


// vim: ts=4
