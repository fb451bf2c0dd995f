//! Block-level transactions.
//!
//! Appending and cloning carry the payload movement; they mutate nothing
//! in the model and exist so the transfer collaborators can observe and
//! execute them. The acknowledgment marks one position locally available;
//! the rejection leaves the model untouched.

use crate::diff::{Diff, DiffKind};
use crate::error::Error;
use crate::logging::*;
use crate::model::{BlockHash, Cluster, DeviceSha};

/// Common coordinates of one block operation
#[derive(Debug, Clone)]
pub struct BlockTxn {
	pub folder_id: String,
	pub device: DeviceSha,
	pub file_name: String,
	pub block_index: u32,
	pub block_hash: BlockHash,
}

impl BlockTxn {
	/// The success continuation: marks the block locally available
	pub fn ack(&self) -> Diff {
		Diff::new(DiffKind::BlockAck(BlockAck { txn: self.clone() }))
	}

	/// The failure continuation: reports and leaves the model unchanged
	pub fn rej(&self) -> Diff {
		Diff::new(DiffKind::BlockRej(BlockRej { txn: self.clone() }))
	}
}

/// A fetched payload to be written at the block's offset
pub struct AppendBlock {
	pub txn: BlockTxn,
	pub data: Vec<u8>,
}

impl AppendBlock {
	pub(crate) fn apply(&self, _cluster: &mut Cluster) -> Result<(), Error> {
		trace!(
			"append_block, folder = {}, file = {}, block #{}",
			self.txn.folder_id,
			self.txn.file_name,
			self.txn.block_index
		);
		Ok(())
	}
}

/// Reuse of an identical block already present in another local file
pub struct CloneBlock {
	pub txn: BlockTxn,
	pub source_device: DeviceSha,
	pub source_folder_id: String,
	pub source_file_name: String,
	pub source_block_index: u32,
}

impl CloneBlock {
	pub(crate) fn apply(&self, _cluster: &mut Cluster) -> Result<(), Error> {
		trace!(
			"clone_block, '{}' #{} <- '{}' #{}",
			self.txn.file_name,
			self.txn.block_index,
			self.source_file_name,
			self.source_block_index
		);
		Ok(())
	}
}

/// Confirms one block landed on disk and matched its hash
pub struct BlockAck {
	pub txn: BlockTxn,
}

impl BlockAck {
	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		let txn = &self.txn;
		let mut marked = false;
		let (folders, blocks) = cluster.folders_and_blocks_mut();
		if let Some(folder) = folders.by_id_mut(&txn.folder_id) {
			if let Some(fi) = folder.folder_infos_mut().by_device_mut(&txn.device) {
				if let Some(file) = fi.files_mut().by_name_mut(&txn.file_name) {
					let index = txn.block_index as usize;
					if !file.is_block_available(index) {
						file.mark_local_available(blocks, index);
						marked = true;
					}
				}
			}
		}
		if marked {
			trace!(
				"block_ack, folder = {}, file = {}, block #{}",
				txn.folder_id,
				txn.file_name,
				txn.block_index
			);
		} else {
			trace!(
				"block_ack without effect, folder = {}, file = {}, block #{}",
				txn.folder_id,
				txn.file_name,
				txn.block_index
			);
		}
		Ok(())
	}
}

/// A block failed verification or could not be written
pub struct BlockRej {
	pub txn: BlockTxn,
}

impl BlockRej {
	pub(crate) fn apply(&self, _cluster: &mut Cluster) -> Result<(), Error> {
		trace!(
			"block_rej, folder = {}, file = {}, block #{}",
			self.txn.folder_id,
			self.txn.file_name,
			self.txn.block_index
		);
		Ok(())
	}
}

// vim: ts=4
