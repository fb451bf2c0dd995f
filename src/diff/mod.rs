//! Immutable change trees applied to the cluster.
//!
//! A diff is a node with an optional child and sibling; application walks
//! depth-first (node, child, sibling) and is atomic from the observers'
//! perspective. The first failure latches the cluster's taint flag and
//! every later apply is rejected without touching state. A separate walk
//! dispatches each node to a [`DiffVisitor`] so collaborators (scanner,
//! transport, UI) observe changes without knowing the concrete kinds.

pub mod advance;
pub mod block;
pub mod load;
pub mod modify;

pub use advance::Advance;
pub use block::{AppendBlock, BlockAck, BlockRej, BlockTxn, CloneBlock};
pub use load::CloseTransaction;
pub use modify::{
	AddIgnoredDevice, AddIgnoredFolder, AddPendingDevice, AddPendingFolder, CreateFolder,
	FlushFile, LocalUpdate, NewFile, RemovePendingDevice, ShareFolder, UpdateRemoteView,
	UpsertFolderInfo,
};

use crate::error::Error;
use crate::logging::*;
use crate::model::Cluster;

/// Every concrete diff kind
pub enum DiffKind {
	CreateFolder(CreateFolder),
	UpsertFolderInfo(UpsertFolderInfo),
	ShareFolder(ShareFolder),
	AddPendingFolder(AddPendingFolder),
	AddPendingDevice(AddPendingDevice),
	RemovePendingDevice(RemovePendingDevice),
	AddIgnoredFolder(AddIgnoredFolder),
	AddIgnoredDevice(AddIgnoredDevice),
	UpdateRemoteView(UpdateRemoteView),
	NewFile(NewFile),
	LocalUpdate(LocalUpdate),
	Advance(Advance),
	AppendBlock(AppendBlock),
	CloneBlock(CloneBlock),
	BlockAck(BlockAck),
	BlockRej(BlockRej),
	FlushFile(modify::FlushFile),
	CloseTransaction(CloseTransaction),
}

/// One node of a diff tree
pub struct Diff {
	kind: DiffKind,
	child: Option<Box<Diff>>,
	sibling: Option<Box<Diff>>,
}

impl Diff {
	pub fn new(kind: DiffKind) -> Self {
		Diff { kind, child: None, sibling: None }
	}

	pub fn with_child(mut self, child: Diff) -> Self {
		self.child = Some(Box::new(child));
		self
	}

	pub fn with_sibling(mut self, sibling: Diff) -> Self {
		self.sibling = Some(Box::new(sibling));
		self
	}

	/// Links a list of diffs into one sibling chain
	pub fn chain(diffs: Vec<Diff>) -> Option<Diff> {
		let mut head: Option<Diff> = None;
		for diff in diffs.into_iter().rev() {
			head = Some(match head {
				Some(next) => diff.with_sibling(next),
				None => diff,
			});
		}
		head
	}

	pub fn kind(&self) -> &DiffKind {
		&self.kind
	}

	pub fn child(&self) -> Option<&Diff> {
		self.child.as_deref()
	}

	pub fn sibling(&self) -> Option<&Diff> {
		self.sibling.as_deref()
	}

	/// Applies the whole tree to the cluster
	///
	/// A tainted cluster rejects the tree outright; a failure inside the
	/// walk taints the cluster and aborts the remaining nodes.
	pub fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		if cluster.is_tainted() {
			return Err(crate::error::ModelError::Tainted.into());
		}
		match self.apply_walk(cluster) {
			Ok(()) => Ok(()),
			Err(e) => {
				error!("diff application failed, cluster is now tainted: {}", e);
				cluster.mark_tainted();
				Err(e)
			}
		}
	}

	fn apply_walk(&self, cluster: &mut Cluster) -> Result<(), Error> {
		self.apply_impl(cluster)?;
		if let Some(child) = &self.child {
			child.apply_walk(cluster)?;
		}
		if let Some(sibling) = &self.sibling {
			sibling.apply_walk(cluster)?;
		}
		Ok(())
	}

	fn apply_impl(&self, cluster: &mut Cluster) -> Result<(), Error> {
		match &self.kind {
			DiffKind::CreateFolder(d) => d.apply(cluster),
			DiffKind::UpsertFolderInfo(d) => d.apply(cluster),
			DiffKind::ShareFolder(d) => d.apply(cluster),
			DiffKind::AddPendingFolder(d) => d.apply(cluster),
			DiffKind::AddPendingDevice(d) => d.apply(cluster),
			DiffKind::RemovePendingDevice(d) => d.apply(cluster),
			DiffKind::AddIgnoredFolder(d) => d.apply(cluster),
			DiffKind::AddIgnoredDevice(d) => d.apply(cluster),
			DiffKind::UpdateRemoteView(d) => d.apply(cluster),
			DiffKind::NewFile(d) => d.apply(cluster),
			DiffKind::LocalUpdate(d) => d.apply(cluster),
			DiffKind::Advance(d) => d.apply(cluster),
			DiffKind::AppendBlock(d) => d.apply(cluster),
			DiffKind::CloneBlock(d) => d.apply(cluster),
			DiffKind::BlockAck(d) => d.apply(cluster),
			DiffKind::BlockRej(d) => d.apply(cluster),
			DiffKind::FlushFile(d) => d.apply(cluster),
			DiffKind::CloseTransaction(d) => d.apply(cluster),
		}
	}

	/// Walks the tree, dispatching each node to the visitor
	pub fn visit(&self, visitor: &mut dyn DiffVisitor) -> Result<(), Error> {
		match &self.kind {
			DiffKind::CreateFolder(d) => visitor.on_create_folder(d)?,
			DiffKind::UpsertFolderInfo(d) => visitor.on_upsert_folder_info(d)?,
			DiffKind::ShareFolder(d) => visitor.on_share_folder(d)?,
			DiffKind::AddPendingFolder(d) => visitor.on_add_pending_folder(d)?,
			DiffKind::AddPendingDevice(d) => visitor.on_add_pending_device(d)?,
			DiffKind::RemovePendingDevice(d) => visitor.on_remove_pending_device(d)?,
			DiffKind::AddIgnoredFolder(d) => visitor.on_add_ignored_folder(d)?,
			DiffKind::AddIgnoredDevice(d) => visitor.on_add_ignored_device(d)?,
			DiffKind::UpdateRemoteView(d) => visitor.on_update_remote_view(d)?,
			DiffKind::NewFile(d) => visitor.on_new_file(d)?,
			DiffKind::LocalUpdate(d) => visitor.on_local_update(d)?,
			DiffKind::Advance(d) => visitor.on_advance(d)?,
			DiffKind::AppendBlock(d) => visitor.on_append_block(d)?,
			DiffKind::CloneBlock(d) => visitor.on_clone_block(d)?,
			DiffKind::BlockAck(d) => visitor.on_block_ack(d)?,
			DiffKind::BlockRej(d) => visitor.on_block_rej(d)?,
			DiffKind::FlushFile(d) => visitor.on_flush_file(d)?,
			DiffKind::CloseTransaction(d) => visitor.on_close_transaction(d)?,
		}
		if let Some(child) = &self.child {
			child.visit(visitor)?;
		}
		if let Some(sibling) = &self.sibling {
			sibling.visit(visitor)?;
		}
		Ok(())
	}
}

/// Observer of applied diffs; every hook defaults to a no-op
#[allow(unused_variables)]
pub trait DiffVisitor {
	fn on_create_folder(&mut self, diff: &CreateFolder) -> Result<(), Error> {
		Ok(())
	}
	fn on_upsert_folder_info(&mut self, diff: &UpsertFolderInfo) -> Result<(), Error> {
		Ok(())
	}
	fn on_share_folder(&mut self, diff: &ShareFolder) -> Result<(), Error> {
		Ok(())
	}
	fn on_add_pending_folder(&mut self, diff: &AddPendingFolder) -> Result<(), Error> {
		Ok(())
	}
	fn on_add_pending_device(&mut self, diff: &AddPendingDevice) -> Result<(), Error> {
		Ok(())
	}
	fn on_remove_pending_device(&mut self, diff: &RemovePendingDevice) -> Result<(), Error> {
		Ok(())
	}
	fn on_add_ignored_folder(&mut self, diff: &AddIgnoredFolder) -> Result<(), Error> {
		Ok(())
	}
	fn on_add_ignored_device(&mut self, diff: &AddIgnoredDevice) -> Result<(), Error> {
		Ok(())
	}
	fn on_update_remote_view(&mut self, diff: &UpdateRemoteView) -> Result<(), Error> {
		Ok(())
	}
	fn on_new_file(&mut self, diff: &NewFile) -> Result<(), Error> {
		Ok(())
	}
	fn on_local_update(&mut self, diff: &LocalUpdate) -> Result<(), Error> {
		Ok(())
	}
	fn on_advance(&mut self, diff: &Advance) -> Result<(), Error> {
		Ok(())
	}
	fn on_append_block(&mut self, diff: &AppendBlock) -> Result<(), Error> {
		Ok(())
	}
	fn on_clone_block(&mut self, diff: &CloneBlock) -> Result<(), Error> {
		Ok(())
	}
	fn on_block_ack(&mut self, diff: &BlockAck) -> Result<(), Error> {
		Ok(())
	}
	fn on_block_rej(&mut self, diff: &BlockRej) -> Result<(), Error> {
		Ok(())
	}
	fn on_flush_file(&mut self, diff: &modify::FlushFile) -> Result<(), Error> {
		Ok(())
	}
	fn on_close_transaction(&mut self, diff: &CloseTransaction) -> Result<(), Error> {
		Ok(())
	}
}

// vim: ts=4
