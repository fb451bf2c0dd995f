//! Per-peer iteration over files eligible for transfer.
//!
//! For every folder shared with the peer the iterator keeps a queue of
//! remote files worth fetching, ordered by the folder's pull order.
//! `next` round-robins across folders, skipping paths that some transfer
//! session has locked, and re-resolves each candidate at pop time so stale
//! queue entries never win.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::db::records::{FolderType, PullOrder};
use crate::logging::*;
use crate::model::file_info::FileInfo;
use crate::model::resolver::{resolve, AdvanceAction};
use crate::model::Cluster;
use crate::model::DeviceSha;

#[derive(Debug, Clone)]
struct QueueEntry {
	file: Uuid,
	name: String,
	size: i64,
	modified_s: i64,
	empty_blocks: bool,
}

impl QueueEntry {
	fn from_file(file: &FileInfo) -> Self {
		QueueEntry {
			file: file.uuid(),
			name: file.name().full_name().to_string(),
			size: file.size(),
			modified_s: file.modified_s(),
			empty_blocks: file.block_count() == 0,
		}
	}
}

/// Metadata-only entries sort before content; ties break by path
fn compare(order: PullOrder, a: &QueueEntry, b: &QueueEntry) -> Ordering {
	match (a.empty_blocks, b.empty_blocks) {
		(true, false) => return Ordering::Less,
		(false, true) => return Ordering::Greater,
		_ => {}
	}
	let by_key = match order {
		PullOrder::Random | PullOrder::Alphabetic => Ordering::Equal,
		PullOrder::Smallest => a.size.cmp(&b.size),
		PullOrder::Largest => b.size.cmp(&a.size),
		PullOrder::Oldest => a.modified_s.cmp(&b.modified_s),
		PullOrder::Newest => b.modified_s.cmp(&a.modified_s),
	};
	by_key.then_with(|| a.name.cmp(&b.name))
}

#[derive(Debug)]
struct FolderIter {
	folder: Uuid,
	peer_fi: Uuid,
	order: PullOrder,
	queue: Vec<QueueEntry>,
	seen_index: u64,
	seen_sequence: i64,
	can_receive: bool,
}

impl FolderIter {
	fn insert(&mut self, entry: QueueEntry) {
		if self.order == PullOrder::Random {
			self.queue.push(entry);
			return;
		}
		let pos = self
			.queue
			.partition_point(|existing| compare(self.order, existing, &entry) != Ordering::Greater);
		self.queue.insert(pos, entry);
	}

	fn resort(&mut self) {
		if self.order != PullOrder::Random {
			let order = self.order;
			self.queue.sort_by(|a, b| compare(order, a, b));
		}
	}
}

/// Prioritized queue of a peer's files eligible for transfer
pub struct FileIterator {
	peer: DeviceSha,
	folder_index: usize,
	folders: Vec<FolderIter>,
}

impl FileIterator {
	/// Builds the iterator over every folder shared with both sides
	pub fn new(cluster: &Cluster, peer: DeviceSha) -> Self {
		let mut iter = FileIterator { peer, folder_index: 0, folders: Vec::new() };
		let local = cluster.local_sha();
		let mut peer_fis = Vec::new();
		for folder in cluster.folders().iter() {
			if folder.is_shared_with(&local).is_none() {
				continue;
			}
			if let Some(fi_uuid) = folder.is_shared_with(&peer) {
				peer_fis.push(fi_uuid);
			}
		}
		for fi_uuid in peer_fis {
			iter.prepare_folder(cluster, fi_uuid);
		}
		iter
	}

	pub fn peer(&self) -> &DeviceSha {
		&self.peer
	}

	fn prepare_folder(&mut self, cluster: &Cluster, peer_fi: Uuid) {
		let Some((folder, fi)) = find_fi(cluster, peer_fi) else { return };
		let order = folder.pull_order();
		let can_receive = folder.folder_type() != FolderType::Send;
		let mut it = FolderIter {
			folder: folder.uuid(),
			peer_fi,
			order,
			queue: Vec::new(),
			seen_index: 0,
			seen_sequence: 0,
			can_receive,
		};
		if can_receive {
			for file in fi.files().iter() {
				if resolve(cluster, fi, file) != AdvanceAction::Ignore {
					it.insert(QueueEntry::from_file(file));
				}
			}
			it.seen_index = fi.index_id();
			it.seen_sequence = fi.max_sequence();
		}
		self.folders.push(it);
	}

	/// Pops the next transferable file: `(replica, file, action)`
	///
	/// One full round over the folders without a hit yields `None`.
	pub fn next(&mut self, cluster: &Cluster) -> Option<(Uuid, Uuid, AdvanceAction)> {
		let folders_count = self.folders.len();
		let mut scans = 0;
		while scans < folders_count {
			let idx = self.folder_index;
			let it = &mut self.folders[idx];
			let peer_fi = it.peer_fi;

			let do_scan = cluster
				.folders()
				.by_uuid(&it.folder)
				.map(|f| !f.is_paused() && !f.is_scheduled() && !f.is_suspended())
				.unwrap_or(false)
				&& !it.queue.is_empty();

			if do_scan {
				let mut i = 0;
				while i < it.queue.len() {
					if cluster.is_locked(&it.queue[i].name) {
						i += 1;
						continue;
					}
					let entry = it.queue.remove(i);
					let resolved = find_fi(cluster, peer_fi).and_then(|(_, fi)| {
						fi.files().by_uuid(&entry.file).map(|file| resolve(cluster, fi, file))
					});
					if let Some(action) = resolved {
						if action != AdvanceAction::Ignore {
							return Some((peer_fi, entry.file, action));
						}
					}
				}
			}
			self.folder_index = (self.folder_index + 1) % folders_count;
			scans += 1;
		}
		None
	}

	/// A replica changed: queue the files past the last seen sequence
	pub fn on_upsert_folder_info(&mut self, cluster: &Cluster, peer_fi: Uuid) {
		for i in 0..self.folders.len() {
			if self.folders[i].peer_fi == peer_fi {
				if self.folders[i].can_receive {
					self.populate(cluster, i);
				}
				return;
			}
		}
		self.prepare_folder(cluster, peer_fi);
	}

	fn populate(&mut self, cluster: &Cluster, idx: usize) {
		let peer_fi = self.folders[idx].peer_fi;
		let Some((_, fi)) = find_fi(cluster, peer_fi) else { return };

		let it = &mut self.folders[idx];
		if fi.index_id() != it.seen_index {
			// the peer reset its replica; everything queued is stale
			it.seen_sequence = 0;
			it.seen_index = fi.index_id();
			it.queue.clear();
		}
		let max_sequence = fi.max_sequence();
		let from = it.seen_sequence + 1;
		for uuid in fi.files().range(from..=max_sequence) {
			let Some(file) = fi.files().by_uuid(&uuid) else { continue };
			if resolve(cluster, fi, file) != AdvanceAction::Ignore {
				self.folders[idx].insert(QueueEntry::from_file(file));
			}
		}
		self.folders[idx].seen_sequence = max_sequence;
	}

	/// The folder definition changed: adjust ordering or capability
	pub fn on_upsert_folder(&mut self, cluster: &Cluster, folder_uuid: Uuid) {
		let Some(folder) = cluster.folders().by_uuid(&folder_uuid) else { return };
		let order = folder.pull_order();
		let can_receive = folder.folder_type() != FolderType::Send;

		for i in 0..self.folders.len() {
			if self.folders[i].folder != folder_uuid {
				continue;
			}
			if can_receive {
				if !self.folders[i].can_receive {
					self.folders[i].seen_sequence = 0;
					self.folders[i].can_receive = true;
					self.populate(cluster, i);
				} else if self.folders[i].order != order {
					debug!("pull order changed, resorting queue");
					self.folders[i].order = order;
					self.folders[i].resort();
				}
			} else if self.folders[i].can_receive {
				self.folders[i].queue.clear();
			}
			self.folders[i].can_receive = can_receive;
			self.folders[i].order = order;
		}
	}

	/// The peer's replica disappeared
	pub fn on_remove_folder_info(&mut self, peer_fi: Uuid) {
		if let Some(pos) = self.folders.iter().position(|it| it.peer_fi == peer_fi) {
			self.folders.remove(pos);
			self.folder_index = 0;
		}
	}

	/// A single file became interesting again (e.g. its path unlocked)
	pub fn recheck(&mut self, cluster: &Cluster, peer_fi: Uuid, file: Uuid) {
		let Some(idx) = self.folders.iter().position(|it| it.peer_fi == peer_fi) else {
			return;
		};
		if !self.folders[idx].can_receive {
			return;
		}
		let Some((_, fi)) = find_fi(cluster, peer_fi) else { return };
		let Some(file_info) = fi.files().by_uuid(&file) else { return };
		if resolve(cluster, fi, file_info) != AdvanceAction::Ignore {
			let entry = QueueEntry::from_file(file_info);
			let it = &mut self.folders[idx];
			if !it.queue.iter().any(|e| e.file == file) {
				it.insert(entry);
			}
		}
	}
}

fn find_fi(
	cluster: &Cluster,
	peer_fi: Uuid,
) -> Option<(&crate::model::folder::Folder, &crate::model::folder_info::FolderInfo)> {
	for folder in cluster.folders().iter() {
		if let Some(fi) = folder.folder_infos().by_uuid(&peer_fi) {
			return Some((folder, fi));
		}
	}
	None
}


// vim: ts=4
