//! Streaming local index updates to a connected peer.
//!
//! For every send-capable folder shared with the peer the streamer tracks
//! the highest sequence the peer has acknowledged. `next` yields local
//! files the peer has not seen, in sequence order, folder by folder; a
//! peer whose index id does not match the local replica starts over from
//! zero and receives a full Index instead of an IndexUpdate.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::db::records::FolderType;
use crate::logging::*;
use crate::model::{Cluster, DeviceSha};

#[derive(Debug)]
struct Streaming {
	folder_info: Uuid,
	unseen: BTreeMap<i64, Uuid>,
}

/// One peer's view of our local folder replicas
pub struct UpdatesStreamer {
	peer: DeviceSha,
	seen: BTreeMap<Uuid, i64>,
	streaming: Option<Streaming>,
}

impl UpdatesStreamer {
	pub fn new(cluster: &Cluster, peer: DeviceSha) -> Self {
		let mut streamer = UpdatesStreamer { peer, seen: BTreeMap::new(), streaming: None };
		streamer.refresh_remote(cluster);
		streamer
	}

	pub fn peer(&self) -> &DeviceSha {
		&self.peer
	}

	/// Recomputes the acknowledged sequences from the peer's remote views
	///
	/// An index-id mismatch resets the folder to zero: the peer must
	/// receive the full index again. A streaming session whose folder
	/// dropped out or reset is abandoned.
	pub fn refresh_remote(&mut self, cluster: &Cluster) {
		let local = cluster.local_sha();
		let prev_seen = std::mem::take(&mut self.seen);
		let mut reset_folders: Vec<Uuid> = Vec::new();

		for folder in cluster.folders().iter() {
			if folder.folder_type() == FolderType::Receive {
				continue;
			}
			if folder.is_shared_with(&self.peer).is_none() {
				continue;
			}
			let Some(local_fi) = folder.folder_infos().by_device(&local) else { continue };

			let view = cluster
				.devices()
				.by_sha256(&self.peer)
				.and_then(|peer| peer.remote_views().get(folder.id(), &local));
			let remote_max = match view {
				Some(view) if view.index_id == local_fi.index_id() => view.max_sequence,
				Some(_) => {
					reset_folders.push(local_fi.uuid());
					0
				}
				None => 0,
			};
			let previously = prev_seen.get(&local_fi.uuid()).copied().unwrap_or(0);
			self.seen.insert(local_fi.uuid(), remote_max.max(previously));
		}

		if let Some(streaming) = &self.streaming {
			let gone = !self.seen.contains_key(&streaming.folder_info);
			let reset = reset_folders.contains(&streaming.folder_info);
			if gone || reset {
				debug!("abandoning streaming session, replica gone or reset");
				self.streaming = None;
			}
		}
	}

	/// A local file changed; feeds the current or a fresh streaming session
	///
	/// Returns true when the update was absorbed into a session.
	pub fn on_update(&mut self, cluster: &Cluster, folder_info: Uuid, file: Uuid) -> bool {
		match &mut self.streaming {
			Some(streaming) => {
				if streaming.folder_info != folder_info {
					return false;
				}
				let Some(sequence) = file_sequence(cluster, folder_info, &file) else {
					return false;
				};
				streaming.unseen.insert(sequence, file);
				true
			}
			None => {
				let Some(&seen) = self.seen.get(&folder_info) else { return false };
				let Some(fi) = find_fi(cluster, folder_info) else { return false };
				let mut unseen = BTreeMap::new();
				for uuid in fi.files().range(seen + 1..=fi.max_sequence()) {
					if let Some(f) = fi.files().by_uuid(&uuid) {
						unseen.insert(f.sequence(), uuid);
					}
				}
				if unseen.is_empty() {
					return false;
				}
				self.streaming = Some(Streaming { folder_info, unseen });
				true
			}
		}
	}

	/// The next update for the peer: `(file, folder_info, initial)`
	///
	/// `initial` is true while the peer has acknowledged nothing for the
	/// folder, i.e. the entry belongs into a bootstrapping Index.
	pub fn next(&mut self, cluster: &Cluster) -> Option<(Uuid, Uuid, bool)> {
		loop {
			let Some(streaming) = &mut self.streaming else { break };
			let Some((&sequence, &file)) = streaming.unseen.iter().next() else {
				self.streaming = None;
				break;
			};
			streaming.unseen.remove(&sequence);
			let folder_info = streaming.folder_info;

			// the file may have been replaced since it was queued
			if file_sequence(cluster, folder_info, &file).is_none() {
				continue;
			}
			let seen = self.seen.entry(folder_info).or_insert(0);
			let initial = *seen == 0;
			*seen = sequence;
			return Some((file, folder_info, initial));
		}

		// pick a folder with unacknowledged sequences and begin streaming
		let candidates: Vec<(Uuid, i64)> = self.seen.iter().map(|(k, v)| (*k, *v)).collect();
		for (folder_info, seen_sequence) in candidates {
			let Some(fi) = find_fi(cluster, folder_info) else { continue };
			let max = fi.max_sequence();
			if seen_sequence >= max {
				continue;
			}
			let uuids = fi.files().range(seen_sequence + 1..=max);
			let mut iter = uuids.into_iter().filter_map(|uuid| {
				fi.files().by_uuid(&uuid).map(|f| (f.sequence(), uuid))
			});
			let Some((first_seq, first)) = iter.next() else { continue };

			let unseen: BTreeMap<i64, Uuid> = iter.collect();
			let initial = seen_sequence == 0;
			self.seen.insert(folder_info, first_seq);
			if !unseen.is_empty() {
				self.streaming = Some(Streaming { folder_info, unseen });
			}
			return Some((first, folder_info, initial));
		}
		None
	}
}

fn find_fi(cluster: &Cluster, folder_info: Uuid) -> Option<&crate::model::folder_info::FolderInfo> {
	for folder in cluster.folders().iter() {
		if let Some(fi) = folder.folder_infos().by_uuid(&folder_info) {
			return Some(fi);
		}
	}
	None
}

fn file_sequence(cluster: &Cluster, folder_info: Uuid, file: &Uuid) -> Option<i64> {
	find_fi(cluster, folder_info)?.files().by_uuid(file).map(|f| f.sequence())
}

// vim: ts=4
