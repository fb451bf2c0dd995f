//! Advancing the local replica towards a peer's file.
//!
//! An advance diff takes a peer-originated file and produces the local
//! counterpart: a plain copy when the remote version dominates, or a
//! conflict resolution that first preserves the losing local content under
//! its `.sync-conflict-` name and then adopts the remote entry.

use uuid::Uuid;

use crate::diff::modify::{upsert_file, UpsertOptions};
use crate::diff::{Diff, DiffKind};
use crate::error::{Error, ModelError};
use crate::logging::*;
use crate::model::resolver::AdvanceAction;
use crate::model::version::record_update;
use crate::model::{Cluster, DeviceSha};
use crate::proto;

/// Adoption of one peer file into the local replica
pub struct Advance {
	pub action: AdvanceAction,
	pub folder_id: String,
	pub peer: DeviceSha,
	/// The remote metadata being adopted
	pub file: proto::FileInfo,
	/// Where the losing local content goes on conflict resolution
	pub conflict_name: Option<String>,
}

impl Advance {
	/// Builds the advance diff for a resolver decision
	///
	/// `peer_fi` is the replica the file came from; `file_uuid` the file
	/// within it. `Ignore` yields no diff.
	pub fn create(
		cluster: &Cluster,
		action: AdvanceAction,
		peer_fi: Uuid,
		file_uuid: &Uuid,
	) -> Result<Option<Diff>, ModelError> {
		if action == AdvanceAction::Ignore {
			return Ok(None);
		}
		let local_sha = cluster.local_sha();

		let mut found = None;
		for folder in cluster.folders().iter() {
			if let Some(fi) = folder.folder_infos().by_uuid(&peer_fi) {
				found = Some((folder, fi));
				break;
			}
		}
		let (folder, fi) =
			found.ok_or(ModelError::FolderDoesNotExist { folder_id: String::new() })?;
		let file = fi
			.files()
			.by_uuid(file_uuid)
			.ok_or(ModelError::MalformedRecord { entity: "file-info" })?;

		let conflict_name = if action == AdvanceAction::ResolveRemoteWin {
			folder
				.folder_infos()
				.by_device(&local_sha)
				.and_then(|local_fi| local_fi.files().by_name(file.name().full_name()))
				.map(|local| local.make_conflicting_name())
		} else {
			None
		};

		Ok(Some(Diff::new(DiffKind::Advance(Advance {
			action,
			folder_id: folder.id().to_string(),
			peer: *fi.device(),
			file: file.as_proto(true),
			conflict_name,
		}))))
	}

	pub(crate) fn apply(&self, cluster: &mut Cluster) -> Result<(), Error> {
		let folder = match cluster.folders().by_id(&self.folder_id) {
			Some(folder) => folder,
			None => {
				debug!(
					"advance, folder = {}, name = {}, folder is not available, ignoring",
					self.folder_id, self.file.name
				);
				return Ok(());
			}
		};
		if folder.is_suspended() {
			debug!(
				"advance, folder = {}, name = {}, folder is suspended, ignoring",
				self.folder_id, self.file.name
			);
			return Ok(());
		}

		match self.action {
			AdvanceAction::Ignore => Ok(()),
			AdvanceAction::RemoteCopy => self.apply_remote_copy(cluster),
			AdvanceAction::LocalUpdate => self.apply_local_update(cluster),
			AdvanceAction::ResolveRemoteWin => {
				self.apply_conflict(cluster)?;
				self.apply_remote_copy(cluster)
			}
		}
	}

	/// Adopts the remote entry under its own name, keeping its version
	fn apply_remote_copy(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!("advance/remote_copy, folder = {}, name = {}", self.folder_id, self.file.name);
		let local = cluster.local_sha();
		upsert_file(
			cluster,
			&self.folder_id,
			&local,
			&self.file,
			UpsertOptions { assign_sequence: true, mark_all_available: false },
		)
	}

	/// Re-announces a locally updated entry with a bumped version
	fn apply_local_update(&self, cluster: &mut Cluster) -> Result<(), Error> {
		trace!("advance/local_update, folder = {}, name = {}", self.folder_id, self.file.name);
		let local = cluster.local_sha();
		let local_uint = cluster.local_device().uint();
		let mut msg = self.file.clone();
		msg.modified_by = local_uint;
		record_update(&mut msg.version, local_uint);
		upsert_file(
			cluster,
			&self.folder_id,
			&local,
			&msg,
			UpsertOptions { assign_sequence: true, mark_all_available: true },
		)
	}

	/// Preserves the losing local content under its conflict name
	fn apply_conflict(&self, cluster: &mut Cluster) -> Result<(), Error> {
		let Some(conflict_name) = &self.conflict_name else {
			return Ok(());
		};
		let local = cluster.local_sha();
		let local_uint = cluster.local_device().uint();

		let loser = cluster
			.folders()
			.by_id(&self.folder_id)
			.and_then(|folder| folder.folder_infos().by_device(&local))
			.and_then(|fi| fi.files().by_name(&self.file.name));
		let Some(loser) = loser else {
			return Ok(());
		};

		debug!(
			"advance/resolve_remote_win, folder = {}, '{}' -> '{}'",
			self.folder_id, self.file.name, conflict_name
		);
		let was_available = loser.is_locally_available();
		let mut copy = loser.as_proto(true);
		copy.name = conflict_name.clone();
		record_update(&mut copy.version, local_uint);

		upsert_file(
			cluster,
			&self.folder_id,
			&local,
			&copy,
			UpsertOptions { assign_sequence: true, mark_all_available: was_available },
		)
	}
}

// vim: ts=4
