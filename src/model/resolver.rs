//! The advance decision: what to do about a remote file.
//!
//! Given a remote file and its local counterpart the resolver decides
//! whether to ignore it, copy it, or resolve a concurrent edit in the
//! remote's favor. The decision is deterministic: version containment
//! first, then deletion state, then modification time, and finally the
//! device id of the best counter as the ultimate tie break.

use crate::logging::*;
use crate::model::file_info::FileInfo;
use crate::model::folder_info::FolderInfo;
use crate::model::Cluster;

/// Resolver output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceAction {
	Ignore,
	RemoteCopy,
	LocalUpdate,
	ResolveRemoteWin,
}

fn resolve_inner(
	cluster: &Cluster,
	remote_fi: &FolderInfo,
	remote: &FileInfo,
	local: Option<&FileInfo>,
) -> AdvanceAction {
	use AdvanceAction::*;

	if remote.is_unreachable() || remote.is_invalid() {
		return Ignore;
	}

	let local_sha = cluster.local_sha();
	let folder = match cluster.folders().by_uuid(&remote_fi.folder()) {
		Some(folder) => folder,
		None => return Ignore,
	};

	// wait until the remote version dominates every other peer's copy
	let r_v = remote.version();
	for fi in folder.folder_infos().iter() {
		if fi.uuid() == remote_fi.uuid() || fi.device() == &local_sha {
			continue;
		}
		if let Some(other) = fi.files().by_name(remote.name().full_name()) {
			if !r_v.contains(other.version()) {
				return Ignore;
			}
		}
	}

	let Some(local) = local else {
		return RemoteCopy;
	};
	// not scanned yet, re-check later
	if !local.is_local() {
		return Ignore;
	}
	if remote.is_deleted() && local.is_deleted() {
		return Ignore;
	}

	let l_v = local.version();
	let r_best = r_v.best();
	let l_best = l_v.best();

	if r_best.id == l_best.id {
		return if l_best.value > r_best.value {
			Ignore
		} else if l_best.value < r_best.value {
			RemoteCopy
		} else {
			Ignore
		};
	}

	let r_superior = r_v.contains(l_v);
	let l_superior = l_v.contains(r_v);
	if !r_superior && !l_superior {
		// concurrent: a lone deletion loses to surviving content
		if remote.is_deleted() {
			return Ignore;
		}
		if local.is_deleted() {
			return RemoteCopy;
		}
	}
	if r_superior {
		return RemoteCopy;
	}
	if l_superior {
		return Ignore;
	}

	let rm = remote.modified_s();
	let lm = local.modified_s();
	if rm > lm {
		return ResolveRemoteWin;
	}
	if lm > rm {
		return Ignore;
	}
	if r_best.id >= l_best.id {
		ResolveRemoteWin
	} else {
		Ignore
	}
}

/// Decides the advance action for `remote` within its replica
pub fn resolve(cluster: &Cluster, remote_fi: &FolderInfo, remote: &FileInfo) -> AdvanceAction {
	let local_sha = cluster.local_sha();
	let local_file = cluster
		.folders()
		.by_uuid(&remote_fi.folder())
		.and_then(|folder| folder.folder_infos().by_device(&local_sha))
		.and_then(|fi| fi.files().by_name(remote.name().full_name()));

	let mut action = resolve_inner(cluster, remote_fi, remote, local_file);
	if action == AdvanceAction::ResolveRemoteWin {
		// never cascade conflict copies of conflict copies
		if remote.name().own_name().contains(".sync-conflict-") {
			action = AdvanceAction::Ignore;
		} else if let Some(local) = local_file {
			let resolved_name = local.make_conflicting_name();
			let local_files = cluster
				.folders()
				.by_uuid(&remote_fi.folder())
				.and_then(|folder| folder.folder_infos().by_device(&local_sha));
			if let Some(fi) = local_files {
				if fi.files().by_name(&resolved_name).is_some() {
					trace!("conflict copy '{}' already exists, ignoring", resolved_name);
					action = AdvanceAction::Ignore;
				}
			}
		}
	}
	action
}

// vim: ts=4
