//! Streaming local index updates to a peer, bootstrap and incremental.

use bepcore::db::records;
use bepcore::diff::{CreateFolder, Diff, DiffKind, LocalUpdate, UpdateRemoteView, UpsertFolderInfo};
use bepcore::model::{Cluster, Device, DeviceId, DeviceSha, UpdatesStreamer};
use bepcore::proto;
use uuid::Uuid;

const FOLDER: &str = "docs";

struct Setup {
	cluster: Cluster,
	peer: DeviceSha,
	local_fi: Uuid,
}

fn setup() -> Setup {
	let local_id = DeviceId::from_sha256(&[0xAA; 32]);
	let peer_id = DeviceId::from_sha256(&[0xBB; 32]);
	let peer = *peer_id.sha256();

	let mut cluster = Cluster::new(local_id, 3, 32);
	cluster.devices_mut().put(Device::new(peer_id, "peer", "")).unwrap();

	CreateFolder::create(
		&mut cluster,
		records::Folder { id: FOLDER.to_string(), ..Default::default() },
	)
	.unwrap()
	.apply(&mut cluster)
	.unwrap();

	Diff::new(DiffKind::UpsertFolderInfo(UpsertFolderInfo {
		uuid: cluster.next_uuid(),
		device: peer,
		folder_id: FOLDER.to_string(),
		index_id: 0x42,
		max_sequence: 0,
	}))
	.apply(&mut cluster)
	.unwrap();

	let local_fi =
		cluster.folders().by_id(FOLDER).unwrap().is_shared_with(&cluster.local_sha()).unwrap();
	Setup { cluster, peer, local_fi }
}

fn scan_file(setup: &mut Setup, name: &str) {
	let msg = proto::FileInfo {
		name: name.to_string(),
		version: proto::Vector { counters: vec![proto::Counter { id: 1, value: 1 }] },
		..Default::default()
	};
	LocalUpdate::create(&setup.cluster, FOLDER, msg)
		.unwrap()
		.apply(&mut setup.cluster)
		.unwrap();
}

fn name_of(setup: &Setup, fi_uuid: Uuid, file_uuid: Uuid) -> String {
	let folder = setup.cluster.folders().by_id(FOLDER).unwrap();
	let fi = folder.folder_infos().by_uuid(&fi_uuid).unwrap();
	fi.files().by_uuid(&file_uuid).unwrap().name().full_name().to_string()
}

#[test]
fn test_bootstrap_streams_everything_in_sequence_order() {
	let mut s = setup();
	scan_file(&mut s, "a.txt");
	scan_file(&mut s, "b.txt");
	scan_file(&mut s, "c.txt");

	let mut streamer = UpdatesStreamer::new(&s.cluster, s.peer);

	let (f1, fi1, initial1) = streamer.next(&s.cluster).unwrap();
	assert_eq!(fi1, s.local_fi);
	assert!(initial1);
	assert_eq!(name_of(&s, fi1, f1), "a.txt");

	let (f2, _, initial2) = streamer.next(&s.cluster).unwrap();
	assert!(!initial2);
	assert_eq!(name_of(&s, s.local_fi, f2), "b.txt");

	let (f3, _, initial3) = streamer.next(&s.cluster).unwrap();
	assert!(!initial3);
	assert_eq!(name_of(&s, s.local_fi, f3), "c.txt");

	assert!(streamer.next(&s.cluster).is_none());
}

#[test]
fn test_acknowledged_sequences_are_not_resent() {
	let mut s = setup();
	scan_file(&mut s, "a.txt");
	scan_file(&mut s, "b.txt");

	// the peer claims it has already observed sequence 1 of our replica
	let local_index = {
		let folder = s.cluster.folders().by_id(FOLDER).unwrap();
		folder.folder_infos().by_uuid(&s.local_fi).unwrap().index_id()
	};
	Diff::new(DiffKind::UpdateRemoteView(UpdateRemoteView {
		peer: s.peer,
		folder_id: FOLDER.to_string(),
		device: s.cluster.local_sha(),
		index_id: local_index,
		max_sequence: 1,
	}))
	.apply(&mut s.cluster)
	.unwrap();

	let mut streamer = UpdatesStreamer::new(&s.cluster, s.peer);
	let (file, _, initial) = streamer.next(&s.cluster).unwrap();
	assert!(!initial);
	assert_eq!(name_of(&s, s.local_fi, file), "b.txt");
	assert!(streamer.next(&s.cluster).is_none());
}

#[test]
fn test_index_mismatch_forces_full_resend() {
	let mut s = setup();
	scan_file(&mut s, "a.txt");
	scan_file(&mut s, "b.txt");

	// the peer acknowledged a lot, but against a stale index id
	Diff::new(DiffKind::UpdateRemoteView(UpdateRemoteView {
		peer: s.peer,
		folder_id: FOLDER.to_string(),
		device: s.cluster.local_sha(),
		index_id: 0xDEAD,
		max_sequence: 99,
	}))
	.apply(&mut s.cluster)
	.unwrap();

	let mut streamer = UpdatesStreamer::new(&s.cluster, s.peer);
	let (file, _, initial) = streamer.next(&s.cluster).unwrap();
	assert!(initial);
	assert_eq!(name_of(&s, s.local_fi, file), "a.txt");
}

#[test]
fn test_on_update_feeds_running_session() {
	let mut s = setup();
	scan_file(&mut s, "a.txt");

	let mut streamer = UpdatesStreamer::new(&s.cluster, s.peer);
	let (file, _, _) = streamer.next(&s.cluster).unwrap();
	assert_eq!(name_of(&s, s.local_fi, file), "a.txt");
	assert!(streamer.next(&s.cluster).is_none());

	// a later scan hands the new file to the streamer
	scan_file(&mut s, "z.txt");
	let file_uuid = {
		let folder = s.cluster.folders().by_id(FOLDER).unwrap();
		let fi = folder.folder_infos().by_uuid(&s.local_fi).unwrap();
		fi.files().by_name("z.txt").unwrap().uuid()
	};
	assert!(streamer.on_update(&s.cluster, s.local_fi, file_uuid));

	let (file, _, initial) = streamer.next(&s.cluster).unwrap();
	assert!(!initial);
	assert_eq!(name_of(&s, s.local_fi, file), "z.txt");
}

#[test]
fn test_receive_only_folders_are_not_streamed() {
	let mut s = setup();
	scan_file(&mut s, "a.txt");
	s.cluster.folders_mut().by_id_mut(FOLDER).unwrap().data_mut().folder_type =
		records::FolderType::Receive;

	let mut streamer = UpdatesStreamer::new(&s.cluster, s.peer);
	assert!(streamer.next(&s.cluster).is_none());
}

// vim: ts=4
