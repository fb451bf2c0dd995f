//! Cluster message processing and diff application end to end.

use bepcore::db::records;
use bepcore::diff::{
	Advance, CloseTransaction, CreateFolder, Diff, DiffKind, FlushFile, LocalUpdate, NewFile,
	ShareFolder, UpsertFolderInfo,
};
use bepcore::error::{Error, ModelError};
use bepcore::model::{resolve, AdvanceAction, Cluster, Device, DeviceId, DeviceSha};
use bepcore::proto;
use uuid::Uuid;

const FOLDER: &str = "shared";

struct Setup {
	cluster: Cluster,
	peer: DeviceSha,
}

fn setup() -> Setup {
	let local_id = DeviceId::from_sha256(&[0xAA; 32]);
	let peer_id = DeviceId::from_sha256(&[0xBB; 32]);
	let peer = *peer_id.sha256();

	let mut cluster = Cluster::new(local_id, 5, 32);
	cluster.devices_mut().put(Device::new(peer_id, "peer", "")).unwrap();
	CreateFolder::create(
		&mut cluster,
		records::Folder { id: FOLDER.to_string(), ..Default::default() },
	)
	.unwrap()
	.apply(&mut cluster)
	.unwrap();
	Setup { cluster, peer }
}

fn share_with_peer(s: &mut Setup, index_id: u64) -> Uuid {
	Diff::new(DiffKind::UpsertFolderInfo(UpsertFolderInfo {
		uuid: s.cluster.next_uuid(),
		device: s.peer,
		folder_id: FOLDER.to_string(),
		index_id,
		max_sequence: 0,
	}))
	.apply(&mut s.cluster)
	.unwrap();
	s.cluster.folders().by_id(FOLDER).unwrap().is_shared_with(&s.peer).unwrap()
}

fn block(hash: [u8; 32], size: i32) -> proto::BlockInfo {
	proto::BlockInfo { offset: 0, size, hash: hash.to_vec(), weak_hash: 0 }
}

fn file_msg(name: &str, blocks: Vec<proto::BlockInfo>, version: &[(u64, u64)]) -> proto::FileInfo {
	let size: i64 = blocks.iter().map(|b| b.size as i64).sum();
	proto::FileInfo {
		name: name.to_string(),
		size,
		block_size: blocks.first().map(|b| b.size).unwrap_or(0),
		blocks,
		version: proto::Vector {
			counters: version.iter().map(|&(id, value)| proto::Counter { id, value }).collect(),
		},
		sequence: 1,
		modified_s: 1_700_000_000,
		..Default::default()
	}
}

#[test]
fn test_cluster_config_upserts_replica_and_remote_views() {
	let mut s = setup();
	share_with_peer(&mut s, 1);
	let local_sha = s.cluster.local_sha();

	let msg = proto::ClusterConfig {
		folders: vec![proto::Folder {
			id: FOLDER.to_string(),
			devices: vec![
				proto::Device {
					id: local_sha.to_vec(),
					index_id: 0x1111,
					max_sequence: 3,
					..Default::default()
				},
				proto::Device {
					id: s.peer.to_vec(),
					index_id: 0x2222,
					max_sequence: 7,
					..Default::default()
				},
			],
			..Default::default()
		}],
	};

	let diff = s.cluster.process_cluster_config(&msg, &s.peer).unwrap().unwrap();
	diff.apply(&mut s.cluster).unwrap();

	let folder = s.cluster.folders().by_id(FOLDER).unwrap();
	let fi = folder.folder_infos().by_device(&s.peer).unwrap();
	assert_eq!(fi.index_id(), 0x2222);
	assert_eq!(fi.max_sequence(), 7);

	let peer = s.cluster.devices().by_sha256(&s.peer).unwrap();
	let view = peer.remote_views().get(FOLDER, &local_sha).unwrap();
	assert_eq!((view.index_id, view.max_sequence), (0x1111, 3));
	let view = peer.remote_views().get(FOLDER, &s.peer).unwrap();
	assert_eq!((view.index_id, view.max_sequence), (0x2222, 7));
}

#[test]
fn test_unknown_folder_becomes_pending_and_sharing_adopts_it() {
	let mut s = setup();

	let msg = proto::ClusterConfig {
		folders: vec![proto::Folder {
			id: "offered".to_string(),
			label: "Offered".to_string(),
			devices: vec![proto::Device {
				id: s.peer.to_vec(),
				index_id: 0x77,
				max_sequence: 5,
				..Default::default()
			}],
			..Default::default()
		}],
	};
	let diff = s.cluster.process_cluster_config(&msg, &s.peer).unwrap().unwrap();
	diff.apply(&mut s.cluster).unwrap();

	let pending = s.cluster.pending_folders().by_device_and_id(&s.peer, "offered").unwrap();
	assert_eq!(pending.index_id(), 0x77);
	assert_eq!(pending.max_sequence(), 5);

	// the user accepts: create the folder, then attach the pending offer
	CreateFolder::create(
		&mut s.cluster,
		records::Folder { id: "offered".to_string(), ..Default::default() },
	)
	.unwrap()
	.apply(&mut s.cluster)
	.unwrap();
	let share = ShareFolder::create(&mut s.cluster, &s.peer, "offered").unwrap();
	share.apply(&mut s.cluster).unwrap();

	assert!(s.cluster.pending_folders().by_device_and_id(&s.peer, "offered").is_none());
	let folder = s.cluster.folders().by_id("offered").unwrap();
	let fi = folder.folder_infos().by_device(&s.peer).unwrap();
	assert_eq!(fi.index_id(), 0x77);
	assert_eq!(fi.max_sequence(), 5);
}

#[test]
fn test_index_for_unshared_folder_is_rejected() {
	let mut s = setup();
	// the folder exists but the peer has no replica
	let msg = proto::Index { folder: FOLDER.to_string(), files: Vec::new() };
	let r = s.cluster.process_index(&msg, &s.peer);
	assert!(matches!(r, Err(ModelError::FolderNotShared { .. })));

	let msg = proto::Index { folder: "nope".to_string(), files: Vec::new() };
	let r = s.cluster.process_index(&msg, &s.peer);
	assert!(matches!(r, Err(ModelError::FolderDoesNotExist { .. })));
}

#[test]
fn test_index_files_land_in_peer_replica() {
	let mut s = setup();
	share_with_peer(&mut s, 1);

	let msg = proto::Index {
		folder: FOLDER.to_string(),
		files: vec![
			{
				let mut f = file_msg("a.bin", vec![block([1; 32], 512)], &[(2, 1)]);
				f.sequence = 1;
				f
			},
			{
				let mut f = file_msg("b.bin", vec![block([2; 32], 512)], &[(2, 2)]);
				f.sequence = 2;
				f
			},
		],
	};
	let diff = s.cluster.process_index(&msg, &s.peer).unwrap().unwrap();
	diff.apply(&mut s.cluster).unwrap();

	let folder = s.cluster.folders().by_id(FOLDER).unwrap();
	let fi = folder.folder_infos().by_device(&s.peer).unwrap();
	assert_eq!(fi.files().len(), 2);
	assert_eq!(fi.max_sequence(), 2);
	for f in fi.files().iter() {
		assert!(f.sequence() <= fi.max_sequence());
	}
	assert_eq!(s.cluster.blocks().by_hash(&[1; 32]).unwrap().use_count(), 1);
}

#[test]
fn test_remote_copy_adopts_peer_file() {
	let mut s = setup();
	let peer_fi = share_with_peer(&mut s, 1);

	let remote = file_msg("pulled.bin", vec![block([7; 32], 1024)], &[(2, 5)]);
	Diff::new(DiffKind::NewFile(NewFile {
		folder_id: FOLDER.to_string(),
		device: s.peer,
		file: remote,
		assign_sequence: false,
	}))
	.apply(&mut s.cluster)
	.unwrap();

	let (action, file_uuid) = {
		let folder = s.cluster.folders().by_id(FOLDER).unwrap();
		let fi = folder.folder_infos().by_uuid(&peer_fi).unwrap();
		let file = fi.files().by_name("pulled.bin").unwrap();
		(resolve(&s.cluster, fi, file), file.uuid())
	};
	assert_eq!(action, AdvanceAction::RemoteCopy);

	let diff = Advance::create(&s.cluster, action, peer_fi, &file_uuid).unwrap().unwrap();
	diff.apply(&mut s.cluster).unwrap();

	let folder = s.cluster.folders().by_id(FOLDER).unwrap();
	let local_fi = folder.folder_infos().by_device(&s.cluster.local_sha()).unwrap();
	let local = local_fi.files().by_name("pulled.bin").unwrap();
	assert_eq!(local.sequence(), 1);
	assert_eq!(local.version().best().id, 2);
	assert!(!local.is_locally_available());
	// the block is now shared by both replicas' entries
	assert_eq!(s.cluster.blocks().by_hash(&[7; 32]).unwrap().use_count(), 2);
}

#[test]
fn test_conflict_resolution_preserves_loser() {
	let mut s = setup();
	let peer_fi = share_with_peer(&mut s, 1);

	// concurrent versions of the same name, remote wins by device id
	let local_msg = file_msg("doc.txt", vec![block([3; 32], 256)], &[(1, 5)]);
	LocalUpdate::create(&s.cluster, FOLDER, local_msg)
		.unwrap()
		.apply(&mut s.cluster)
		.unwrap();

	let remote_msg = file_msg("doc.txt", vec![block([4; 32], 256)], &[(u64::MAX, u64::MAX)]);
	Diff::new(DiffKind::NewFile(NewFile {
		folder_id: FOLDER.to_string(),
		device: s.peer,
		file: remote_msg,
		assign_sequence: false,
	}))
	.apply(&mut s.cluster)
	.unwrap();

	let (action, file_uuid, expected_conflict) = {
		let folder = s.cluster.folders().by_id(FOLDER).unwrap();
		let fi = folder.folder_infos().by_uuid(&peer_fi).unwrap();
		let file = fi.files().by_name("doc.txt").unwrap();
		let local_fi = folder.folder_infos().by_device(&s.cluster.local_sha()).unwrap();
		let conflict = local_fi.files().by_name("doc.txt").unwrap().make_conflicting_name();
		(resolve(&s.cluster, fi, file), file.uuid(), conflict)
	};
	assert_eq!(action, AdvanceAction::ResolveRemoteWin);
	assert!(expected_conflict.contains(".sync-conflict-"));

	let diff = Advance::create(&s.cluster, action, peer_fi, &file_uuid).unwrap().unwrap();
	diff.apply(&mut s.cluster).unwrap();

	let folder = s.cluster.folders().by_id(FOLDER).unwrap();
	let local_fi = folder.folder_infos().by_device(&s.cluster.local_sha()).unwrap();
	// the canonical name now carries the remote version
	let winner = local_fi.files().by_name("doc.txt").unwrap();
	assert_eq!(winner.version().best().id, u64::MAX);
	// the losing content survives under its conflict name
	let loser = local_fi.files().by_name(&expected_conflict).unwrap();
	assert!(loser.is_locally_available());
	assert!(loser.version().counters().iter().any(|c| c.id == 1));
}

#[test]
fn test_local_update_records_orphaned_blocks() {
	let mut s = setup();

	let first = file_msg("data.bin", vec![block([0x10; 32], 128)], &[(1, 1)]);
	LocalUpdate::create(&s.cluster, FOLDER, first).unwrap().apply(&mut s.cluster).unwrap();
	assert!(s.cluster.blocks().by_hash(&[0x10; 32]).is_some());

	let second = file_msg("data.bin", vec![block([0x20; 32], 128)], &[(1, 2)]);
	let diff = LocalUpdate::create(&s.cluster, FOLDER, second).unwrap();
	if let DiffKind::LocalUpdate(d) = diff.kind() {
		assert_eq!(d.removed_blocks, vec![[0x10; 32]]);
	} else {
		panic!("expected a local update diff");
	}
	diff.apply(&mut s.cluster).unwrap();

	// the old block lost its last referent, the new one is live and local
	assert!(s.cluster.blocks().by_hash(&[0x10; 32]).is_none());
	assert_eq!(s.cluster.blocks().by_hash(&[0x20; 32]).unwrap().use_count(), 1);

	let folder = s.cluster.folders().by_id(FOLDER).unwrap();
	let fi = folder.folder_infos().by_device(&s.cluster.local_sha()).unwrap();
	let file = fi.files().by_name("data.bin").unwrap();
	assert!(file.is_locally_available());
	assert_eq!(file.sequence(), 2);
}

#[test]
fn test_block_ack_marks_availability_and_flush_verifies() {
	let mut s = setup();
	let peer_fi = share_with_peer(&mut s, 1);

	let remote = file_msg("f.bin", vec![block([5; 32], 64), block([6; 32], 64)], &[(2, 1)]);
	Diff::new(DiffKind::NewFile(NewFile {
		folder_id: FOLDER.to_string(),
		device: s.peer,
		file: remote.clone(),
		assign_sequence: false,
	}))
	.apply(&mut s.cluster)
	.unwrap();

	let file_uuid = {
		let folder = s.cluster.folders().by_id(FOLDER).unwrap();
		let fi = folder.folder_infos().by_uuid(&peer_fi).unwrap();
		fi.files().by_name("f.bin").unwrap().uuid()
	};
	Advance::create(&s.cluster, AdvanceAction::RemoteCopy, peer_fi, &file_uuid)
		.unwrap()
		.unwrap()
		.apply(&mut s.cluster)
		.unwrap();

	// flushing before the blocks arrived violates the post-condition
	let flush = Diff::new(DiffKind::FlushFile(FlushFile {
		folder_id: FOLDER.to_string(),
		device: s.cluster.local_sha(),
		file_name: "f.bin".to_string(),
	}));
	assert!(matches!(
		flush.apply(&mut s.cluster),
		Err(Error::Model(ModelError::NotLocallyAvailable { .. }))
	));

	// a fresh, untainted cluster finishing both blocks flushes cleanly
	let mut s = setup();
	let peer_fi = share_with_peer(&mut s, 1);
	Diff::new(DiffKind::NewFile(NewFile {
		folder_id: FOLDER.to_string(),
		device: s.peer,
		file: remote,
		assign_sequence: false,
	}))
	.apply(&mut s.cluster)
	.unwrap();
	let file_uuid = {
		let folder = s.cluster.folders().by_id(FOLDER).unwrap();
		let fi = folder.folder_infos().by_uuid(&peer_fi).unwrap();
		fi.files().by_name("f.bin").unwrap().uuid()
	};
	Advance::create(&s.cluster, AdvanceAction::RemoteCopy, peer_fi, &file_uuid)
		.unwrap()
		.unwrap()
		.apply(&mut s.cluster)
		.unwrap();

	for (i, hash) in [[5u8; 32], [6u8; 32]].iter().enumerate() {
		let txn = bepcore::diff::BlockTxn {
			folder_id: FOLDER.to_string(),
			device: s.cluster.local_sha(),
			file_name: "f.bin".to_string(),
			block_index: i as u32,
			block_hash: *hash,
		};
		txn.ack().apply(&mut s.cluster).unwrap();
	}

	let flush = Diff::new(DiffKind::FlushFile(FlushFile {
		folder_id: FOLDER.to_string(),
		device: s.cluster.local_sha(),
		file_name: "f.bin".to_string(),
	}));
	flush.apply(&mut s.cluster).unwrap();
}

#[test]
fn test_close_transaction_commits_on_apply() {
	let tmp = tempfile::TempDir::new().unwrap();
	let db = bepcore::db::Db::open(&tmp.path().join("c.redb")).unwrap();

	let mut s = setup();
	let txn = db.begin_write().unwrap();
	txn.put(b"\x13marker", b"persisted").unwrap();
	let diff = CloseTransaction::new(txn);
	diff.apply(&mut s.cluster).unwrap();

	assert_eq!(db.get(b"\x13marker").unwrap(), Some(b"persisted".to_vec()));
}

#[test]
fn test_tainted_cluster_rejects_further_diffs() {
	let mut s = setup();
	// creating the same folder twice fails and taints
	let dup = Diff::new(DiffKind::CreateFolder(CreateFolder {
		uuid: s.cluster.next_uuid(),
		folder: records::Folder { id: FOLDER.to_string(), ..Default::default() },
	}));
	assert!(dup.apply(&mut s.cluster).is_err());
	assert!(s.cluster.is_tainted());

	let ok = Diff::new(DiffKind::UpsertFolderInfo(UpsertFolderInfo {
		uuid: s.cluster.next_uuid(),
		device: s.peer,
		folder_id: FOLDER.to_string(),
		index_id: 1,
		max_sequence: 0,
	}));
	assert!(matches!(ok.apply(&mut s.cluster), Err(Error::Model(ModelError::Tainted))));
}

// vim: ts=4
