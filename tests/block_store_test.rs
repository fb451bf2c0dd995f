//! Block refcounting across files sharing content.

use bepcore::model::{BlockInfo, BlockMap, FileInfo};
use bepcore::proto;
use uuid::Uuid;

fn block_msg(hash: [u8; 32], size: i32) -> proto::BlockInfo {
	proto::BlockInfo { offset: 0, size, hash: hash.to_vec(), weak_hash: 0 }
}

fn file_with_block(store: &mut BlockMap, hash: [u8; 32], name: &str) -> FileInfo {
	let mut paths = bepcore::model::PathCache::new();
	let msg = proto::FileInfo {
		name: name.to_string(),
		size: 1024,
		block_size: 1024,
		blocks: vec![block_msg(hash, 1024)],
		version: proto::Vector { counters: vec![proto::Counter { id: 1, value: 1 }] },
		sequence: 1,
		..Default::default()
	};
	let mut file =
		FileInfo::from_proto(Uuid::new_v4(), &msg, Uuid::new_v4(), &mut paths).unwrap();
	file.assign_block(store, &hash, 0).unwrap();
	file
}

#[test]
fn test_shared_block_lifecycle() {
	let hash = [0xCD; 32];
	let mut store = BlockMap::new();
	assert!(store.is_empty());
	store.put(BlockInfo::from_proto(&block_msg(hash, 1024)).unwrap());

	// first referent: single position mode
	let mut f1 = file_with_block(&mut store, hash, "one.bin");
	{
		let b = store.by_hash(&hash).unwrap();
		assert_eq!(b.use_count(), 1);
		assert!(b.is_single_mode());
	}

	// second referent: the position list grows
	let mut f2 = file_with_block(&mut store, hash, "two.bin");
	{
		let b = store.by_hash(&hash).unwrap();
		assert_eq!(b.use_count(), 2);
		assert!(!b.is_single_mode());
		assert_eq!(b.positions().count(), 2);
	}

	// dropping one referent collapses back to single mode
	f1.remove_blocks(&mut store);
	{
		let b = store.by_hash(&hash).unwrap();
		assert_eq!(b.use_count(), 1);
		assert!(b.is_single_mode());
	}

	// dropping the last referent destroys the block
	f2.remove_blocks(&mut store);
	assert!(store.by_hash(&hash).is_none());
	assert!(store.is_empty());
}

#[test]
fn test_use_count_equals_live_positions() {
	let hash = [0x77; 32];
	let mut store = BlockMap::new();
	store.put(BlockInfo::from_proto(&block_msg(hash, 1024)).unwrap());

	let mut files: Vec<FileInfo> = (0..5)
		.map(|i| file_with_block(&mut store, hash, &format!("f{}.bin", i)))
		.collect();

	let b = store.by_hash(&hash).unwrap();
	assert_eq!(b.use_count() as usize, b.positions().count());
	assert_eq!(b.use_count(), 5);

	for mut f in files.drain(..3) {
		f.remove_blocks(&mut store);
	}
	let b = store.by_hash(&hash).unwrap();
	assert_eq!(b.use_count() as usize, b.positions().count());
	assert_eq!(b.use_count(), 2);
}

#[test]
fn test_local_availability_flows_to_block() {
	let hash = [0x31; 32];
	let mut store = BlockMap::new();
	store.put(BlockInfo::from_proto(&block_msg(hash, 1024)).unwrap());

	let mut f1 = file_with_block(&mut store, hash, "have.bin");
	let _f2 = file_with_block(&mut store, hash, "want.bin");

	assert!(store.by_hash(&hash).unwrap().local_file().is_none());
	f1.mark_local_available(&mut store, 0);

	// a transfer for want.bin can now clone from have.bin
	let local = store.by_hash(&hash).unwrap().local_file().unwrap();
	assert_eq!(local.file, f1.key());
	assert_eq!(local.index, 0);
}

#[test]
fn test_transfer_lock_bit() {
	let hash = [0x01; 32];
	let mut store = BlockMap::new();
	store.put(BlockInfo::from_proto(&block_msg(hash, 64)).unwrap());

	let b = store.by_hash_mut(&hash).unwrap();
	assert!(!b.is_locked());
	b.lock();
	assert!(b.is_locked());
	b.ref_inc();
	b.ref_inc();
	assert!(b.is_locked());
	assert_eq!(b.use_count(), 2);
	b.unlock();
	assert!(!b.is_locked());
	assert_eq!(b.use_count(), 2);
}

// vim: ts=4
