//! Persistent record shapes.
//!
//! Values stored under the prefixed keys are these structs, serialized with
//! bincode. They mirror the wire messages where the entities overlap but
//! only keep what the model needs to restore itself.

use serde::{Deserialize, Serialize};

use crate::proto;

/// Whether a folder sends, receives, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FolderType {
	Send = 0,
	Receive = 1,
	#[default]
	SendAndReceive = 2,
}

/// Per-folder priority policy for choosing the next remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PullOrder {
	#[default]
	Random = 0,
	Alphabetic = 1,
	Smallest = 2,
	Largest = 3,
	Oldest = 4,
	Newest = 5,
}

/// Device record, keyed by `0x10 || sha256`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
	pub name: String,
	pub addresses: Vec<String>,
	pub compression: proto::Compression,
	pub cert_name: String,
	pub introducer: bool,
	pub skip_introduction_removals: bool,
	pub auto_accept: bool,
	pub paused: bool,
	pub last_seen: i64,
}

/// Folder record, keyed by `0x11 || uuid`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Folder {
	pub id: String,
	pub label: String,
	pub read_only: bool,
	pub ignore_permissions: bool,
	pub ignore_delete: bool,
	pub disable_temp_indexes: bool,
	pub paused: bool,
	pub scheduled: bool,
	pub path: String,
	pub folder_type: FolderType,
	pub pull_order: PullOrder,
	pub rescan_interval: u32,
}

/// Folder replica record, keyed by
/// `0x12 || device-sha256 || folder-uuid || folder-info-uuid`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderInfo {
	pub index_id: u64,
	pub max_sequence: i64,
	pub introducer_device_key: Vec<u8>,
}

/// File record, keyed by `0x13 || folder-info-uuid || file-uuid`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
	pub name: String,
	pub tp: proto::FileInfoType,
	pub size: i64,
	pub permissions: u32,
	pub modified_s: i64,
	pub modified_ns: i32,
	pub modified_by: u64,
	pub deleted: bool,
	pub invalid: bool,
	pub no_permissions: bool,
	pub version: proto::Vector,
	pub sequence: i64,
	pub block_size: i32,
	pub symlink_target: String,
	pub blocks: Vec<Vec<u8>>,
}

/// Block record, keyed by `0x17 || hash`; content address lives in the key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
	pub size: i32,
}

/// Pre-schema-3 block record shape, kept for migration only
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyBlockInfo {
	pub weak_hash: u32,
	pub size: i32,
}

/// Offered-but-unaccepted folder, keyed by `0x16 || uuid`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingFolder {
	pub folder: Folder,
	pub folder_info: FolderInfo,
}

/// Rejected folder, keyed by `0x15 || folder-id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnoredFolder {
	pub label: String,
}

/// Pending or ignored device record, keyed by
/// `0x18 || sha256` / `0x14 || sha256`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SomeDevice {
	pub name: String,
	pub client_name: String,
	pub client_version: String,
	pub address: String,
	pub last_seen: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bincode_round_trip() {
		let rec = FileInfo {
			name: "a/b.txt".to_string(),
			tp: proto::FileInfoType::File,
			size: 42,
			sequence: 7,
			version: proto::Vector { counters: vec![proto::Counter { id: 1, value: 2 }] },
			blocks: vec![vec![0xAB; 32]],
			..FileInfo::default()
		};
		let bytes = bincode::serialize(&rec).unwrap();
		let back: FileInfo = bincode::deserialize(&bytes).unwrap();
		assert_eq!(back, rec);
	}

	#[test]
	fn test_enum_defaults() {
		assert_eq!(FolderType::default(), FolderType::SendAndReceive);
		assert_eq!(PullOrder::default(), PullOrder::Random);
	}
}

// vim: ts=4
