//! Parsed Block Exchange Protocol message shapes.
//!
//! The core consumes and emits parsed messages; framing, compression and the
//! wire encoding itself belong to the transport collaborator. Message type
//! tags, field sets and enum values follow the BEP schema exactly, so a
//! codec can map these structs one-to-one onto the wire format.

use serde::{Deserialize, Serialize};

/// Numeric message type tags of the BEP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
	ClusterConfig = 0,
	Index = 1,
	IndexUpdate = 2,
	Request = 3,
	Response = 4,
	DownloadProgress = 5,
	Ping = 6,
	Close = 7,
	Hello = 8,
}

/// Per-message compression marker of the BEP header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MessageCompression {
	#[default]
	None = 0,
	Lz4 = 1,
}

/// Device-level compression preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Compression {
	#[default]
	Metadata = 0,
	Never = 1,
	Always = 2,
}

/// File entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileInfoType {
	#[default]
	File = 0,
	Directory = 1,
	SymlinkFile = 2,
	SymlinkDirectory = 3,
	Symlink = 4,
}

/// Response error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ErrorCode {
	#[default]
	NoError = 0,
	Generic = 1,
	NoSuchFile = 2,
	InvalidFile = 3,
}

/// Download progress update kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FileDownloadProgressUpdateType {
	#[default]
	Append = 0,
	Forget = 1,
}

/// Message header: type tag plus compression marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub tp: MessageType,
	pub compression: MessageCompression,
}

/// Pre-encryption greeting carrying the peer's identity strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
	pub device_name: String,
	pub client_name: String,
	pub client_version: String,
}

/// UDP announcement payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announce {
	pub id: Vec<u8>,
	pub addresses: Vec<String>,
	pub instance_id: u64,
}

/// Per-device entry inside a ClusterConfig folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
	pub id: Vec<u8>,
	pub name: String,
	pub addresses: Vec<String>,
	pub compression: Compression,
	pub cert_name: String,
	pub max_sequence: i64,
	pub introducer: bool,
	pub index_id: u64,
	pub skip_introduction_removals: bool,
}

/// Folder entry of a ClusterConfig
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Folder {
	pub id: String,
	pub label: String,
	pub read_only: bool,
	pub ignore_permissions: bool,
	pub ignore_delete: bool,
	pub disable_temp_indexes: bool,
	pub paused: bool,
	pub devices: Vec<Device>,
}

/// Exchange of the full folder/device sharing topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
	pub folders: Vec<Folder>,
}

/// One device's monotone counter inside a version vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
	pub id: u64,
	pub value: u64,
}

/// Wire form of a version vector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vector {
	pub counters: Vec<Counter>,
}

/// One content block of a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
	pub offset: i64,
	pub size: i32,
	pub hash: Vec<u8>,
	pub weak_hash: u32,
}

/// File metadata as exchanged in Index / IndexUpdate messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileInfo {
	pub name: String,
	pub tp: FileInfoType,
	pub size: i64,
	pub permissions: u32,
	pub modified_s: i64,
	pub modified_ns: i32,
	pub modified_by: u64,
	pub deleted: bool,
	pub invalid: bool,
	pub no_permissions: bool,
	pub version: Vector,
	pub sequence: i64,
	pub block_size: i32,
	pub blocks: Vec<BlockInfo>,
	pub symlink_target: String,
}

/// Full listing of a folder replica
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Index {
	pub folder: String,
	pub files: Vec<FileInfo>,
}

/// Incremental listing of a folder replica
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexUpdate {
	pub folder: String,
	pub files: Vec<FileInfo>,
}

/// Request for one block of a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
	pub id: i32,
	pub folder: String,
	pub name: String,
	pub offset: i64,
	pub size: i32,
	pub hash: Vec<u8>,
	pub from_temporary: bool,
	pub weak_hash: u32,
}

/// Response carrying block payload or an error code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
	pub id: i32,
	pub data: Vec<u8>,
	pub code: ErrorCode,
}

/// One progress entry of a DownloadProgress message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDownloadProgressUpdate {
	pub update_type: FileDownloadProgressUpdateType,
	pub name: String,
	pub version: Vector,
	pub block_indexes: Vec<i32>,
}

/// Periodic notice of partially downloaded files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadProgress {
	pub folder: String,
	pub updates: Vec<FileDownloadProgressUpdate>,
}

/// Connection teardown notice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Close {
	pub reason: String,
}

impl Vector {
	pub fn is_empty(&self) -> bool {
		self.counters.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_message_type_tags() {
		assert_eq!(MessageType::ClusterConfig as u8, 0);
		assert_eq!(MessageType::Index as u8, 1);
		assert_eq!(MessageType::IndexUpdate as u8, 2);
		assert_eq!(MessageType::Request as u8, 3);
		assert_eq!(MessageType::Response as u8, 4);
		assert_eq!(MessageType::DownloadProgress as u8, 5);
		assert_eq!(MessageType::Ping as u8, 6);
		assert_eq!(MessageType::Close as u8, 7);
		assert_eq!(MessageType::Hello as u8, 8);
	}

	#[test]
	fn test_enum_values() {
		assert_eq!(Compression::Metadata as u8, 0);
		assert_eq!(Compression::Never as u8, 1);
		assert_eq!(Compression::Always as u8, 2);
		assert_eq!(FileInfoType::Symlink as u8, 4);
		assert_eq!(ErrorCode::NoSuchFile as u8, 2);
	}
}

// vim: ts=4
