//! The cluster model: devices, folders, replicas, files and blocks.

pub mod block;
pub mod cluster;
pub mod device;
pub mod device_id;
pub mod file_info;
pub mod file_iterator;
pub mod folder;
pub mod folder_info;
pub mod path_cache;
pub mod resolver;
pub mod some_device;
pub mod updates_streamer;
pub mod version;

pub use block::{BlockInfo, BlockMap, FileBlock};
pub use cluster::{Cluster, PathGuard, PathLocks};
pub use device::{Device, DeviceMap, DeviceState, RemoteView};
pub use device_id::{DeviceId, LOCAL_DEVICE_ID};
pub use file_info::{FileInfo, FileKey, FileKind, FileMap};
pub use file_iterator::FileIterator;
pub use folder::{Folder, FolderData, FolderMap};
pub use folder_info::{FolderInfo, FolderInfoMap};
pub use path_cache::{PathCache, PathEntry};
pub use resolver::{resolve, AdvanceAction};
pub use some_device::{PendingFolder, SomeDevice};
pub use updates_streamer::UpdatesStreamer;
pub use version::Version;

/// 32-byte SHA-256 digest of a device certificate
pub type DeviceSha = [u8; 32];

/// 32-byte SHA-256 digest of a block payload
pub type BlockHash = [u8; 32];

/// Length of the entity uuids used in persistent keys
pub const UUID_LENGTH: usize = 16;

// vim: ts=4
