//! Error types for bepcore operations

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Model invariant and deserialization errors
///
/// Every variant carries a short kind code (the variant name) and renders a
/// human message through `Display`. Deserialization and invariant violations
/// coming from persistence mean the database is corrupt and are fatal to the
/// process; the caller decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
	/// Device referenced by a message or key is not part of the cluster
	UnknownDevice,

	/// Device with the same identifier already exists
	DeviceAlreadyExists,

	/// Folder referenced by id does not exist
	FolderDoesNotExist { folder_id: String },

	/// Folder with the same id already exists
	FolderAlreadyExists { folder_id: String },

	/// Folder is not shared with the peer that sent the message
	FolderNotShared { folder_id: String },

	/// The device a file or share originates from is missing
	SourceDeviceMissing,

	/// A persisted key has the wrong length for its entity
	InvalidKeyLength { expected: usize, actual: usize },

	/// A persisted key carries the wrong one-byte prefix
	InvalidKeyPrefix { expected: u8, actual: u8 },

	/// A persisted record could not be decoded
	MalformedRecord { entity: &'static str },

	/// A device-id string failed base32/Luhn validation
	MalformedDeviceId,

	/// Block is larger than the file it belongs to
	InvalidBlockSize,

	/// A deleted file carries blocks
	UnexpectedBlocks,

	/// Declared file size does not match the block vector
	MismatchedFileSize,

	/// A file record carries no version vector
	MissingVersion,

	/// File sequence is not unique and increasing within its replica
	InvalidSequence { sequence: i64 },

	/// Folder records must carry a non-empty id
	EmptyFolderName,

	/// The local device cannot be unpaired from itself
	CannotRemoveSelf,

	/// A block slot was already assigned
	BlockSlotOccupied { index: usize },

	/// The referenced block is not in the store
	UnknownBlock,

	/// A previous diff failed; the cluster no longer accepts mutations
	Tainted,

	/// A file is already owned by a transfer session
	AlreadySynchronizing { name: String },

	/// Post-condition of flush failed: file is not fully available locally
	NotLocallyAvailable { name: String },
}

impl fmt::Display for ModelError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ModelError::UnknownDevice => write!(f, "unknown device"),
			ModelError::DeviceAlreadyExists => write!(f, "device already exists"),
			ModelError::FolderDoesNotExist { folder_id } => {
				write!(f, "folder '{}' does not exist", folder_id)
			}
			ModelError::FolderAlreadyExists { folder_id } => {
				write!(f, "folder '{}' already exists", folder_id)
			}
			ModelError::FolderNotShared { folder_id } => {
				write!(f, "folder '{}' is not shared with the peer", folder_id)
			}
			ModelError::SourceDeviceMissing => write!(f, "source device does not exist"),
			ModelError::InvalidKeyLength { expected, actual } => {
				write!(f, "invalid key length: expected {}, got {}", expected, actual)
			}
			ModelError::InvalidKeyPrefix { expected, actual } => {
				write!(f, "invalid key prefix: expected {:#04x}, got {:#04x}", expected, actual)
			}
			ModelError::MalformedRecord { entity } => {
				write!(f, "malformed {} record", entity)
			}
			ModelError::MalformedDeviceId => write!(f, "malformed device id"),
			ModelError::InvalidBlockSize => write!(f, "block is larger than the file"),
			ModelError::UnexpectedBlocks => write!(f, "deleted file carries blocks"),
			ModelError::MismatchedFileSize => write!(f, "file size does not match blocks"),
			ModelError::MissingVersion => write!(f, "file record carries no version"),
			ModelError::InvalidSequence { sequence } => {
				write!(f, "invalid sequence {}", sequence)
			}
			ModelError::EmptyFolderName => write!(f, "folder id must not be empty"),
			ModelError::CannotRemoveSelf => write!(f, "cannot remove the local device"),
			ModelError::BlockSlotOccupied { index } => {
				write!(f, "block slot {} is already assigned", index)
			}
			ModelError::UnknownBlock => write!(f, "block is not in the store"),
			ModelError::Tainted => write!(f, "cluster is tainted by an earlier failure"),
			ModelError::AlreadySynchronizing { name } => {
				write!(f, "'{}' is already being synchronized", name)
			}
			ModelError::NotLocallyAvailable { name } => {
				write!(f, "'{}' is not fully available locally", name)
			}
		}
	}
}

impl StdError for ModelError {}

/// Persistence errors
#[derive(Debug)]
pub enum DbError {
	/// Backend (redb) error, propagated
	Backend { message: String },

	/// The stored db_version value has the wrong size
	VersionSizeMismatch { actual: usize },

	/// The database schema is newer than this build understands
	CannotDowngrade { from: u32, supported: u32 },

	/// A record loaded from the store could not be decoded
	Decode { entity: &'static str },

	/// A record could not be encoded for storage
	Encode { entity: &'static str },
}

impl fmt::Display for DbError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DbError::Backend { message } => write!(f, "database backend error: {}", message),
			DbError::VersionSizeMismatch { actual } => {
				write!(f, "db_version value has invalid size {}", actual)
			}
			DbError::CannotDowngrade { from, supported } => {
				write!(f, "cannot downgrade database from version {} (supported: {})", from, supported)
			}
			DbError::Decode { entity } => write!(f, "failed to decode {} record", entity),
			DbError::Encode { entity } => write!(f, "failed to encode {} record", entity),
		}
	}
}

impl StdError for DbError {}

impl From<redb::Error> for DbError {
	fn from(e: redb::Error) -> Self {
		DbError::Backend { message: e.to_string() }
	}
}

impl From<redb::DatabaseError> for DbError {
	fn from(e: redb::DatabaseError) -> Self {
		DbError::Backend { message: e.to_string() }
	}
}

impl From<redb::TransactionError> for DbError {
	fn from(e: redb::TransactionError) -> Self {
		DbError::Backend { message: e.to_string() }
	}
}

impl From<redb::TableError> for DbError {
	fn from(e: redb::TableError) -> Self {
		DbError::Backend { message: e.to_string() }
	}
}

impl From<redb::StorageError> for DbError {
	fn from(e: redb::StorageError) -> Self {
		DbError::Backend { message: e.to_string() }
	}
}

impl From<redb::CommitError> for DbError {
	fn from(e: redb::CommitError) -> Self {
		DbError::Backend { message: e.to_string() }
	}
}

/// Unified error type for the crate
#[derive(Debug)]
pub enum Error {
	/// Model invariant or deserialization failure
	Model(ModelError),

	/// Persistence failure
	Db(DbError),

	/// I/O failure from a chunk backend
	Io(io::Error),

	/// Operation was cancelled
	Cancelled,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Model(e) => write!(f, "model error: {}", e),
			Error::Db(e) => write!(f, "db error: {}", e),
			Error::Io(e) => write!(f, "I/O error: {}", e),
			Error::Cancelled => write!(f, "operation cancelled"),
		}
	}
}

impl StdError for Error {}

impl From<ModelError> for Error {
	fn from(e: ModelError) -> Self {
		Error::Model(e)
	}
}

impl From<DbError> for Error {
	fn from(e: DbError) -> Self {
		Error::Db(e)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Error::Io(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_model_error_display() {
		let e = ModelError::FolderDoesNotExist { folder_id: "default".to_string() };
		assert_eq!(e.to_string(), "folder 'default' does not exist");

		let e = ModelError::InvalidKeyPrefix { expected: 0x13, actual: 0x10 };
		assert_eq!(e.to_string(), "invalid key prefix: expected 0x13, got 0x10");
	}

	#[test]
	fn test_db_error_display() {
		let e = DbError::CannotDowngrade { from: 4, supported: 3 };
		assert_eq!(e.to_string(), "cannot downgrade database from version 4 (supported: 3)");
	}

	#[test]
	fn test_error_conversions() {
		let e: Error = ModelError::UnknownDevice.into();
		assert!(matches!(e, Error::Model(ModelError::UnknownDevice)));

		let e: Error = DbError::Decode { entity: "device" }.into();
		assert!(matches!(e, Error::Db(DbError::Decode { .. })));
	}
}

// vim: ts=4
