//! # bepcore - BEP cluster-model core
//!
//! bepcore implements the cluster model of a Block Exchange Protocol
//! (Syncthing) compatible synchronizer: devices, folders, per-device folder
//! replicas, files and content-addressed blocks, the version reconciliation
//! that decides what a peer must fetch next, the iterators feeding the
//! download pipeline, and the key-value persistence layout with forward
//! migrations.
//!
//! Network I/O, message framing, the filesystem scanner and the UI are
//! external collaborators; they talk to the core exclusively through parsed
//! protocol messages and [diff](diff) trees applied on the single-threaded
//! [engine](engine) loop.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use bepcore::model::{Cluster, DeviceId};
//!
//! let local = DeviceId::from_cert(&cert_der).unwrap();
//! let mut cluster = Cluster::new(local, seed, 32);
//! let diff = cluster.process_cluster_config(&msg, &peer_sha)?;
//! diff.apply(&mut cluster)?;
//! ```

#![deny(unsafe_code)]

pub mod chunk_iterator;
pub mod db;
pub mod diff;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod proto;

// Re-export commonly used types
pub use chunk_iterator::{ChunkIterator, ChunkSource, FileSource};
pub use error::{DbError, Error, ModelError};
pub use model::{AdvanceAction, Cluster, DeviceId, FileIterator, UpdatesStreamer, LOCAL_DEVICE_ID};

// vim: ts=4
