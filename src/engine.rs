//! The single-threaded cooperative message loop.
//!
//! One task owns the cluster. Everything else (disk I/O, hashing, network,
//! TLS) runs elsewhere and communicates with the loop exclusively by
//! posting messages; diffs apply synchronously in enqueue order, so the
//! cluster observes a single total order and is never touched by more
//! than one thread. Cancelled operations finish on their worker and post
//! a final diff whose application is a no-op (e.g. a block rejection).

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::diff::{Diff, DiffVisitor};
use crate::error::Error;
use crate::logging::*;
use crate::model::Cluster;

/// Messages the loop accepts
pub enum Command {
	/// Apply a diff tree; the optional channel receives the outcome
	Apply { diff: Diff, reply: Option<oneshot::Sender<Result<(), Error>>> },

	/// Stop the loop and hand the cluster back
	Shutdown,
}

/// Posting side of the loop
#[derive(Clone)]
pub struct Engine {
	tx: mpsc::UnboundedSender<Command>,
}

impl Engine {
	/// Enqueues a diff without waiting for the outcome
	pub fn post(&self, diff: Diff) -> Result<(), Error> {
		self.tx
			.send(Command::Apply { diff, reply: None })
			.map_err(|_| Error::Cancelled)
	}

	/// Enqueues a diff and waits until the loop applied it
	pub async fn apply(&self, diff: Diff) -> Result<(), Error> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.tx
			.send(Command::Apply { diff, reply: Some(reply_tx) })
			.map_err(|_| Error::Cancelled)?;
		reply_rx.await.map_err(|_| Error::Cancelled)?
	}

	/// Asks the loop to stop; the join handle yields the cluster
	pub fn shutdown(&self) {
		let _ = self.tx.send(Command::Shutdown);
	}
}

/// Starts the loop around a cluster and an observer
///
/// The join handle resolves to the cluster once the loop shuts down.
pub fn spawn(
	mut cluster: Cluster,
	mut visitor: Box<dyn DiffVisitor + Send>,
) -> (Engine, JoinHandle<Cluster>) {
	let (tx, mut rx) = mpsc::unbounded_channel();
	let handle = tokio::spawn(async move {
		while let Some(command) = rx.recv().await {
			match command {
				Command::Apply { diff, reply } => {
					let result = diff.apply(&mut cluster);
					match &result {
						Ok(()) => {
							if let Err(e) = diff.visit(&mut *visitor) {
								warn!("diff observer failed: {}", e);
							}
						}
						Err(e) => {
							debug!("diff rejected: {}", e);
						}
					}
					if let Some(reply) = reply {
						let _ = reply.send(result);
					}
				}
				Command::Shutdown => break,
			}
		}
		cluster
	});
	(Engine { tx }, handle)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::records;
	use crate::diff::{CreateFolder, DiffKind};
	use crate::model::DeviceId;

	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	struct Counting {
		folders: Arc<AtomicUsize>,
	}

	impl DiffVisitor for Counting {
		fn on_create_folder(&mut self, _diff: &CreateFolder) -> Result<(), Error> {
			self.folders.fetch_add(1, Ordering::Relaxed);
			Ok(())
		}
	}

	fn folder_record(id: &str) -> records::Folder {
		records::Folder { id: id.to_string(), ..Default::default() }
	}

	#[tokio::test]
	async fn test_diffs_apply_in_order() {
		let mut cluster = Cluster::new(DeviceId::from_sha256(&[1; 32]), 1, 8);
		let d1 = CreateFolder::create(&mut cluster, folder_record("a")).unwrap();
		let d2 = CreateFolder::create(&mut cluster, folder_record("b")).unwrap();

		let seen = Arc::new(AtomicUsize::new(0));
		let (engine, handle) = spawn(cluster, Box::new(Counting { folders: seen.clone() }));
		engine.apply(d1).await.unwrap();
		engine.apply(d2).await.unwrap();
		engine.shutdown();

		let cluster = handle.await.unwrap();
		assert!(cluster.folders().by_id("a").is_some());
		assert!(cluster.folders().by_id("b").is_some());
		assert_eq!(seen.load(Ordering::Relaxed), 2);
	}

	#[tokio::test]
	async fn test_failure_taints_subsequent_diffs() {
		let mut cluster = Cluster::new(DeviceId::from_sha256(&[1; 32]), 1, 8);
		let good = CreateFolder::create(&mut cluster, folder_record("a")).unwrap();
		// applying the same creation twice fails the second time
		let dup = Diff::new(DiffKind::CreateFolder(CreateFolder {
			uuid: uuid::Uuid::new_v4(),
			folder: folder_record("a"),
		}));
		let after = Diff::new(DiffKind::CreateFolder(CreateFolder {
			uuid: uuid::Uuid::new_v4(),
			folder: folder_record("c"),
		}));

		let seen = Arc::new(AtomicUsize::new(0));
		let (engine, handle) = spawn(cluster, Box::new(Counting { folders: seen.clone() }));
		engine.apply(good).await.unwrap();
		assert!(engine.apply(dup).await.is_err());
		assert!(engine.apply(after).await.is_err());
		engine.shutdown();

		let cluster = handle.await.unwrap();
		assert!(cluster.is_tainted());
		assert!(cluster.folders().by_id("c").is_none());
		// only the successful diff reached the observer
		assert_eq!(seen.load(Ordering::Relaxed), 1);
	}
}

// vim: ts=4
