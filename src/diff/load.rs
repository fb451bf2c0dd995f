//! Diffs tied to the persistence lifecycle.

use std::cell::RefCell;

use crate::db::Txn;
use crate::diff::{Diff, DiffKind};
use crate::error::Error;
use crate::logging::*;
use crate::model::Cluster;

/// Carries an open write transaction and commits it when applied
///
/// Appended as the last sibling of a diff tree so that a batch of model
/// mutations persists atomically; if the tree is never applied the
/// transaction still commits on drop.
pub struct CloseTransaction {
	txn: RefCell<Option<Txn>>,
}

impl CloseTransaction {
	pub fn new(txn: Txn) -> Diff {
		Diff::new(DiffKind::CloseTransaction(CloseTransaction { txn: RefCell::new(Some(txn)) }))
	}

	pub(crate) fn apply(&self, _cluster: &mut Cluster) -> Result<(), Error> {
		trace!("applying close_transaction");
		if let Some(txn) = self.txn.borrow_mut().take() {
			txn.commit()?;
		}
		Ok(())
	}
}

// vim: ts=4
