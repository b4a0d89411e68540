//! The document store adapter consumed by the transaction core

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::{Map, Value};

use crate::err::Error;
use crate::key::DocPath;

#[cfg(feature = "store-mem")]
#[cfg_attr(docsrs, doc(cfg(feature = "store-mem")))]
pub mod mem;

/// The attribute map of one stored document
pub type Attrs = Map<String, Value>;

/// The write applied to one attribute of one document.
///
/// `Delete` and `Increment` are the store's field sentinels: the first
/// removes the attribute, the second asks the store to add the delta
/// atomically server-side.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum WriteOp {
	Set(Value),
	Delete,
	Increment(Value),
}

/// A buffered write against one document
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Mutation {
	/// Insert; fails at commit when the document exists
	Create {
		data: Attrs,
	},
	/// Insert or replace unconditionally
	Put {
		data: Attrs,
	},
	/// Apply per-attribute operations to an existing document
	Update {
		ops: BTreeMap<String, WriteOp>,
	},
	/// Remove the document, optionally requiring it to exist
	Delete {
		must_exist: bool,
	},
}

/// Behaviour when a writeable transaction is dropped unfinished
#[derive(Clone, Copy, Debug)]
pub enum Check {
	None,
	Warn,
	Panic,
}

/// A single store transaction.
///
/// Reads executed through one transaction observe a single snapshot.
/// Mutations are buffered in application order and take effect at
/// commit, where the store applies its own concurrency control.
pub trait Transaction: Send {
	/// Check if the transaction was committed or cancelled
	fn closed(&self) -> bool;

	/// Fetch one document within the transaction
	fn get(
		&mut self,
		path: &DocPath,
	) -> impl Future<Output = Result<Option<Attrs>, Error>> + Send;

	/// Fetch several documents in one consistent batch
	fn get_all(
		&mut self,
		paths: &[DocPath],
	) -> impl Future<Output = Result<Vec<Option<Attrs>>, Error>> + Send;

	/// Buffer a mutation for commit
	fn apply(&mut self, path: &DocPath, mutation: Mutation) -> Result<(), Error>;

	/// Commit the buffered mutations
	fn commit(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

	/// Abandon the transaction
	fn cancel(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// A handle to the underlying document store.
///
/// The engine uses the transactional surface for every context that may
/// write or that wants snapshot reads, and the direct surface for
/// read-only contexts that opted out of consistency.
pub trait Store: Send + Sync + 'static {
	/// The transaction type of this store
	type Tx: Transaction;

	/// Start a new transaction
	fn transaction(&self, write: bool) -> impl Future<Output = Result<Self::Tx, Error>> + Send;

	/// Fetch one document outside any transaction
	fn get(&self, path: &DocPath) -> impl Future<Output = Result<Option<Attrs>, Error>> + Send;

	/// Fetch several documents outside any transaction
	fn get_all(
		&self,
		paths: &[DocPath],
	) -> impl Future<Output = Result<Vec<Option<Attrs>>, Error>> + Send;
}
