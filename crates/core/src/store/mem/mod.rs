#![cfg(feature = "store-mem")]

//! An in-memory document store with optimistic transactions

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::err::Error;
use crate::key::DocPath;
use crate::store::{Attrs, Check, Mutation, WriteOp};

struct Inner {
	docs: HashMap<String, Attrs>,
	versions: HashMap<String, u64>,
	#[cfg(feature = "test-hooks")]
	fail_commits: u32,
}

/// A process-local document store.
///
/// Each document carries a version counter. A transaction records the
/// version of everything it reads and re-validates those versions at
/// commit, so two transactions that read and write the same document
/// conflict the way a remote store's optimistic concurrency would.
#[derive(Clone)]
pub struct Mem {
	db: Arc<Mutex<Inner>>,
}

impl Default for Mem {
	fn default() -> Self {
		Self::new()
	}
}

impl Mem {
	/// Open a new empty store
	pub fn new() -> Self {
		Mem {
			db: Arc::new(Mutex::new(Inner {
				docs: HashMap::new(),
				versions: HashMap::new(),
				#[cfg(feature = "test-hooks")]
				fail_commits: 0,
			})),
		}
	}

	/// Fail the next `n` commits with a lock timeout
	#[cfg(feature = "test-hooks")]
	pub async fn inject_commit_failures(&self, n: u32) {
		self.db.lock().await.fail_commits = n;
	}

	/// Read a document directly, bypassing all transaction machinery
	pub async fn peek(&self, path: &DocPath) -> Option<Attrs> {
		self.db.lock().await.docs.get(&path.to_string()).cloned()
	}
}

impl super::Store for Mem {
	type Tx = Transaction;

	/// Start a new transaction
	async fn transaction(&self, write: bool) -> Result<Transaction, Error> {
		// Specify the check level
		#[cfg(not(debug_assertions))]
		let check = Check::Warn;
		#[cfg(debug_assertions)]
		let check = Check::Panic;
		// Create a new transaction
		Ok(Transaction {
			db: self.db.clone(),
			done: false,
			write,
			check,
			reads: HashMap::new(),
			writes: Vec::new(),
		})
	}

	/// Fetch a document without a transaction
	async fn get(&self, path: &DocPath) -> Result<Option<Attrs>, Error> {
		Ok(self.db.lock().await.docs.get(&path.to_string()).cloned())
	}

	/// Fetch several documents without a transaction
	async fn get_all(&self, paths: &[DocPath]) -> Result<Vec<Option<Attrs>>, Error> {
		let inner = self.db.lock().await;
		Ok(paths.iter().map(|p| inner.docs.get(&p.to_string()).cloned()).collect())
	}
}

/// A transaction over the in-memory store
pub struct Transaction {
	db: Arc<Mutex<Inner>>,
	/// Is the transaction complete?
	done: bool,
	/// Is the transaction writeable?
	write: bool,
	/// Should we check unhandled transactions?
	check: Check,
	/// Versions observed by reads, validated again at commit
	reads: HashMap<String, u64>,
	/// Mutations buffered in application order
	writes: Vec<(DocPath, Mutation)>,
}

impl Drop for Transaction {
	fn drop(&mut self) {
		if !self.done && self.write {
			// Check if already panicking
			if std::thread::panicking() {
				return;
			}
			// Handle the behaviour
			match self.check {
				Check::None => {
					trace!("A transaction was dropped without being committed or cancelled");
				}
				Check::Warn => {
					warn!("A transaction was dropped without being committed or cancelled");
				}
				Check::Panic => {
					panic!("A transaction was dropped without being committed or cancelled");
				}
			}
		}
	}
}

impl super::Transaction for Transaction {
	/// Check if closed
	fn closed(&self) -> bool {
		self.done
	}

	/// Fetch a document, recording the version it was observed at
	async fn get(&mut self, path: &DocPath) -> Result<Option<Attrs>, Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		let inner = self.db.lock().await;
		let key = path.to_string();
		let version = inner.versions.get(&key).copied().unwrap_or(0);
		self.reads.insert(key.clone(), version);
		Ok(inner.docs.get(&key).cloned())
	}

	/// Fetch several documents from one snapshot
	async fn get_all(&mut self, paths: &[DocPath]) -> Result<Vec<Option<Attrs>>, Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		let inner = self.db.lock().await;
		let mut out = Vec::with_capacity(paths.len());
		for path in paths {
			let key = path.to_string();
			let version = inner.versions.get(&key).copied().unwrap_or(0);
			self.reads.insert(key.clone(), version);
			out.push(inner.docs.get(&key).cloned());
		}
		Ok(out)
	}

	/// Buffer a mutation for commit
	fn apply(&mut self, path: &DocPath, mutation: Mutation) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		if !self.write {
			return Err(Error::Tx {
				message: "cannot write in a read transaction".to_string(),
			});
		}
		self.writes.push((path.clone(), mutation));
		Ok(())
	}

	/// Validate the reads and apply the buffered mutations
	async fn commit(&mut self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		self.done = true;
		let mut inner = self.db.lock().await;
		#[cfg(feature = "test-hooks")]
		if inner.fail_commits > 0 {
			inner.fail_commits -= 1;
			return Err(Error::Tx {
				message: "transaction lock timeout, please retry".to_string(),
			});
		}
		// Optimistic validation of everything this transaction read
		for (key, version) in &self.reads {
			let current = inner.versions.get(key).copied().unwrap_or(0);
			if current != *version {
				return Err(Error::Tx {
					message: format!("transaction lock contention on '{key}'"),
				});
			}
		}
		// Apply the buffered mutations in their original order
		for (path, mutation) in self.writes.drain(..) {
			let key = path.to_string();
			match mutation {
				Mutation::Create {
					data,
				} => {
					if inner.docs.contains_key(&key) {
						return Err(Error::Tx {
							message: format!("document '{key}' already exists"),
						});
					}
					inner.docs.insert(key.clone(), data);
				}
				Mutation::Put {
					data,
				} => {
					inner.docs.insert(key.clone(), data);
				}
				Mutation::Update {
					ops,
				} => {
					let Some(doc) = inner.docs.get_mut(&key) else {
						return Err(Error::Tx {
							message: format!("no document to update: '{key}'"),
						});
					};
					for (name, op) in ops {
						match op {
							WriteOp::Set(val) => {
								doc.insert(name, val);
							}
							WriteOp::Delete => {
								doc.remove(&name);
							}
							WriteOp::Increment(delta) => {
								let next = increment(doc.get(&name), &delta)?;
								doc.insert(name, next);
							}
						}
					}
				}
				Mutation::Delete {
					must_exist,
				} => {
					if inner.docs.remove(&key).is_none() && must_exist {
						return Err(Error::Tx {
							message: format!("no document to delete: '{key}'"),
						});
					}
				}
			}
			*inner.versions.entry(key).or_insert(0) += 1;
		}
		Ok(())
	}

	/// Abandon the transaction
	async fn cancel(&mut self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		self.done = true;
		self.writes.clear();
		self.reads.clear();
		Ok(())
	}
}

/// Apply an increment sentinel to a stored attribute
fn increment(current: Option<&Value>, delta: &Value) -> Result<Value, Error> {
	match current {
		// An absent attribute increments from zero
		None => Ok(delta.clone()),
		Some(val) => {
			if let (Some(a), Some(b)) = (val.as_i64(), delta.as_i64()) {
				return Ok(Value::from(a.saturating_add(b)));
			}
			match (val.as_f64(), delta.as_f64()) {
				(Some(a), Some(b)) => serde_json::Number::from_f64(a + b)
					.map(Value::Number)
					.ok_or_else(|| Error::Tx {
						message: "increment produced a non-finite value".to_string(),
					}),
				_ => Err(Error::Tx {
					message: "increment applied to a non-numeric attribute".to_string(),
				}),
			}
		}
	}
}
