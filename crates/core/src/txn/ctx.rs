//! The transactional context and its tracked-document table

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::err::Error;
use crate::key::{Data, Key};
use crate::model::{Instance, Model, Origin, SnapshotOpts};
use crate::store::{Mutation, Store, Transaction as _};
use crate::txn::event::{Emitter, Event, Handler};
use crate::txn::options::Options;

/// A cheap handle to a model tracked by a context.
///
/// The context owns every model instance; operations hand out these
/// indices and [`Context::model`] resolves them back to the instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModelRef(usize);

/// The disposition of one tracked document
enum Slot {
	/// A live model instance
	Live(Instance),
	/// Fetched and found absent
	Absent,
	/// Deleted within this context
	Deleted,
}

/// The per-model snapshots produced by [`Context::model_diffs`]
#[derive(Debug, Default)]
pub struct ModelDiffs {
	/// Loaded values, one entry per live model
	pub before: Vec<Value>,
	/// Current values, parallel to `before`
	pub after: Vec<Value>,
	/// Per-attribute old/new pairs, parallel to `before`
	pub diff: Vec<Value>,
}

/// A scoped unit of work against the document store.
///
/// A context tracks every document it touches in a single table keyed
/// by document path. Each document occupies exactly one slot: a live
/// model, a fetched-absent marker, or a deleted marker. The table is
/// what turns the application's reads and writes into one coherent
/// commit, and what rejects ambiguous second touches of a document.
pub struct Context<S: Store> {
	store: Arc<S>,
	tx: Option<S::Tx>,
	options: Options,
	tracked: HashMap<String, usize>,
	slots: Vec<Slot>,
	emitter: Emitter,
}

impl<S: Store> Context<S> {
	pub(crate) fn new(store: Arc<S>, tx: Option<S::Tx>, options: Options) -> Self {
		Context {
			store,
			tx,
			options,
			tracked: HashMap::new(),
			slots: Vec::new(),
			emitter: Emitter::default(),
		}
	}

	/// The options this context is running with
	pub fn options(&self) -> &Options {
		&self.options
	}

	/// Reject writes from this point on
	pub fn make_read_only(&mut self) {
		self.options.read_only = true;
	}

	/// Let repeated reads return the tracked model from this point on
	pub fn enable_model_cache(&mut self) {
		self.options.cache_models = true;
	}

	/// Register a single-fire handler for a lifecycle event
	pub fn add_event_handler(&mut self, event: Event, handler: Handler, name: Option<&str>) {
		let name = match name {
			Some(name) => name.to_string(),
			None => format!("handler-{}", self.emitter.len()),
		};
		self.emitter.register(event, name, handler);
	}

	/// Resolve a model handle to its live instance
	pub fn model(&mut self, r: ModelRef) -> Result<&mut Instance, Error> {
		match self.slots.get_mut(r.0) {
			Some(Slot::Live(instance)) => Ok(instance),
			Some(Slot::Deleted) => Err(Error::model("the model was deleted in this context")),
			_ => Err(Error::model("the model handle does not resolve to a live model")),
		}
	}

	/// Fetch a document by key components or a bare scalar
	pub async fn get<M: Model>(&mut self, input: Value) -> Result<Option<ModelRef>, Error> {
		self.get_key(M::key(input)?).await
	}

	/// Fetch the document a key handle addresses.
	///
	/// Returns `None` when the store has no such document; the absence
	/// itself is tracked, so a later create of the same key within this
	/// context still collides.
	pub async fn get_key(&mut self, key: Key) -> Result<Option<ModelRef>, Error> {
		let path = key.path().to_string();
		if let Some(idx) = self.tracked.get(&path).copied() {
			return self.cached(idx, &path).map(|r| r.map(ModelRef));
		}
		let doc = self.read(&key).await?;
		match doc {
			Some(doc) => {
				let instance = Instance::fetched(key.schema(), key, doc)?;
				Ok(Some(ModelRef(self.track(path, Slot::Live(instance)))))
			}
			None => {
				self.track(path, Slot::Absent);
				Ok(None)
			}
		}
	}

	/// Fetch a document, seeding a new model from the data handle when
	/// the store has none
	pub async fn get_data(&mut self, data: Data) -> Result<ModelRef, Error> {
		let path = data.key().path().to_string();
		if let Some(idx) = self.tracked.get(&path).copied() {
			return match self.cached(idx, &path)? {
				Some(idx) => Ok(ModelRef(idx)),
				None => {
					// A previous fetch found nothing; materialize the seed
					let schema = data.key().schema();
					let instance = Instance::create_if_missing(schema, data)?;
					self.slots[idx] = Slot::Live(instance);
					Ok(ModelRef(idx))
				}
			};
		}
		let doc = self.read(data.key()).await?;
		let schema = data.key().schema();
		let instance = match doc {
			Some(doc) => {
				let (key, _) = data.into_parts();
				Instance::fetched(schema, key, doc)?
			}
			None => Instance::create_if_missing(schema, data)?,
		};
		Ok(ModelRef(self.track(path, Slot::Live(instance))))
	}

	/// Fetch several documents in one consistent batch.
	///
	/// The result is parallel to the input. Duplicate keys within one
	/// call follow the same tracking rules as two separate `get`s.
	pub async fn get_many(&mut self, keys: Vec<Key>) -> Result<Vec<Option<ModelRef>>, Error> {
		// Read everything untracked in a single batched fetch
		let mut pending = Vec::new();
		for key in &keys {
			let path = key.path().to_string();
			if !self.tracked.contains_key(&path) && !pending.iter().any(|(p, _)| *p == path) {
				pending.push((path, key.path()));
			}
		}
		let paths: Vec<_> = pending.iter().map(|(_, p)| p.clone()).collect();
		let docs = self.read_all(&paths).await?;
		let mut fetched: HashMap<String, Option<Map<String, Value>>> = HashMap::new();
		for ((path, _), doc) in pending.into_iter().zip(docs) {
			fetched.insert(path, doc);
		}
		// Materialize in input order, re-checking the tracked table so
		// duplicate keys in the input behave like repeated gets
		let mut out = Vec::with_capacity(keys.len());
		for key in keys {
			let path = key.path().to_string();
			if let Some(idx) = self.tracked.get(&path).copied() {
				out.push(self.cached(idx, &path)?.map(ModelRef));
				continue;
			}
			match fetched.get(&path).cloned().flatten() {
				Some(doc) => {
					let instance = Instance::fetched(key.schema(), key, doc)?;
					out.push(Some(ModelRef(self.track(path, Slot::Live(instance)))));
				}
				None => {
					self.track(path, Slot::Absent);
					out.push(None);
				}
			}
		}
		Ok(out)
	}

	/// Fetch several documents, seeding new models for the missing ones
	pub async fn get_many_data(&mut self, datas: Vec<Data>) -> Result<Vec<ModelRef>, Error> {
		let mut out = Vec::with_capacity(datas.len());
		let paths: Vec<_> = datas.iter().map(|d| d.key().path()).collect();
		let path_keys: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
		// Batch-read only what is not already tracked
		let mut wanted: Vec<usize> = Vec::new();
		for (i, path) in path_keys.iter().enumerate() {
			if !self.tracked.contains_key(path) && !wanted.iter().any(|j| path_keys[*j] == *path) {
				wanted.push(i);
			}
		}
		let batch: Vec<_> = wanted.iter().map(|&i| paths[i].clone()).collect();
		let docs = self.read_all(&batch).await?;
		let mut fetched: HashMap<String, Option<Map<String, Value>>> = HashMap::new();
		for (&i, doc) in wanted.iter().zip(docs) {
			fetched.insert(path_keys[i].clone(), doc);
		}
		for (data, path) in datas.into_iter().zip(path_keys) {
			if let Some(idx) = self.tracked.get(&path).copied() {
				match self.cached(idx, &path)? {
					Some(idx) => out.push(ModelRef(idx)),
					None => {
						let schema = data.key().schema();
						let instance = Instance::create_if_missing(schema, data)?;
						self.slots[idx] = Slot::Live(instance);
						out.push(ModelRef(idx));
					}
				}
				continue;
			}
			let schema = data.key().schema();
			let instance = match fetched.get(&path).cloned().flatten() {
				Some(doc) => {
					let (key, _) = data.into_parts();
					Instance::fetched(schema, key, doc)?
				}
				None => Instance::create_if_missing(schema, data)?,
			};
			out.push(ModelRef(self.track(path, Slot::Live(instance))));
		}
		Ok(out)
	}

	/// Track a new document to be created at commit.
	///
	/// The write fails if the document exists by then.
	pub fn create<M: Model>(&mut self, values: Value) -> Result<ModelRef, Error> {
		self.create_instance::<M>(values, false)
	}

	/// Track a new document that replaces any existing document
	pub fn create_or_overwrite<M: Model>(&mut self, values: Value) -> Result<ModelRef, Error> {
		self.create_instance::<M>(values, true)
	}

	fn create_instance<M: Model>(
		&mut self,
		values: Value,
		overwrite: bool,
	) -> Result<ModelRef, Error> {
		if self.options.read_only {
			return Err(Error::ReadOnlyWrite);
		}
		let schema = M::schema()?;
		let Value::Object(values) = values else {
			return Err(Error::param(format!(
				"values for {} must be an object of attribute values",
				schema.collection()
			)));
		};
		let instance = Instance::create(schema, values, overwrite)?;
		let path = instance.path().to_string();
		if let Some(idx) = self.tracked.get(&path).copied() {
			if self.options.cache_models {
				if let Slot::Live(_) = self.slots[idx] {
					return Ok(ModelRef(idx));
				}
			}
			return Err(Error::ModelTrackedTwice {
				path,
			});
		}
		Ok(ModelRef(self.track(path, Slot::Live(instance))))
	}

	/// Update a document without reading it first.
	///
	/// The values address the document through its key components and
	/// must change at least one data attribute. The sparse update is
	/// dispatched immediately and fails at commit if the document does
	/// not exist.
	pub async fn update_without_read<M: Model>(&mut self, values: Value) -> Result<(), Error> {
		if self.options.read_only {
			return Err(Error::ReadOnlyWrite);
		}
		let schema = M::schema()?;
		let Value::Object(values) = values else {
			return Err(Error::param(format!(
				"values for {} must be an object of attribute values",
				schema.collection()
			)));
		};
		let mut instance = Instance::blind_update(schema, values)?;
		let path = instance.path().to_string();
		if self.tracked.contains_key(&path) {
			return Err(Error::ModelTrackedTwice {
				path,
			});
		}
		schema.run_finalize(&mut instance)?;
		let mutation = instance.mutation()?.ok_or_else(|| {
			Error::model("update did not provide any data to change")
		})?;
		let doc_path = instance.path();
		self.write(&doc_path, mutation)?;
		self.track(path, Slot::Live(instance));
		Ok(())
	}

	/// Delete the document a key handle addresses
	pub async fn delete(&mut self, key: Key) -> Result<(), Error> {
		if self.options.read_only {
			return Err(Error::ReadOnlyWrite);
		}
		let doc_path = key.path();
		let path = doc_path.to_string();
		match self.tracked.get(&path).copied() {
			Some(idx) => match &self.slots[idx] {
				Slot::Deleted => Err(Error::DeletedTwice {
					path,
				}),
				Slot::Live(instance) => {
					// Condition the delete on existence for documents we read
					let must_exist = !instance.is_new();
					self.slots[idx] = Slot::Deleted;
					self.write(&doc_path, Mutation::Delete {
						must_exist,
					})
				}
				Slot::Absent => {
					self.slots[idx] = Slot::Deleted;
					self.write(&doc_path, Mutation::Delete {
						must_exist: false,
					})
				}
			},
			None => {
				self.track(path, Slot::Deleted);
				self.write(&doc_path, Mutation::Delete {
					must_exist: false,
				})
			}
		}
	}

	/// Delete the document behind a tracked model
	pub async fn delete_model(&mut self, r: ModelRef) -> Result<(), Error> {
		if self.options.read_only {
			return Err(Error::ReadOnlyWrite);
		}
		let (doc_path, must_exist) = match self.slots.get(r.0) {
			Some(Slot::Live(instance)) => (instance.path(), !instance.is_new()),
			Some(Slot::Deleted) => {
				return Err(Error::DeletedTwice {
					path: self.path_of(r.0),
				})
			}
			_ => return Err(Error::model("the model handle does not resolve to a live model")),
		};
		self.slots[r.0] = Slot::Deleted;
		self.write(&doc_path, Mutation::Delete {
			must_exist,
		})
	}

	/// Delete several documents
	pub async fn delete_many(&mut self, keys: impl IntoIterator<Item = Key>) -> Result<(), Error> {
		for key in keys {
			self.delete(key).await?;
		}
		Ok(())
	}

	/// Capture before/after/diff snapshots of the tracked models.
	///
	/// Deleted and fetched-absent slots are omitted. The filter selects
	/// models by inspecting the instance, typically by collection.
	pub fn model_diffs(&self, filter: impl Fn(&Instance) -> bool) -> ModelDiffs {
		let mut diffs = ModelDiffs::default();
		for slot in &self.slots {
			if let Slot::Live(instance) = slot {
				if !filter(instance) {
					continue;
				}
				let before = instance.snapshot(SnapshotOpts {
					initial: true,
					include_id: true,
					omit_key: false,
				});
				let after = instance.snapshot(SnapshotOpts {
					initial: false,
					include_id: true,
					omit_key: false,
				});
				let mut entry = Map::new();
				entry.insert(
					"collection".to_string(),
					Value::String(instance.collection().to_string()),
				);
				entry.insert("id".to_string(), Value::String(instance.id().to_string()));
				entry.insert("changes".to_string(), Value::Object(instance.diff()));
				diffs.before.push(Value::Object(before));
				diffs.after.push(Value::Object(after));
				diffs.diff.push(Value::Object(entry));
			}
		}
		diffs
	}

	/// Walk the tracked slots and dispatch their pending writes.
	///
	/// Slots are visited in insertion order. Deletes and blind updates
	/// were buffered when they were requested; everything else is
	/// serialized here, after its finalize hook runs.
	pub(crate) async fn flush(&mut self) -> Result<(), Error> {
		let expect_writes = !self.options.read_only;
		for idx in 0..self.slots.len() {
			let Slot::Live(instance) = &mut self.slots[idx] else {
				continue;
			};
			if instance.origin() == Origin::BlindUpdate {
				continue;
			}
			if !instance.is_new() && !instance.changes_to_commit(expect_writes) {
				continue;
			}
			if !expect_writes {
				return Err(Error::ReadOnlyWrite);
			}
			let schema = instance.schema();
			schema.run_finalize(instance)?;
			if let Some(mutation) = instance.mutation()? {
				let doc_path = instance.path();
				trace!("Dispatching {mutation:?} for {doc_path}");
				let tx = self.tx.as_mut().ok_or_else(|| Error::Internal {
					message: "a write was dispatched without a transaction".to_string(),
				})?;
				tx.apply(&doc_path, mutation)?;
			}
		}
		Ok(())
	}

	/// Commit the store transaction, if one is open
	pub(crate) async fn commit_tx(&mut self) -> Result<(), Error> {
		match &mut self.tx {
			Some(tx) => tx.commit().await,
			None => Ok(()),
		}
	}

	/// Abandon the store transaction, if one is still open
	pub(crate) async fn cancel_tx(&mut self) {
		if let Some(tx) = &mut self.tx {
			if !tx.closed() {
				let _ = tx.cancel().await;
			}
		}
	}

	pub(crate) fn into_emitter(self) -> Emitter {
		self.emitter
	}

	/// Resolve a tracked slot under the cache policy
	fn cached(&self, idx: usize, path: &str) -> Result<Option<usize>, Error> {
		if !self.options.cache_models {
			return Err(Error::ModelTrackedTwice {
				path: path.to_string(),
			});
		}
		match &self.slots[idx] {
			Slot::Live(_) => Ok(Some(idx)),
			Slot::Absent => Ok(None),
			Slot::Deleted => Err(Error::model("the document was deleted in this context")),
		}
	}

	fn path_of(&self, idx: usize) -> String {
		self.tracked
			.iter()
			.find(|(_, i)| **i == idx)
			.map(|(p, _)| p.clone())
			.unwrap_or_default()
	}

	fn track(&mut self, path: String, slot: Slot) -> usize {
		let idx = self.slots.len();
		self.slots.push(slot);
		self.tracked.insert(path, idx);
		idx
	}

	async fn read(
		&mut self,
		key: &Key,
	) -> Result<Option<Map<String, Value>>, Error> {
		let path = key.path();
		match &mut self.tx {
			Some(tx) => tx.get(&path).await,
			None => self.store.get(&path).await,
		}
	}

	async fn read_all(
		&mut self,
		paths: &[crate::key::DocPath],
	) -> Result<Vec<Option<Map<String, Value>>>, Error> {
		if paths.is_empty() {
			return Ok(Vec::new());
		}
		match &mut self.tx {
			Some(tx) => tx.get_all(paths).await,
			None => self.store.get_all(paths).await,
		}
	}

	fn write(&mut self, path: &crate::key::DocPath, mutation: Mutation) -> Result<(), Error> {
		let tx = self.tx.as_mut().ok_or_else(|| Error::Internal {
			message: "a write was dispatched without a transaction".to_string(),
		})?;
		tx.apply(path, mutation)
	}
}
