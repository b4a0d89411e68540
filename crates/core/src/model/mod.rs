//! Model declaration, schema compilation, and the document façade

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::err::Error;
use crate::key::{self, Data, DocPath, Id, Key};
use crate::schema::{Descriptor, FieldOptions};
use crate::field::Field;
use crate::store::Mutation;

/// Collection name suffixes that read as declaration artifacts
const RESERVED_SUFFIXES: [&str; 3] = ["Model", "Table", "Collection"];

/// Attribute names the façade keeps for itself
const RESERVED_NAMES: [&str; 2] = ["is_new", "isNew"];

/// The finalize hook invoked just before a model instance is written
pub type FinalizeFn = fn(&mut Instance) -> Result<(), Error>;

/// The declarative description of a model: its collection name, its key
/// components, and its data attributes.
///
/// A definition is inert; it is compiled into a [`Schema`] on first use
/// and the compiled form is memoized for the life of the process.
#[derive(Debug)]
pub struct Definition {
	collection: String,
	key: Vec<(String, Descriptor)>,
	fields: Vec<(String, Descriptor)>,
}

impl Definition {
	/// Start a definition for the named collection
	pub fn new(collection: impl Into<String>) -> Self {
		Definition {
			collection: collection.into(),
			key: Vec::new(),
			fields: Vec::new(),
		}
	}

	/// Declare a key component
	pub fn key(mut self, name: impl Into<String>, descriptor: Descriptor) -> Self {
		self.key.push((name.into(), descriptor));
		self
	}

	/// Declare a data attribute
	pub fn field(mut self, name: impl Into<String>, descriptor: Descriptor) -> Self {
		self.fields.push((name.into(), descriptor));
		self
	}

	fn check_collection(collection: &str) -> Result<(), Error> {
		let mut chars = collection.chars();
		match chars.next() {
			Some(c) if c.is_ascii_uppercase() => (),
			_ => {
				return Err(Error::field(format!(
					"collection name '{collection}' must start with an uppercase letter"
				)))
			}
		}
		if !collection.chars().all(|c| c.is_ascii_alphanumeric()) {
			return Err(Error::field(format!(
				"collection name '{collection}' must contain only letters and digits"
			)));
		}
		for suffix in RESERVED_SUFFIXES {
			if collection.ends_with(suffix) {
				return Err(Error::field(format!(
					"collection name '{collection}' must not end with '{suffix}'"
				)));
			}
		}
		Ok(())
	}

	fn check_attr_name(name: &str, seen: &HashMap<String, usize>) -> Result<(), Error> {
		if name.is_empty() {
			return Err(Error::field("attribute names must not be empty"));
		}
		if name.starts_with('_') {
			return Err(Error::field(format!("attribute name '{name}' must not start with '_'")));
		}
		if RESERVED_NAMES.contains(&name) {
			return Err(Error::field(format!("attribute name '{name}' is reserved")));
		}
		if seen.contains_key(name) {
			return Err(Error::field(format!("attribute name '{name}' is declared twice")));
		}
		Ok(())
	}

	/// Compile the definition into its memoizable form
	pub fn compile(self, finalize: FinalizeFn) -> Result<Schema, Error> {
		Self::check_collection(&self.collection)?;
		if self.key.is_empty() {
			return Err(Error::field(format!(
				"model '{}' must declare at least one key component",
				self.collection
			)));
		}
		let mut attrs = Vec::with_capacity(self.key.len() + self.fields.len());
		let mut index = HashMap::new();
		for (name, descriptor) in self.key {
			Self::check_attr_name(&name, &index)?;
			let opts = FieldOptions::compile(&name, descriptor, true)?;
			index.insert(name.clone(), attrs.len());
			attrs.push((name, opts));
		}
		let mut key_order: Vec<String> = index.keys().cloned().collect();
		key_order.sort();
		for (name, descriptor) in self.fields {
			Self::check_attr_name(&name, &index)?;
			let opts = FieldOptions::compile(&name, descriptor, false)?;
			index.insert(name.clone(), attrs.len());
			attrs.push((name, opts));
		}
		Ok(Schema {
			collection: self.collection,
			key_order,
			attrs,
			index,
			finalize,
		})
	}
}

/// The compiled, process-wide form of a model declaration
pub struct Schema {
	collection: String,
	key_order: Vec<String>,
	attrs: Vec<(String, FieldOptions)>,
	index: HashMap<String, usize>,
	finalize: FinalizeFn,
}

impl std::fmt::Debug for Schema {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Schema")
			.field("collection", &self.collection)
			.field("key_order", &self.key_order)
			.finish_non_exhaustive()
	}
}

impl Schema {
	/// The collection this schema stores documents in
	pub fn collection(&self) -> &str {
		&self.collection
	}

	/// Key component names in their canonical (sorted) order
	pub fn key_order(&self) -> &[String] {
		&self.key_order
	}

	/// Look up the compiled options of a declared attribute
	pub fn attr(&self, name: &str) -> Option<&FieldOptions> {
		self.index.get(name).map(|i| &self.attrs[*i].1)
	}

	/// All declared attributes in declaration order
	pub fn attrs(&self) -> impl Iterator<Item = (&str, &FieldOptions)> {
		self.attrs.iter().map(|(n, o)| (n.as_str(), o))
	}

	fn attr_index(&self, name: &str) -> Result<usize, Error> {
		self.index.get(name).copied().ok_or_else(|| {
			Error::field(format!("'{name}' is not a declared attribute of {}", self.collection))
		})
	}

	/// Build a key handle from a component map or a bare scalar.
	///
	/// A model with a single key component accepts the component value
	/// directly in place of the one-entry map. Declared non-key
	/// attributes in the input are rejected.
	pub fn key_from(&'static self, input: Value) -> Result<Key, Error> {
		let components = self.key_components(input)?;
		let id = key::encode(self, &components)?;
		Ok(Key::new(self, id, components))
	}

	/// Build a data handle: a key plus initial values for data attributes
	pub fn data_from(&'static self, input: Value) -> Result<Data, Error> {
		let Value::Object(entries) = input else {
			return Err(Error::param(format!(
				"data for {} must be an object of attribute values",
				self.collection
			)));
		};
		let mut components = Map::new();
		let mut values = Map::new();
		for (name, val) in entries {
			let opts = self
				.attr(&name)
				.ok_or_else(|| {
					Error::field(format!(
						"'{name}' is not a declared attribute of {}",
						self.collection
					))
				})?;
			if opts.is_key() {
				components.insert(name, val);
			} else {
				values.insert(name, val);
			}
		}
		let id = key::encode(self, &components)?;
		Ok(Data::new(Key::new(self, id, components), values))
	}

	/// Rebuild a key handle from an already-encoded identifier
	pub fn key_from_id(&'static self, id: Id) -> Result<Key, Error> {
		let components = key::decode(self, &id)?;
		Ok(Key::new(self, id, components))
	}

	fn key_components(&self, input: Value) -> Result<Map<String, Value>, Error> {
		match input {
			Value::Object(entries) => {
				let mut components = Map::new();
				for (name, val) in entries {
					let opts = self.attr(&name).ok_or_else(|| {
						Error::field(format!(
							"'{name}' is not a declared attribute of {}",
							self.collection
						))
					})?;
					if !opts.is_key() {
						return Err(Error::param(format!(
							"'{name}' is not a key component of {}",
							self.collection
						)));
					}
					components.insert(name, val);
				}
				Ok(components)
			}
			// Single-component shorthand: a bare scalar addresses the one component
			scalar => match self.key_order.as_slice() {
				[name] => {
					let mut components = Map::new();
					components.insert(name.clone(), scalar);
					Ok(components)
				}
				_ => Err(Error::param(format!(
					"{} has a compound key and must be addressed with a component map",
					self.collection
				))),
			},
		}
	}

	pub(crate) fn run_finalize(&self, instance: &mut Instance) -> Result<(), Error> {
		(self.finalize)(instance)
	}
}

static SCHEMAS: Lazy<RwLock<HashMap<TypeId, &'static Schema>>> =
	Lazy::new(|| RwLock::new(HashMap::new()));

fn schema_of<M: Model>() -> Result<&'static Schema, Error> {
	let type_id = TypeId::of::<M>();
	if let Some(schema) = SCHEMAS.read().expect("schema registry poisoned").get(&type_id).copied()
	{
		return Ok(schema);
	}
	// Compilation is deterministic, so a concurrent first access may
	// compile twice; the first insertion wins and the duplicate is dropped.
	let compiled: &'static Schema = Box::leak(Box::new(M::define().compile(M::finalize)?));
	let mut registry = SCHEMAS.write().expect("schema registry poisoned");
	Ok(*registry.entry(type_id).or_insert(compiled))
}

/// A declared model class.
///
/// Implementations provide the declarative [`Definition`]; the provided
/// methods expose the memoized compiled schema and the addressing
/// handles.
///
/// ```
/// use firemap_core::model::{Definition, Model};
/// use firemap_core::schema::Descriptor;
///
/// struct Order;
///
/// impl Model for Order {
///     fn define() -> Definition {
///         Definition::new("Order")
///             .key("id", Descriptor::string())
///             .field("product", Descriptor::string())
///             .field("quantity", Descriptor::integer().min(0))
///     }
/// }
/// ```
pub trait Model: 'static {
	/// Declare the collection name, key components and data attributes
	fn define() -> Definition;

	/// Populate derived attributes just before each write
	fn finalize(_instance: &mut Instance) -> Result<(), Error> {
		Ok(())
	}

	/// The compiled schema, memoized on first use
	fn schema() -> Result<&'static Schema, Error>
	where
		Self: Sized,
	{
		schema_of::<Self>()
	}

	/// Build a key handle for this model
	fn key(input: Value) -> Result<Key, Error>
	where
		Self: Sized,
	{
		Self::schema()?.key_from(input)
	}

	/// Build a data handle for this model
	fn data(input: Value) -> Result<Data, Error>
	where
		Self: Sized,
	{
		Self::schema()?.data_from(input)
	}
}

/// Where a model instance came from, which decides its write shape
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Origin {
	/// Built locally; the write must not find an existing document
	Create,
	/// Built locally; the write replaces any existing document
	CreateOrOverwrite,
	/// Loaded from the store
	Fetched,
	/// Requested with create-if-missing and not found
	CreateIfMissing,
	/// Built for a blind, partial update
	BlindUpdate,
}

/// Options for [`Instance::snapshot`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotOpts {
	/// Capture the loaded values instead of the current ones
	pub initial: bool,
	/// Include the encoded identifier under the `_id` name
	pub include_id: bool,
	/// Leave the key components out
	pub omit_key: bool,
}

/// A live document within one transactional context.
///
/// The instance owns one [`Field`] per declared attribute and exposes
/// them by name. Reads and writes flow through the field runtime, so
/// mutation tracking and schema validation happen at the moment of
/// access. Instances never outlive their context.
#[derive(Debug)]
pub struct Instance {
	schema: &'static Schema,
	fields: Vec<Field>,
	key: Key,
	origin: Origin,
	is_new: bool,
}

impl Instance {
	/// Build an instance for a locally created document
	pub(crate) fn create(
		schema: &'static Schema,
		values: Map<String, Value>,
		overwrite: bool,
	) -> Result<Self, Error> {
		let origin = if overwrite {
			Origin::CreateOrOverwrite
		} else {
			Origin::Create
		};
		let data = schema.data_from(Value::Object(values))?;
		Self::from_data(schema, data, origin)
	}

	/// Build an instance from a data handle whose document was missing
	pub(crate) fn create_if_missing(
		schema: &'static Schema,
		data: Data,
	) -> Result<Self, Error> {
		Self::from_data(schema, data, Origin::CreateIfMissing)
	}

	fn from_data(schema: &'static Schema, data: Data, origin: Origin) -> Result<Self, Error> {
		let (key, values) = data.into_parts();
		let mut fields = Vec::with_capacity(schema.attrs.len());
		for (name, opts) in schema.attrs() {
			if opts.is_key() {
				let component = key.components().get(name).cloned();
				fields.push(Field::new(opts.clone(), component));
				continue;
			}
			let provided = match values.get(name) {
				Some(Value::Null) | None => None,
				Some(v) => Some(v.clone()),
			};
			let mut field = Field::fresh(opts.clone(), provided);
			if field.peek().is_none() {
				if let Some(default) = opts.descriptor.default_value() {
					field.apply_default(default.clone());
				}
			}
			// New documents validate in full at construction time
			field.validate()?;
			fields.push(field);
		}
		Ok(Instance {
			schema,
			fields,
			key,
			origin,
			is_new: true,
		})
	}

	/// Build an instance from a fetched document
	pub(crate) fn fetched(
		schema: &'static Schema,
		key: Key,
		doc: Map<String, Value>,
	) -> Result<Self, Error> {
		let mut fields = Vec::with_capacity(schema.attrs.len());
		for (name, opts) in schema.attrs() {
			if opts.is_key() {
				let component = key.components().get(name).cloned();
				fields.push(Field::new(opts.clone(), component));
				continue;
			}
			let mut field = Field::new(opts.clone(), doc.get(name).cloned());
			if field.peek().is_none() && !opts.descriptor.is_optional() {
				if let Some(default) = opts.descriptor.default_value() {
					field.apply_default(default.clone());
				}
			}
			fields.push(field);
		}
		Ok(Instance {
			schema,
			fields,
			key,
			origin: Origin::Fetched,
			is_new: false,
		})
	}

	/// Build a partial instance for a blind update
	pub(crate) fn blind_update(
		schema: &'static Schema,
		values: Map<String, Value>,
	) -> Result<Self, Error> {
		let data = schema.data_from(Value::Object(values))?;
		let (key, values) = data.into_parts();
		if values.is_empty() {
			return Err(Error::param(
				"an update without a read must change at least one non-key attribute",
			));
		}
		let mut fields = Vec::with_capacity(schema.attrs.len());
		for (name, opts) in schema.attrs() {
			if opts.is_key() {
				let component = key.components().get(name).cloned();
				fields.push(Field::new(opts.clone(), component));
				continue;
			}
			let mut field = Field::fresh(opts.clone(), None);
			match values.get(name) {
				// A null marks the attribute for deletion
				Some(Value::Null) => field.set(None)?,
				Some(v) => field.set(Some(v.clone()))?,
				None => (),
			}
			fields.push(field);
		}
		Ok(Instance {
			schema,
			fields,
			key,
			origin: Origin::BlindUpdate,
			is_new: false,
		})
	}

	/// The schema of this instance
	pub fn schema(&self) -> &'static Schema {
		self.schema
	}

	/// The collection this document belongs to
	pub fn collection(&self) -> &str {
		self.schema.collection()
	}

	/// Whether the document does not yet exist in the store
	pub fn is_new(&self) -> bool {
		self.is_new
	}

	/// The key handle of this document
	pub fn key(&self) -> &Key {
		&self.key
	}

	/// The encoded identifier of this document
	pub fn id(&self) -> &Id {
		self.key.id()
	}

	/// The full document path
	pub fn path(&self) -> DocPath {
		self.key.path()
	}

	pub(crate) fn origin(&self) -> Origin {
		self.origin
	}

	/// Read an attribute, recording the access
	pub fn get(&mut self, name: &str) -> Result<Option<Value>, Error> {
		let idx = self.schema.attr_index(name)?;
		Ok(self.fields[idx].get())
	}

	/// Read an attribute without recording the access
	pub fn peek(&self, name: &str) -> Result<Option<&Value>, Error> {
		let idx = self.schema.attr_index(name)?;
		Ok(self.fields[idx].peek())
	}

	/// Assign an attribute; a JSON null clears it
	pub fn set(&mut self, name: &str, val: Value) -> Result<(), Error> {
		let idx = self.schema.attr_index(name)?;
		match val {
			Value::Null => self.fields[idx].set(None),
			val => self.fields[idx].set(Some(val)),
		}
	}

	/// Clear an optional attribute
	pub fn clear(&mut self, name: &str) -> Result<(), Error> {
		let idx = self.schema.attr_index(name)?;
		self.fields[idx].set(None)
	}

	/// Add a numeric delta to an attribute, preferring the store's
	/// atomic increment sentinel when the field is otherwise untouched
	pub fn increment_by(&mut self, name: &str, delta: Value) -> Result<(), Error> {
		let idx = self.schema.attr_index(name)?;
		self.fields[idx].increment_by(&delta)
	}

	/// Whether any attribute differs from its loaded value
	pub fn mutated(&self) -> bool {
		self.fields.iter().any(|f| f.mutated())
	}

	pub(crate) fn changes_to_commit(&self, expect_writes: bool) -> bool {
		self.fields.iter().any(|f| f.changes_to_commit(expect_writes))
	}

	/// Capture the attribute values as a plain map.
	///
	/// Snapshots read through [`Field::peek`] and never mark an
	/// attribute as accessed.
	pub fn snapshot(&self, opts: SnapshotOpts) -> Map<String, Value> {
		let mut out = Map::new();
		if opts.include_id {
			out.insert("_id".to_owned(), Value::String(self.id().to_string()));
		}
		for ((name, field_opts), field) in self.schema.attrs().zip(&self.fields) {
			if opts.omit_key && field_opts.is_key() {
				continue;
			}
			let val = if opts.initial {
				field.initial()
			} else {
				field.peek()
			};
			if let Some(val) = val {
				out.insert(name.to_owned(), val.clone());
			}
		}
		out
	}

	/// The per-attribute old/new pairs for every pending change
	pub fn diff(&self) -> Map<String, Value> {
		let mut out = Map::new();
		for ((name, _), field) in self.schema.attrs().zip(&self.fields) {
			if field.mutated() {
				let mut pair = Map::new();
				pair.insert(
					"before".to_owned(),
					field.initial().cloned().unwrap_or(Value::Null),
				);
				pair.insert(
					"after".to_owned(),
					field.peek().cloned().unwrap_or(Value::Null),
				);
				out.insert(name.to_owned(), Value::Object(pair));
			}
		}
		out
	}

	/// Re-validate every attribute against its descriptor
	pub fn validate(&self) -> Result<(), Error> {
		for ((name, _), field) in self.schema.attrs().zip(&self.fields) {
			field.validate().map_err(|e| {
				Error::field(format!("{}.{name}: {e}", self.schema.collection()))
			})?;
		}
		Ok(())
	}

	/// Serialize the data attributes for a full document write
	fn serialize_full(&self) -> Map<String, Value> {
		let mut out = Map::new();
		for ((name, field_opts), field) in self.schema.attrs().zip(&self.fields) {
			if field_opts.is_key() {
				continue;
			}
			if let Some(val) = field.peek() {
				out.insert(name.to_owned(), val.clone());
			}
		}
		out
	}

	/// Compute the store mutation this instance needs at commit time.
	///
	/// Returns `None` when nothing changed. Blind updates compute their
	/// mutation when they are dispatched, not at commit.
	pub(crate) fn mutation(&self) -> Result<Option<Mutation>, Error> {
		match self.origin {
			Origin::CreateOrOverwrite => {
				self.validate()?;
				Ok(Some(Mutation::Put {
					data: self.serialize_full(),
				}))
			}
			Origin::Create | Origin::CreateIfMissing => {
				self.validate()?;
				Ok(Some(Mutation::Create {
					data: self.serialize_full(),
				}))
			}
			Origin::Fetched | Origin::BlindUpdate => {
				let explicit = self.origin == Origin::BlindUpdate;
				let mut ops = BTreeMap::new();
				for ((name, field_opts), field) in self.schema.attrs().zip(&self.fields) {
					if field_opts.is_key() {
						continue;
					}
					// Blind updates include exactly the assigned attributes
					let include = if explicit {
						field.written()
					} else {
						field.changes_to_commit(true)
					};
					if !include {
						continue;
					}
					field.validate()?;
					if let Some(op) = field.write_value(explicit) {
						ops.insert(name.to_owned(), op);
					}
				}
				if ops.is_empty() {
					return Err(Error::model("update did not provide any data to change"));
				}
				Ok(Some(Mutation::Update {
					ops,
				}))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::store::WriteOp;

	struct Order;

	impl Model for Order {
		fn define() -> Definition {
			Definition::new("Order")
				.key("id", Descriptor::string())
				.field("product", Descriptor::string())
				.field("quantity", Descriptor::integer().min(0))
				.field("note", Descriptor::string().optional())
		}
	}

	struct Account;

	impl Model for Account {
		fn define() -> Definition {
			Definition::new("Account")
				.key("id", Descriptor::string())
				.field("balance", Descriptor::integer())
				.field("bonus", Descriptor::integer().default(json!(5)).immutable())
		}
	}

	fn values(v: Value) -> Map<String, Value> {
		v.as_object().unwrap().clone()
	}

	#[test]
	fn schema_is_memoized() {
		let a = Order::schema().unwrap() as *const Schema;
		let b = Order::schema().unwrap() as *const Schema;
		assert_eq!(a, b);
	}

	fn skip_finalize(_: &mut Instance) -> Result<(), Error> {
		Ok(())
	}

	#[test]
	fn compile_rejects_bad_collection_names() {
		for name in ["order", "Order Items", "OrderModel", "OrdersTable", "DocCollection"] {
			let def = Definition::new(name).key("id", Descriptor::string());
			assert!(def.compile(skip_finalize).is_err(), "accepted {name}");
		}
	}

	#[test]
	fn compile_rejects_reserved_and_underscored_names() {
		let def = Definition::new("A").key("id", Descriptor::string()).field(
			"_private",
			Descriptor::string(),
		);
		assert!(def.compile(skip_finalize).is_err());
		let def =
			Definition::new("A").key("id", Descriptor::string()).field("is_new", Descriptor::string());
		assert!(def.compile(skip_finalize).is_err());
	}

	#[test]
	fn compile_rejects_duplicate_attrs() {
		let def = Definition::new("A")
			.key("id", Descriptor::string())
			.field("id", Descriptor::string());
		assert!(def.compile(skip_finalize).is_err());
	}

	#[test]
	fn compile_requires_a_key() {
		let def = Definition::new("A").field("x", Descriptor::string());
		assert!(def.compile(skip_finalize).is_err());
	}

	#[test]
	fn create_applies_defaults_and_validates() {
		let schema = Account::schema().unwrap();
		let mut inst = Instance::create(
			schema,
			values(json!({"id": "B", "balance": 0})),
			false,
		)
		.unwrap();
		assert!(inst.is_new());
		assert_eq!(inst.get("bonus").unwrap(), Some(json!(5)));
		assert_eq!(
			inst.snapshot(SnapshotOpts {
				omit_key: true,
				..Default::default()
			}),
			values(json!({"balance": 0, "bonus": 5}))
		);
	}

	#[test]
	fn create_rejects_missing_required() {
		let schema = Order::schema().unwrap();
		let err =
			Instance::create(schema, values(json!({"id": "A", "product": "tea"})), false)
				.unwrap_err();
		assert!(err.to_string().contains("required"));
	}

	#[test]
	fn create_rejects_unknown_attribute() {
		let schema = Order::schema().unwrap();
		let err = Instance::create(
			schema,
			values(json!({"id": "A", "product": "tea", "quantity": 1, "extra": true})),
			false,
		)
		.unwrap_err();
		assert!(err.to_string().contains("not a declared attribute"));
	}

	#[test]
	fn fetched_fills_required_defaults_only() {
		let schema = Account::schema().unwrap();
		let key = Account::key(json!("B")).unwrap();
		let mut inst = Instance::fetched(schema, key, values(json!({"balance": 3}))).unwrap();
		assert!(!inst.is_new());
		assert_eq!(inst.get("bonus").unwrap(), Some(json!(5)));
		// The filled default is pending for a writeable commit only
		assert!(inst.changes_to_commit(true));
		assert!(!inst.changes_to_commit(false));
	}

	#[test]
	fn fetched_immutable_rejects_reassignment() {
		let schema = Account::schema().unwrap();
		let key = Account::key(json!("B")).unwrap();
		let mut inst =
			Instance::fetched(schema, key, values(json!({"balance": 3, "bonus": 9}))).unwrap();
		let err = inst.set("bonus", json!(9)).unwrap_err();
		assert!(err.to_string().contains("immutable"));
	}

	#[test]
	fn create_mutation_excludes_key_attributes() {
		let schema = Order::schema().unwrap();
		let inst = Instance::create(
			schema,
			values(json!({"id": "A1", "product": "coffee", "quantity": 1})),
			false,
		)
		.unwrap();
		match inst.mutation().unwrap() {
			Some(Mutation::Create {
				data,
			}) => {
				assert_eq!(data, values(json!({"product": "coffee", "quantity": 1})));
			}
			other => panic!("expected a create, found {other:?}"),
		}
	}

	#[test]
	fn fetched_mutation_contains_only_changes() {
		let schema = Order::schema().unwrap();
		let key = Order::key(json!("A1")).unwrap();
		let mut inst = Instance::fetched(
			schema,
			key,
			values(json!({"product": "coffee", "quantity": 1, "note": "hot"})),
		)
		.unwrap();
		inst.set("quantity", json!(2)).unwrap();
		inst.clear("note").unwrap();
		match inst.mutation().unwrap() {
			Some(Mutation::Update {
				ops,
			}) => {
				assert_eq!(ops.len(), 2);
				assert!(ops.contains_key("quantity"));
				assert!(ops.contains_key("note"));
			}
			other => panic!("expected an update, found {other:?}"),
		}
	}

	#[test]
	fn blind_update_requires_non_key_changes() {
		let schema = Order::schema().unwrap();
		let err = Instance::blind_update(schema, values(json!({"id": "A1"}))).unwrap_err();
		assert!(err.to_string().contains("at least one"));
	}

	#[test]
	fn snapshot_does_not_mark_reads() {
		let schema = Order::schema().unwrap();
		let key = Order::key(json!("A1")).unwrap();
		let mut inst = Instance::fetched(
			schema,
			key,
			values(json!({"product": "coffee", "quantity": 1})),
		)
		.unwrap();
		let _ = inst.snapshot(SnapshotOpts::default());
		inst.increment_by("quantity", json!(1)).unwrap();
		match inst.mutation().unwrap() {
			Some(Mutation::Update {
				ops,
			}) => {
				assert!(matches!(&ops["quantity"], WriteOp::Increment(d) if *d == json!(1)));
			}
			other => panic!("expected an update, found {other:?}"),
		}
	}

	#[test]
	fn diff_reports_old_and_new() {
		let schema = Order::schema().unwrap();
		let key = Order::key(json!("A1")).unwrap();
		let mut inst = Instance::fetched(
			schema,
			key,
			values(json!({"product": "coffee", "quantity": 1})),
		)
		.unwrap();
		inst.set("quantity", json!(4)).unwrap();
		let diff = inst.diff();
		assert_eq!(diff["quantity"], json!({"before": 1, "after": 4}));
		assert!(!diff.contains_key("product"));
	}
}
