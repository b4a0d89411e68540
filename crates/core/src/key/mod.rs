//! Deterministic document identifiers and addressing handles

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::err::Error;
use crate::model::Schema;
use crate::val::{canonical, TypeTag};

/// The separator between encoded key components
const COMPONENT_SEPARATOR: char = '\u{0}';

/// The encoded identifier of a document.
///
/// A model whose key is a single integer component addresses its
/// documents by the native number; every other key shape collapses to a
/// deterministic string.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
#[non_exhaustive]
pub enum Id {
	Number(i64),
	Text(String),
}

impl From<i64> for Id {
	fn from(v: i64) -> Self {
		Self::Number(v)
	}
}

impl From<String> for Id {
	fn from(v: String) -> Self {
		Self::Text(v)
	}
}

impl From<&str> for Id {
	fn from(v: &str) -> Self {
		Self::Text(v.to_owned())
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Id::Number(v) => write!(f, "{v}"),
			Id::Text(v) => write!(f, "{v}"),
		}
	}
}

/// The full address of a document: `collection/id`
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DocPath {
	pub collection: String,
	pub id: Id,
}

impl DocPath {
	pub fn new(collection: impl Into<String>, id: Id) -> Self {
		DocPath {
			collection: collection.into(),
			id,
		}
	}
}

impl fmt::Display for DocPath {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}/{}", self.collection, self.id)
	}
}

/// Collapse a component map into the document identifier.
///
/// Components are visited in `key_order`, which is the lexicographic
/// order of the component names, so the encoding does not depend on the
/// order the application supplied them in. String components are embedded
/// verbatim and must not contain the separator; all other components are
/// embedded as canonical JSON, which sorts object keys and therefore
/// yields one encoding per logical value.
pub fn encode(schema: &Schema, components: &Map<String, Value>) -> Result<Id, Error> {
	let order = schema.key_order();
	for name in components.keys() {
		if !order.iter().any(|k| k == name) {
			return Err(Error::field(format!(
				"'{name}' is not a key component of {}",
				schema.collection()
			)));
		}
	}
	// A sole integer component is the identifier itself
	if let [name] = order {
		let opts = schema.attr(name).expect("key component is declared");
		if opts.tag() == TypeTag::Integer {
			let val = components
				.get(name.as_str())
				.ok_or_else(|| Error::field(format!("missing key component '{name}'")))?;
			opts.descriptor.validate(val)?;
			let n = val
				.as_i64()
				.ok_or_else(|| Error::field(format!("key component '{name}' is out of range")))?;
			return Ok(Id::Number(n));
		}
	}
	let mut pieces = Vec::with_capacity(order.len());
	for name in order {
		let opts = schema.attr(name).expect("key component is declared");
		let val = components
			.get(name.as_str())
			.ok_or_else(|| Error::field(format!("missing key component '{name}'")))?;
		opts.descriptor.validate(val)?;
		match val {
			Value::String(s) => {
				if s.contains(COMPONENT_SEPARATOR) {
					return Err(Error::field(format!(
						"key component '{name}' contains a NUL byte"
					)));
				}
				pieces.push(s.clone());
			}
			other => pieces.push(canonical(other)?),
		}
	}
	Ok(Id::Text(pieces.join("\u{0}")))
}

/// Recover the component map from an encoded identifier
pub fn decode(schema: &Schema, id: &Id) -> Result<Map<String, Value>, Error> {
	let order = schema.key_order();
	let mut components = Map::new();
	// A sole integer component round-trips through the native number
	if let [name] = order {
		let opts = schema.attr(name).expect("key component is declared");
		if opts.tag() == TypeTag::Integer {
			let Id::Number(n) = id else {
				return Err(Error::field(format!(
					"expected a numeric identifier for {}",
					schema.collection()
				)));
			};
			components.insert(name.clone(), Value::from(*n));
			return Ok(components);
		}
	}
	let Id::Text(encoded) = id else {
		return Err(Error::field(format!(
			"expected a string identifier for {}",
			schema.collection()
		)));
	};
	let pieces: Vec<&str> = encoded.split(COMPONENT_SEPARATOR).collect();
	if pieces.len() != order.len() {
		return Err(Error::field(format!(
			"identifier has {} components but {} declares {}",
			pieces.len(),
			schema.collection(),
			order.len()
		)));
	}
	for (name, piece) in order.iter().zip(pieces) {
		let opts = schema.attr(name).expect("key component is declared");
		let val = match opts.tag() {
			TypeTag::String => Value::String(piece.to_owned()),
			_ => serde_json::from_str(piece).map_err(|_| {
				Error::field(format!("key component '{name}' could not be parsed from '{piece}'"))
			})?,
		};
		opts.descriptor.validate(&val)?;
		components.insert(name.clone(), val);
	}
	Ok(components)
}

/// The identity of a document, without any field data.
///
/// A key addresses a document for reads and deletes without touching the
/// store. Build one through [`Schema::key_from`] or a model's `key`
/// helper.
#[derive(Clone, Debug)]
pub struct Key {
	schema: &'static Schema,
	id: Id,
	components: Map<String, Value>,
}

impl Key {
	pub(crate) fn new(
		schema: &'static Schema,
		id: Id,
		components: Map<String, Value>,
	) -> Self {
		Key {
			schema,
			id,
			components,
		}
	}

	/// The schema this key addresses
	pub fn schema(&self) -> &'static Schema {
		self.schema
	}

	/// The encoded identifier
	pub fn id(&self) -> &Id {
		&self.id
	}

	/// The decoded key components
	pub fn components(&self) -> &Map<String, Value> {
		&self.components
	}

	/// The full document path
	pub fn path(&self) -> DocPath {
		DocPath::new(self.schema.collection(), self.id.clone())
	}
}

/// A document identity plus initial values for its data attributes.
///
/// Used by `get` with `create_if_missing`, where the provided values
/// seed the model when the store has no document.
#[derive(Clone, Debug)]
pub struct Data {
	key: Key,
	values: Map<String, Value>,
}

impl Data {
	pub(crate) fn new(key: Key, values: Map<String, Value>) -> Self {
		Data {
			key,
			values,
		}
	}

	/// The identity part of this handle
	pub fn key(&self) -> &Key {
		&self.key
	}

	/// The retained non-key initial values
	pub fn values(&self) -> &Map<String, Value> {
		&self.values
	}

	pub(crate) fn into_parts(self) -> (Key, Map<String, Value>) {
		(self.key, self.values)
	}
}

/// An ordered key collection that drops duplicate identities.
///
/// Two keys are the same identity when they address the same collection
/// with the same encoded identifier. First insertion wins and order is
/// preserved.
#[derive(Debug, Default)]
pub struct KeyList {
	keys: Vec<Key>,
	seen: HashSet<(String, Id)>,
}

impl KeyList {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a key unless its identity is already present
	pub fn push(&mut self, key: Key) -> bool {
		let identity = (key.schema().collection().to_owned(), key.id().clone());
		if self.seen.insert(identity) {
			self.keys.push(key);
			true
		} else {
			false
		}
	}

	/// Append several keys, dropping duplicates
	pub fn extend(&mut self, keys: impl IntoIterator<Item = Key>) {
		for key in keys {
			self.push(key);
		}
	}

	pub fn len(&self) -> usize {
		self.keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Key> {
		self.keys.iter()
	}

	pub fn into_vec(self) -> Vec<Key> {
		self.keys
	}
}
