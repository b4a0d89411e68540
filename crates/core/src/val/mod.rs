//! Document field values and their type tags

use std::fmt;

use serde_json::Value;

use crate::err::Error;

/// The declarable type of a document attribute.
///
/// Every descriptor carries exactly one tag, and the tag selects which
/// behaviour the field runtime applies: numeric fields gain increment
/// support, object and array fields compare by deep equality.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum TypeTag {
	Array,
	Boolean,
	Integer,
	Number,
	Object,
	String,
}

impl TypeTag {
	/// Check whether a value inhabits this type.
	///
	/// `Number` accepts any JSON number including integers; `Integer`
	/// rejects values with a fractional part.
	pub fn matches(&self, val: &Value) -> bool {
		match self {
			TypeTag::Array => val.is_array(),
			TypeTag::Boolean => val.is_boolean(),
			TypeTag::Integer => val.is_i64() || val.is_u64(),
			TypeTag::Number => val.is_number(),
			TypeTag::Object => val.is_object(),
			TypeTag::String => val.is_string(),
		}
	}

	/// Check whether this tag names a numeric type
	pub fn is_numeric(&self) -> bool {
		matches!(self, TypeTag::Integer | TypeTag::Number)
	}
}

impl fmt::Display for TypeTag {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			TypeTag::Array => write!(f, "array"),
			TypeTag::Boolean => write!(f, "boolean"),
			TypeTag::Integer => write!(f, "integer"),
			TypeTag::Number => write!(f, "number"),
			TypeTag::Object => write!(f, "object"),
			TypeTag::String => write!(f, "string"),
		}
	}
}

/// Serialize a value to its canonical JSON string.
///
/// Object keys are emitted in lexicographic order, so two objects that
/// are deep-equal canonicalize to the same string. This is what makes
/// object-typed key components safe to embed in an encoded identifier.
pub fn canonical(val: &Value) -> Result<String, Error> {
	// serde_json maps are ordered; nested objects sort recursively
	serde_json::to_string(val).map_err(|e| Error::Internal {
		message: format!("value could not be canonicalized: {e}"),
	})
}
