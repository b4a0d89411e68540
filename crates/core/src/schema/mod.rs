//! Declarative attribute descriptors and their compiled form

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::err::Error;
use crate::val::TypeTag;

/// A named validation predicate attached to a descriptor
#[derive(Clone)]
struct Check {
	message: String,
	test: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

/// The declared shape of one document attribute.
///
/// A descriptor is built from a type-tag constructor and refined with
/// combinators. It is inert until compiled into [`FieldOptions`] as part
/// of a model schema.
///
/// ```
/// use firemap_core::schema::Descriptor;
/// use serde_json::json;
///
/// let quantity = Descriptor::integer().min(0).default(json!(0));
/// assert!(quantity.validate(&json!(3)).is_ok());
/// assert!(quantity.validate(&json!(-1)).is_err());
/// ```
#[derive(Clone)]
pub struct Descriptor {
	tag: TypeTag,
	optional: bool,
	immutable: bool,
	default: Option<Value>,
	min: Option<i64>,
	max: Option<i64>,
	checks: Vec<Check>,
}

impl Descriptor {
	fn new(tag: TypeTag) -> Self {
		Descriptor {
			tag,
			optional: false,
			immutable: false,
			default: None,
			min: None,
			max: None,
			checks: Vec::new(),
		}
	}

	/// Declare an array attribute
	pub fn array() -> Self {
		Self::new(TypeTag::Array)
	}

	/// Declare a boolean attribute
	pub fn boolean() -> Self {
		Self::new(TypeTag::Boolean)
	}

	/// Declare an integer attribute
	pub fn integer() -> Self {
		Self::new(TypeTag::Integer)
	}

	/// Declare a floating point attribute
	pub fn number() -> Self {
		Self::new(TypeTag::Number)
	}

	/// Declare an object attribute
	pub fn object() -> Self {
		Self::new(TypeTag::Object)
	}

	/// Declare a string attribute
	pub fn string() -> Self {
		Self::new(TypeTag::String)
	}

	/// Mark the attribute as omissible
	pub fn optional(mut self) -> Self {
		self.optional = true;
		self
	}

	/// Forbid assignment once an initial value exists
	pub fn immutable(mut self) -> Self {
		self.immutable = true;
		self
	}

	/// Supply a value for documents that omit the attribute
	pub fn default(mut self, val: Value) -> Self {
		self.default = Some(val);
		self
	}

	/// Require numeric values to be at least `min`
	pub fn min(mut self, min: i64) -> Self {
		self.min = Some(min);
		self
	}

	/// Require numeric values to be at most `max`
	pub fn max(mut self, max: i64) -> Self {
		self.max = Some(max);
		self
	}

	/// Attach an arbitrary named validation predicate
	pub fn check<F>(mut self, message: impl Into<String>, test: F) -> Self
	where
		F: Fn(&Value) -> bool + Send + Sync + 'static,
	{
		self.checks.push(Check {
			message: message.into(),
			test: Arc::new(test),
		});
		self
	}

	/// The type tag this descriptor declares
	pub fn tag(&self) -> TypeTag {
		self.tag
	}

	/// Whether the attribute may be omitted
	pub fn is_optional(&self) -> bool {
		self.optional
	}

	/// Whether the attribute rejects assignment after initialization
	pub fn is_immutable(&self) -> bool {
		self.immutable
	}

	/// The declared default value, if any
	pub fn default_value(&self) -> Option<&Value> {
		self.default.as_ref()
	}

	/// Validate a value against this descriptor
	pub fn validate(&self, val: &Value) -> Result<(), Error> {
		if !self.tag.matches(val) {
			return Err(Error::field(format!("expected a {} but found {val}", self.tag)));
		}
		if let (true, Some(n)) = (self.tag.is_numeric(), val.as_f64()) {
			if let Some(min) = self.min {
				if n < min as f64 {
					return Err(Error::field(format!("{n} is below the minimum of {min}")));
				}
			}
			if let Some(max) = self.max {
				if n > max as f64 {
					return Err(Error::field(format!("{n} is above the maximum of {max}")));
				}
			}
		}
		for check in &self.checks {
			if !(check.test)(val) {
				return Err(Error::field(check.message.clone()));
			}
		}
		Ok(())
	}
}

impl fmt::Debug for Descriptor {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Descriptor")
			.field("tag", &self.tag)
			.field("optional", &self.optional)
			.field("immutable", &self.immutable)
			.field("default", &self.default)
			.finish_non_exhaustive()
	}
}

/// The compiled options for one attribute of a model schema
#[derive(Clone, Debug)]
pub struct FieldOptions {
	pub(crate) descriptor: Descriptor,
	pub(crate) is_key: bool,
}

impl FieldOptions {
	/// Compile a descriptor into its usable form.
	///
	/// Key components must be required, must not carry a default, and are
	/// always immutable. Any declared default must satisfy its own
	/// descriptor.
	pub fn compile(name: &str, mut descriptor: Descriptor, is_key: bool) -> Result<Self, Error> {
		if is_key {
			if descriptor.optional {
				return Err(Error::field(format!("key component '{name}' cannot be optional")));
			}
			if descriptor.default.is_some() {
				return Err(Error::field(format!("key component '{name}' cannot have a default")));
			}
			descriptor.immutable = true;
		}
		if let Some(default) = &descriptor.default {
			descriptor.validate(default).map_err(|e| {
				Error::field(format!("default for '{name}' fails its own schema: {e}"))
			})?;
		}
		Ok(FieldOptions {
			descriptor,
			is_key,
		})
	}

	/// The type tag of the underlying descriptor
	pub fn tag(&self) -> TypeTag {
		self.descriptor.tag()
	}

	/// Whether this attribute is a key component
	pub fn is_key(&self) -> bool {
		self.is_key
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn validate_type_and_bounds() {
		let d = Descriptor::integer().min(0).max(10);
		assert!(d.validate(&json!(0)).is_ok());
		assert!(d.validate(&json!(10)).is_ok());
		assert!(d.validate(&json!(11)).is_err());
		assert!(d.validate(&json!(-1)).is_err());
		assert!(d.validate(&json!("three")).is_err());
	}

	#[test]
	fn validate_custom_check() {
		let d = Descriptor::string().check("must not be empty", |v| {
			v.as_str().map(|s| !s.is_empty()).unwrap_or(false)
		});
		assert!(d.validate(&json!("x")).is_ok());
		let err = d.validate(&json!("")).unwrap_err();
		assert!(err.to_string().contains("must not be empty"));
	}

	#[test]
	fn compile_rejects_optional_key() {
		let err = FieldOptions::compile("id", Descriptor::string().optional(), true).unwrap_err();
		assert!(err.to_string().contains("cannot be optional"));
	}

	#[test]
	fn compile_rejects_defaulted_key() {
		let err =
			FieldOptions::compile("id", Descriptor::string().default(json!("x")), true).unwrap_err();
		assert!(err.to_string().contains("cannot have a default"));
	}

	#[test]
	fn compile_forces_key_immutability() {
		let opts = FieldOptions::compile("id", Descriptor::string(), true).unwrap();
		assert!(opts.descriptor.is_immutable());
	}

	#[test]
	fn compile_rejects_invalid_default() {
		let err = FieldOptions::compile("n", Descriptor::integer().min(0).default(json!(-5)), false)
			.unwrap_err();
		assert!(err.to_string().contains("fails its own schema"));
	}
}
