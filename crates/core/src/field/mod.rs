//! Per-attribute runtime state and mutation tracking

use serde_json::Value;

use crate::err::Error;
use crate::schema::FieldOptions;
use crate::store::WriteOp;
use crate::val::TypeTag;

/// The runtime state of one attribute on one model instance.
///
/// A field remembers the value observed at load time, the current value,
/// and how the application has interacted with it. Those flags decide
/// whether the attribute participates in the commit-time write, and in
/// which shape: a full value, a deletion, or an atomic increment.
#[derive(Debug)]
pub struct Field {
	opts: FieldOptions,
	/// The value observed at load time, absent for new documents
	initial: Option<Value>,
	/// The current value
	value: Option<Value>,
	/// Whether the application has read a present value
	read_accessed: bool,
	/// Whether the application has assigned the field directly
	written: bool,
	/// Pending atomic increment, accumulated across calls
	accumulator: Option<Value>,
	/// Whether the current value is a silently applied default
	default_applied: bool,
}

impl Field {
	/// Create a field from a loaded or provided value
	pub fn new(opts: FieldOptions, initial: Option<Value>) -> Self {
		let value = initial.clone();
		Field {
			opts,
			initial,
			value,
			read_accessed: false,
			written: false,
			accumulator: None,
			default_applied: false,
		}
	}

	/// Create a field on a new document from provided data
	pub fn fresh(opts: FieldOptions, value: Option<Value>) -> Self {
		Field {
			opts,
			initial: None,
			value,
			read_accessed: false,
			written: false,
			accumulator: None,
			default_applied: false,
		}
	}

	/// Fill in the declared default, leaving the initial value absent
	pub fn apply_default(&mut self, default: Value) {
		self.value = Some(default);
		self.default_applied = true;
	}

	/// The compiled options this field was built from
	pub fn options(&self) -> &FieldOptions {
		&self.opts
	}

	/// Read the current value, recording the access.
	///
	/// Reading an absent value records nothing, as there is nothing the
	/// application could observe or mutate.
	pub fn get(&mut self) -> Option<Value> {
		if self.value.is_some() {
			self.read_accessed = true;
		}
		self.value.clone()
	}

	/// Read the current value without recording the access
	pub fn peek(&self) -> Option<&Value> {
		self.value.as_ref()
	}

	/// The value observed at load time
	pub fn initial(&self) -> Option<&Value> {
		self.initial.as_ref()
	}

	/// Assign a new value, or clear the field with `None`.
	///
	/// Validation runs before any state changes, so a rejected assignment
	/// leaves the field exactly as it was. An immutable field with a
	/// loaded initial value rejects every assignment, including one that
	/// matches the current value.
	pub fn set(&mut self, val: Option<Value>) -> Result<(), Error> {
		if self.opts.descriptor.is_immutable() && self.initial.is_some() {
			return Err(Error::field("the field is immutable"));
		}
		match &val {
			Some(v) => self.opts.descriptor.validate(v)?,
			None => {
				if !self.opts.descriptor.is_optional() {
					return Err(Error::field("the field is required and cannot be cleared"));
				}
			}
		}
		self.value = val;
		self.written = true;
		self.accumulator = None;
		self.default_applied = false;
		Ok(())
	}

	/// Add a numeric delta, preferring the store's atomic increment.
	///
	/// While the field is untouched the delta accumulates and the write
	/// is emitted as an increment sentinel, which is safe against
	/// concurrent writers. Once the field has been read or assigned, the
	/// delta degrades to a read-modify-write assignment.
	pub fn increment_by(&mut self, delta: &Value) -> Result<(), Error> {
		if !self.opts.tag().is_numeric() {
			return Err(Error::field("only numeric fields can be incremented"));
		}
		if self.opts.descriptor.is_immutable() && self.initial.is_some() {
			return Err(Error::field("the field is immutable"));
		}
		if !self.opts.tag().matches(delta) {
			return Err(Error::field(format!("increment delta {delta} is not a {}", self.opts.tag())));
		}
		let Some(initial) = self.initial.clone() else {
			return Err(Error::field("cannot increment a field with no stored value"));
		};
		if self.read_accessed || self.written {
			let current = self.value.clone().unwrap_or(initial);
			let next = num_add(self.opts.tag(), &current, delta)?;
			return self.set(Some(next));
		}
		let accumulated = match &self.accumulator {
			Some(acc) => num_add(self.opts.tag(), acc, delta)?,
			None => delta.clone(),
		};
		let next = num_add(self.opts.tag(), &initial, &accumulated)?;
		self.opts.descriptor.validate(&next)?;
		self.accumulator = Some(accumulated);
		self.value = Some(next);
		self.default_applied = false;
		Ok(())
	}

	/// Whether the application has assigned or cleared the field
	pub fn written(&self) -> bool {
		self.written
	}

	/// Whether the commit can use the store's increment sentinel
	pub fn can_use_increment(&self) -> bool {
		self.accumulator.is_some()
			&& self.initial.is_some()
			&& !self.read_accessed
			&& !self.written
	}

	/// Whether the current value differs from the loaded value.
	///
	/// Object and array fields only run the deep comparison when the
	/// application could have changed them: the field was read or
	/// assigned, or it gained a value it did not load with.
	pub fn mutated(&self) -> bool {
		match self.opts.tag() {
			TypeTag::Array | TypeTag::Object => {
				self.may_have_mutated() && self.value != self.initial
			}
			_ => self.value != self.initial,
		}
	}

	fn may_have_mutated(&self) -> bool {
		self.read_accessed
			|| self.written
			|| self.accumulator.is_some()
			|| (self.initial.is_none() && self.value.is_some())
	}

	/// Whether the commit should include this field.
	///
	/// A default that was silently filled in while the context cannot
	/// write is not a change the application made, and is suppressed.
	pub fn changes_to_commit(&self, expect_writes: bool) -> bool {
		if !expect_writes && self.default_applied && !self.written && self.accumulator.is_none() {
			return false;
		}
		self.mutated()
	}

	/// Re-run the descriptor against the current value
	pub fn validate(&self) -> Result<(), Error> {
		match &self.value {
			Some(v) => self.opts.descriptor.validate(v),
			None => {
				if self.opts.descriptor.is_optional() {
					Ok(())
				} else {
					Err(Error::field("a required field has no value"))
				}
			}
		}
	}

	/// Produce the store-side write for this field, if any.
	///
	/// `explicit_update` is set for blind updates, where an absent value
	/// is an instruction to delete the attribute even though no initial
	/// value was ever loaded.
	pub fn write_value(&self, explicit_update: bool) -> Option<WriteOp> {
		match &self.value {
			None => {
				if self.initial.is_some() || explicit_update {
					Some(WriteOp::Delete)
				} else {
					None
				}
			}
			Some(val) => {
				if self.can_use_increment() {
					Some(WriteOp::Increment(self.accumulator.clone()?))
				} else {
					Some(WriteOp::Set(val.clone()))
				}
			}
		}
	}
}

/// Add two JSON numbers under a numeric type tag
fn num_add(tag: TypeTag, a: &Value, b: &Value) -> Result<Value, Error> {
	match tag {
		TypeTag::Integer => {
			let (a, b) = (a.as_i64(), b.as_i64());
			match (a, b) {
				(Some(a), Some(b)) => a
					.checked_add(b)
					.map(Value::from)
					.ok_or_else(|| Error::field("integer increment overflowed")),
				_ => Err(Error::field("expected integer operands")),
			}
		}
		TypeTag::Number => {
			let (a, b) = (a.as_f64(), b.as_f64());
			match (a, b) {
				(Some(a), Some(b)) => serde_json::Number::from_f64(a + b)
					.map(Value::Number)
					.ok_or_else(|| Error::field("number increment produced a non-finite value")),
				_ => Err(Error::field("expected numeric operands")),
			}
		}
		_ => Err(Error::field("only numeric fields can be incremented")),
	}
}
