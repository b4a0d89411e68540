//! Shared models and setup for the integration tests

#![allow(dead_code)]

use std::sync::Once;

use firemap::store::mem::Mem;
use firemap::{Definition, Descriptor, Error, Firemap, Instance, Model};
use serde_json::json;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

pub struct Order;

impl Model for Order {
	fn define() -> Definition {
		Definition::new("Order")
			.key("id", Descriptor::string())
			.field("product", Descriptor::string())
			.field("quantity", Descriptor::integer().min(0))
			.field("note", Descriptor::string().optional())
	}
}

pub struct RaceResult;

impl Model for RaceResult {
	fn define() -> Definition {
		Definition::new("RaceResult")
			.key("race_id", Descriptor::integer())
			.key("runner_name", Descriptor::string())
			.field("time_ms", Descriptor::integer().optional())
	}
}

pub struct Account;

impl Model for Account {
	fn define() -> Definition {
		Definition::new("Account")
			.key("id", Descriptor::string())
			.field("balance", Descriptor::integer().min(0))
			.field("bonus", Descriptor::integer().default(json!(5)).immutable())
	}
}

pub struct Counter;

impl Model for Counter {
	fn define() -> Definition {
		Definition::new("Counter")
			.key("id", Descriptor::string())
			.field("count", Descriptor::integer())
	}
}

pub struct Note;

impl Model for Note {
	fn define() -> Definition {
		Definition::new("Note")
			.key("id", Descriptor::string())
			.field("body", Descriptor::string())
			.field("version", Descriptor::integer().default(json!(0)))
	}

	fn finalize(instance: &mut Instance) -> Result<(), Error> {
		let version = instance
			.peek("version")?
			.and_then(|v| v.as_i64())
			.unwrap_or(0);
		instance.set("version", json!(version + 1))
	}
}

pub fn new_db() -> Firemap<Mem> {
	TRACING.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(EnvFilter::from_default_env())
			.try_init();
	});
	Firemap::init(Mem::new())
}
