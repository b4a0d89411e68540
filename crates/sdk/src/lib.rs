#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! This library maps typed document models onto a transactional document
//! store. Applications declare the shape of each collection once, then
//! read and write documents through a context that guarantees
//! all-or-nothing commits, consistent multi-document reads, deterministic
//! compound-key identifiers, and schema validation at the moment of
//! assignment.
//!
//! # Examples
//!
//! ```
//! use firemap::{Definition, Descriptor, Firemap, Model, Options};
//! use firemap::store::mem::Mem;
//! use serde_json::json;
//!
//! struct Order;
//!
//! impl Model for Order {
//!     fn define() -> Definition {
//!         Definition::new("Order")
//!             .key("id", Descriptor::string())
//!             .field("product", Descriptor::string())
//!             .field("quantity", Descriptor::integer().min(0))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> firemap::Result<()> {
//!     let db = Firemap::init(Mem::new());
//!
//!     // Create a document within one context
//!     db.run(Options::default(), |ctx| {
//!         Box::pin(async move {
//!             ctx.create::<Order>(json!({
//!                 "id": "A1",
//!                 "product": "coffee",
//!                 "quantity": 1,
//!             }))?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//!
//!     // Read it back and change it in another context
//!     db.run(Options::default(), |ctx| {
//!         Box::pin(async move {
//!             let order = ctx.get::<Order>(json!("A1")).await?.expect("stored above");
//!             ctx.model(order)?.increment_by("quantity", json!(2))?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub use firemap_core::err::Error;
pub use firemap_core::key::{Data, DocPath, Id, Key, KeyList};
pub use firemap_core::model::{Definition, Instance, Model, Schema, SnapshotOpts};
pub use firemap_core::schema::Descriptor;
pub use firemap_core::txn::{
	Context, Event, Firemap, Handler, ModelDiffs, ModelRef, Options, Outcome,
};
pub use firemap_core::val::TypeTag;
pub use firemap_core::Result;

/// The document store adapter and its bundled backends
pub mod store {
	pub use firemap_core::store::{Attrs, Mutation, Store, Transaction, WriteOp};

	/// The in-memory store backend
	#[cfg(feature = "store-mem")]
	#[cfg_attr(docsrs, doc(cfg(feature = "store-mem")))]
	pub mod mem {
		pub use firemap_core::store::mem::{Mem, Transaction};
	}
}
