#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! The firemap engine: typed document models, deterministic identifiers,
//! and transactional contexts over a pluggable document store.
//!
//! This crate is the internals of the `firemap` crate, which is the
//! intended public surface.

#[macro_use]
extern crate tracing;

pub mod err;
pub mod field;
pub mod key;
pub mod model;
pub mod schema;
pub mod store;
pub mod txn;
pub mod val;

pub use err::Error;

/// The result type returned by every fallible operation in this crate
pub type Result<T> = std::result::Result<T, Error>;
