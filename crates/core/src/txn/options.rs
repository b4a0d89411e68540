//! Context configuration

use std::time::Duration;

use crate::err::Error;

/// Configuration for one [`run`](crate::txn::Firemap::run) invocation.
///
/// Unknown options and mistyped values are unrepresentable here; the
/// remaining invalid states are rejected by [`Options::check`] before
/// the first attempt starts.
#[derive(Clone, Debug)]
pub struct Options {
	/// Reject every write operation
	pub read_only: bool,
	/// Read through a transaction so multi-document reads share one
	/// snapshot; only a read-only context may opt out
	pub consistent_reads: bool,
	/// Additional attempts after the first failure
	pub retries: u32,
	/// Delay before the first retry
	pub initial_backoff: Duration,
	/// Upper bound for the retry delay
	pub max_backoff: Duration,
	/// Let `get` return an already-tracked model instead of failing
	pub cache_models: bool,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			read_only: false,
			consistent_reads: true,
			retries: 4,
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_millis(10_000),
			cache_models: false,
		}
	}
}

impl Options {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reject every write operation in this context
	pub fn with_read_only(mut self, read_only: bool) -> Self {
		self.read_only = read_only;
		self
	}

	/// Control whether reads share one transaction snapshot
	pub fn with_consistent_reads(mut self, consistent_reads: bool) -> Self {
		self.consistent_reads = consistent_reads;
		self
	}

	/// Set the number of additional attempts after the first failure
	pub fn with_retries(mut self, retries: u32) -> Self {
		self.retries = retries;
		self
	}

	/// Set the delay before the first retry
	pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
		self.initial_backoff = backoff;
		self
	}

	/// Set the upper bound for the retry delay
	pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
		self.max_backoff = backoff;
		self
	}

	/// Let repeated reads of one document share the tracked model
	pub fn with_cache_models(mut self, cache_models: bool) -> Self {
		self.cache_models = cache_models;
		self
	}

	/// Validate the option combination
	pub fn check(&self) -> Result<(), Error> {
		if !self.read_only && !self.consistent_reads {
			return Err(Error::InvalidOptions {
				message: "a context that can write must use consistent reads".to_string(),
			});
		}
		if self.initial_backoff < Duration::from_millis(1) {
			return Err(Error::InvalidOptions {
				message: "initial_backoff must be at least 1ms".to_string(),
			});
		}
		if self.max_backoff < Duration::from_millis(200) {
			return Err(Error::InvalidOptions {
				message: "max_backoff must be at least 200ms".to_string(),
			});
		}
		Ok(())
	}

	/// Whether the context should run inside a store transaction
	pub(crate) fn transactional(&self) -> bool {
		!self.read_only || self.consistent_reads
	}
}
