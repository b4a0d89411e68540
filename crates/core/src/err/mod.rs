use std::string::ToString;

use thiserror::Error;

/// An error originating from the firemap engine or the underlying store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// A field value did not satisfy its declared schema
	#[error("Invalid field value: {message}")]
	InvalidField {
		message: String,
	},

	/// The context was given an invalid or inconsistent option
	#[error("Invalid context options: {message}")]
	InvalidOptions {
		message: String,
	},

	/// An argument had the wrong shape for the operation
	#[error("Invalid parameter: {message}")]
	InvalidParameter {
		message: String,
	},

	/// A create-only write found an existing document
	#[error("The document '{path}' already exists")]
	ModelAlreadyExists {
		path: String,
	},

	/// The same document was tracked twice within one context
	#[error("The document '{path}' is already tracked by this context")]
	ModelTrackedTwice {
		path: String,
	},

	/// The same document was deleted twice within one context
	#[error("The document '{path}' was already deleted by this context")]
	DeletedTwice {
		path: String,
	},

	/// A write operation was attempted in a read-only context
	#[error("Unable to write, the context is read-only")]
	ReadOnlyWrite,

	/// The store reported lock contention or an optimistic conflict
	#[error("Transaction lock acquisition timed out")]
	TxLockTimeout,

	/// A model was misused at commit time
	#[error("Model error: {message}")]
	Model {
		message: String,
	},

	/// The context exhausted its attempts or hit a fatal commit error
	#[error("Transaction failed after {attempts} attempts: {source}")]
	TxFailed {
		attempts: u32,
		#[source]
		source: Box<Error>,
	},

	/// An application error explicitly marked as retryable
	#[error("Retryable error: {message}")]
	TxRetryable {
		message: String,
	},

	/// Any other failure raised by the underlying store
	#[error("There was a problem with a datastore transaction: {message}")]
	Tx {
		message: String,
	},

	/// The transaction was already committed or cancelled
	#[error("Couldn't update a finished transaction")]
	TxFinished,

	/// An internal invariant was broken
	#[error("Internal error: {message}")]
	Internal {
		message: String,
	},
}

impl Error {
	/// Check whether a fresh attempt could succeed where this one failed
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::TxLockTimeout | Error::TxRetryable { .. })
	}

	/// Create a field validation error
	pub fn field(message: impl ToString) -> Self {
		Error::InvalidField {
			message: message.to_string(),
		}
	}

	/// Create a parameter shape error
	pub fn param(message: impl ToString) -> Self {
		Error::InvalidParameter {
			message: message.to_string(),
		}
	}

	/// Create a model misuse error
	pub fn model(message: impl ToString) -> Self {
		Error::Model {
			message: message.to_string(),
		}
	}
}

/// The detail string stores use when a create-only write finds a document
const ALREADY_EXISTS_SIGNATURE: &str = "already exists";

/// The detail strings stores use when transaction locks cannot be acquired
const LOCK_SIGNATURES: [&str; 3] = ["lock timeout", "lock contention", "too much contention"];

/// The detail strings stores use when an update or guarded delete finds
/// no document
const MISSING_SIGNATURES: [&str; 2] = ["no document to update", "no document to delete"];

/// Rewrite a raw store error into its public error kind.
///
/// Store failures surface as [`Error::Tx`] with an opaque detail string.
/// The commit path inspects that string for the known create-conflict and
/// lock-contention signatures so that callers observe the structured kinds
/// instead, and so that the retry loop can make a correct decision.
pub fn classify(err: Error, path: Option<&str>) -> Error {
	match err {
		Error::Tx {
			ref message,
		} => {
			let detail = message.to_lowercase();
			if LOCK_SIGNATURES.iter().any(|s| detail.contains(s)) {
				return Error::TxLockTimeout;
			}
			if detail.contains(ALREADY_EXISTS_SIGNATURE) {
				return Error::ModelAlreadyExists {
					path: path.unwrap_or_default().to_string(),
				};
			}
			if MISSING_SIGNATURES.iter().any(|s| detail.contains(s)) {
				return Error::model(message.clone());
			}
			err
		}
		err => err,
	}
}
