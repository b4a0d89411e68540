//! The store-facing entry point and the retrying run loop

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tracing::instrument;
use uuid::Uuid;

use crate::err::{classify, Error};
use crate::store::Store;
use crate::txn::ctx::Context;
use crate::txn::event::{Event, Outcome};
use crate::txn::options::Options;

/// The engine's handle to a document store.
///
/// A `Firemap` owns the store connection and starts contexts against
/// it. It is cheap to clone and safe to share; every context gets its
/// own tracked state and, when the isolation mode asks for one, its own
/// store transaction.
///
/// Side effects inside the closure may run more than once: a retried
/// attempt re-runs the whole closure, so anything that is not a context
/// operation should be idempotent.
pub struct Firemap<S: Store> {
	store: Arc<S>,
}

impl<S: Store> Clone for Firemap<S> {
	fn clone(&self) -> Self {
		Firemap {
			store: self.store.clone(),
		}
	}
}

impl<S: Store> Firemap<S> {
	/// Wire a store handle into the engine
	pub fn init(store: S) -> Self {
		Firemap {
			store: Arc::new(store),
		}
	}

	/// The underlying store handle
	pub fn store(&self) -> &S {
		&self.store
	}

	/// Eagerly compile and register a model's schema.
	///
	/// Compilation is otherwise lazy; registering at startup surfaces
	/// declaration mistakes before the first context runs.
	pub fn register<M: crate::model::Model>(&self) -> Result<(), Error> {
		M::schema().map(|_| ())
	}

	/// Run a closure within a transactional context.
	///
	/// The closure is handed a fresh [`Context`] per attempt. When it
	/// returns successfully the tracked writes are dispatched and the
	/// transaction commits; a retryable failure sleeps through an
	/// exponential backoff with jitter and tries again, up to
	/// `options.retries` additional attempts.
	#[instrument(level = "trace", skip(self, options, f))]
	pub async fn run<T, F>(&self, options: Options, mut f: F) -> Result<T, Error>
	where
		F: for<'c> FnMut(&'c mut Context<S>) -> BoxFuture<'c, Result<T, Error>>,
	{
		options.check()?;
		let run_id = Uuid::new_v4();
		let mut backoff = options.initial_backoff;
		let mut attempt: u32 = 0;
		loop {
			attempt += 1;
			trace!("Context {run_id} attempt {attempt}");
			// Bind the store handle for this attempt
			let tx = match options.transactional() {
				true => Some(self.store.transaction(!options.read_only).await?),
				false => None,
			};
			let mut ctx = Context::new(self.store.clone(), tx, options.clone());
			// Run the closure, then dispatch and commit the writes
			let (outcome, from_closure) = match f(&mut ctx).await {
				Ok(value) => match ctx.flush().await {
					Ok(()) => match ctx.commit_tx().await {
						Ok(()) => (Ok(value), false),
						Err(e) => (Err(e), false),
					},
					Err(e) => {
						ctx.cancel_tx().await;
						(Err(e), false)
					}
				},
				Err(e) => {
					ctx.cancel_tx().await;
					(Err(e), true)
				}
			};
			match outcome {
				Ok(value) => {
					trace!("Context {run_id} committed on attempt {attempt}");
					ctx.into_emitter()
						.emit(Outcome {
							event: Event::PostCommit,
							error: None,
						})
						.await;
					return Ok(value);
				}
				Err(err) => {
					let err = classify(err, None);
					if err.is_retryable() && attempt <= options.retries {
						let delay = jittered(backoff);
						debug!(
							"Context {run_id} attempt {attempt} failed ({err}), retrying in {delay:?}"
						);
						tokio::time::sleep(delay).await;
						backoff = cmp::min(backoff * 2, options.max_backoff);
						continue;
					}
					// Closure errors surface unchanged; engine and store
					// failures surface as the terminal wrapper
					let err = if from_closure && !err.is_retryable() {
						err
					} else {
						Error::TxFailed {
							attempts: attempt,
							source: Box::new(err),
						}
					};
					debug!("Context {run_id} failed terminally after {attempt} attempts: {err}");
					ctx.into_emitter()
						.emit(Outcome {
							event: Event::TxFailed,
							error: Some(err.to_string()),
						})
						.await;
					return Err(err);
				}
			}
		}
	}
}

/// Spread a backoff delay by up to ten percent either way
fn jittered(backoff: Duration) -> Duration {
	let spread = rand::thread_rng().gen_range(-0.1..=0.1);
	backoff.mul_f64(1.0 + spread)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn jitter_stays_within_ten_percent() {
		let base = Duration::from_millis(1000);
		for _ in 0..100 {
			let d = jittered(base);
			assert!(d >= Duration::from_millis(899), "{d:?}");
			assert!(d <= Duration::from_millis(1101), "{d:?}");
		}
	}
}
