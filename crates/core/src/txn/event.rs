//! Context lifecycle events

use std::fmt;

use futures::future::BoxFuture;

/// The lifecycle events a context can announce
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Event {
	/// The context committed successfully
	PostCommit,
	/// The context failed terminally
	TxFailed,
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Event::PostCommit => write!(f, "post-commit"),
			Event::TxFailed => write!(f, "tx-failed"),
		}
	}
}

/// What a handler learns about the outcome
#[derive(Clone, Debug)]
pub struct Outcome {
	/// The event being delivered
	pub event: Event,
	/// The terminal error message, for failure events
	pub error: Option<String>,
}

/// A single-fire event handler
pub type Handler = Box<dyn FnOnce(Outcome) -> BoxFuture<'static, ()> + Send>;

pub(crate) struct Registration {
	pub(crate) event: Event,
	pub(crate) name: String,
	pub(crate) handler: Handler,
}

/// An ordered, single-fire event sink.
///
/// Handlers fire at most once, in registration order, and are awaited
/// sequentially. Delivery happens after the context's outcome is known,
/// so handlers never observe (or mutate) in-flight state.
#[derive(Default)]
pub(crate) struct Emitter {
	registrations: Vec<Registration>,
}

impl Emitter {
	pub(crate) fn len(&self) -> usize {
		self.registrations.len()
	}

	pub(crate) fn register(&mut self, event: Event, name: String, handler: Handler) {
		self.registrations.push(Registration {
			event,
			name,
			handler,
		});
	}

	/// Deliver the outcome to every matching handler, consuming them
	pub(crate) async fn emit(self, outcome: Outcome) {
		for registration in self.registrations {
			if registration.event == outcome.event {
				trace!("Delivering {} to handler '{}'", outcome.event, registration.name);
				(registration.handler)(outcome.clone()).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	use super::*;

	#[tokio::test]
	async fn handlers_fire_once_in_order() {
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		let mut emitter = Emitter::default();
		for i in 0..3 {
			let order = order.clone();
			emitter.register(
				Event::PostCommit,
				format!("h{i}"),
				Box::new(move |_| {
					Box::pin(async move {
						order.lock().unwrap().push(i);
					})
				}),
			);
		}
		emitter
			.emit(Outcome {
				event: Event::PostCommit,
				error: None,
			})
			.await;
		assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn handlers_only_see_their_event() {
		let fired = Arc::new(AtomicU32::new(0));
		let mut emitter = Emitter::default();
		let seen = fired.clone();
		emitter.register(
			Event::TxFailed,
			"failure".to_string(),
			Box::new(move |_| {
				Box::pin(async move {
					seen.fetch_add(1, Ordering::SeqCst);
				})
			}),
		);
		emitter
			.emit(Outcome {
				event: Event::PostCommit,
				error: None,
			})
			.await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}
}
