//! The transactional context and its run loop

mod ctx;
mod ds;
mod event;
mod options;

pub use ctx::{Context, ModelDiffs, ModelRef};
pub use ds::Firemap;
pub use event::{Event, Handler, Outcome};
pub use options::Options;
