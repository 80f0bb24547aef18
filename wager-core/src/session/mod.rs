//! Registry of live games and the loops that persist their events.

mod drain;
mod runtime;

pub use runtime::SessionRuntime;
