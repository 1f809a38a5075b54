mod context;
mod dispatcher;

pub use context::EventContext;
pub use dispatcher::{priority, Dispatcher, Event, EventHandler, EventResult};
