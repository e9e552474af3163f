//! Connection manager: one signaling socket plus one peer session
//!
//! Socket and peer callbacks are funnelled into a single event queue and
//! applied by one worker task, so state transitions happen in the order
//! their causes arrived.
pub mod events;
pub mod manager;

pub use events::{EventSink, SessionEvent};
pub use manager::ConnectionManager;
