//! Task lifecycle events.
//!
//! - `bus` — `TaskEvent`, the `TaskEventSink` seam and the broadcast-backed `EventBus`

pub mod bus;

pub use bus::{EventBus, TaskEvent, TaskEventSink};
