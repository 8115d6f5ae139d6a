//! Background worker side of the relay.
//!
//! Core components:
//! - `channel` — the `MessageChannel` seam the dispatcher posts through
//! - `protocol` — wire envelopes and the decoded `Inbound` message
//! - `thread` — `WorkerThread`, a handler running on a dedicated OS thread

pub mod channel;
pub mod protocol;
pub mod thread;

pub use channel::MessageChannel;
pub use protocol::{Inbound, ProgressPayload};
pub use thread::{ProgressReporter, WorkerHandler, WorkerThread};
