//! Job dispatch — one job in flight at a time.
//!
//! - `job` — `Job` and its `JobReply` handle
//! - `controller` — the `Dispatcher` state machine (queue + in-flight slot)
//! - `service` — Tokio task owning a dispatcher, driven through `DispatcherHandle`

pub mod controller;
pub mod job;
pub mod service;

pub use controller::Dispatcher;
pub use job::{Job, JobReply};
pub use service::{DispatcherHandle, DispatcherService};
