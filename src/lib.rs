//! Worker Relay — serializes jobs onto a single background worker and relays
//! its progress and results.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod worker;
