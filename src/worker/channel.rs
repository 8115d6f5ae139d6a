//! Outbound half of the message channel to the background worker.

use serde_json::Value;

use crate::error::ChannelError;

/// Ordered, non-blocking path to exactly one background worker.
///
/// Replies come back on a separate inbound receiver, in the order the
/// requests were posted.
pub trait MessageChannel: Send {
    /// Queue a request for the worker. Must not block.
    fn post(&self, payload: Value) -> Result<(), ChannelError>;
}

impl<T: MessageChannel + ?Sized> MessageChannel for Box<T> {
    fn post(&self, payload: Value) -> Result<(), ChannelError> {
        (**self).post(payload)
    }
}
