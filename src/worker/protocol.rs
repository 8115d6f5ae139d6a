//! Wire format between the dispatcher and the background worker.
//!
//! Inbound messages are JSON values. A value whose `action` is `"Progress"`
//! is a progress envelope; anything else is the terminal result of the job
//! in flight and is handed to the job untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ChannelError;

/// `action` tag of progress envelopes.
pub const PROGRESS_ACTION: &str = "Progress";

/// `action` tag the worker thread uses when a handler fails.
pub const FAILED_ACTION: &str = "Failed";

/// Payload of a progress envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressPayload {
    Started {
        #[serde(rename = "taskId")]
        task_id: Value,
    },
    Progress {
        #[serde(rename = "taskId")]
        task_id: Value,
        percentage: f64,
    },
    Finished {
        #[serde(rename = "taskId")]
        task_id: Value,
    },
}

impl ProgressPayload {
    /// Wrap into the `{"action": "Progress", "payload": ...}` envelope.
    pub fn into_envelope(self) -> Value {
        json!({
            "action": PROGRESS_ACTION,
            "payload": self,
        })
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    ProgressStarted { task_id: Value },
    ProgressUpdate { task_id: Value, percentage: f64 },
    ProgressFinished { task_id: Value },
    /// Terminal result for the job in flight.
    Result(Value),
}

impl Inbound {
    /// Classify a raw inbound value.
    ///
    /// Fails only when the value claims to be a progress envelope but its
    /// payload is malformed.
    pub fn decode(value: Value) -> Result<Self, ChannelError> {
        if !is_progress_envelope(&value) {
            return Ok(Self::Result(value));
        }

        let payload = match value {
            Value::Object(mut map) => map.remove("payload"),
            _ => None,
        }
        .ok_or_else(|| {
            ChannelError::InvalidMessage("progress envelope without payload".to_string())
        })?;

        let progress: ProgressPayload = serde_json::from_value(payload)
            .map_err(|e| ChannelError::InvalidMessage(format!("bad progress payload: {e}")))?;

        Ok(match progress {
            ProgressPayload::Started { task_id } => Self::ProgressStarted { task_id },
            ProgressPayload::Progress {
                task_id,
                percentage,
            } => Self::ProgressUpdate {
                task_id,
                percentage,
            },
            ProgressPayload::Finished { task_id } => Self::ProgressFinished { task_id },
        })
    }

    /// Whether this message ends the job in flight.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

/// Terminal payload reported when a worker handler fails.
pub fn failure_envelope(error: impl std::fmt::Display) -> Value {
    json!({
        "action": FAILED_ACTION,
        "error": error.to_string(),
    })
}

fn is_progress_envelope(value: &Value) -> bool {
    value.get("action").and_then(Value::as_str) == Some(PROGRESS_ACTION)
}
