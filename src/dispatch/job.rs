//! Jobs and their reply handles.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::DispatchError;

/// A unit of work for the background worker.
///
/// Owned by the dispatcher from submission until its terminal result
/// arrives, then dropped.
pub struct Job {
    id: String,
    payload: Value,
    reply: Option<oneshot::Sender<Value>>,
}

impl Job {
    /// A fire-and-forget job: its result is discarded.
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            reply: None,
        }
    }

    /// A job paired with the handle that receives its terminal result.
    pub fn with_reply(id: impl Into<String>, payload: Value) -> (Self, JobReply) {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let reply = JobReply {
            id: id.clone(),
            rx,
        };
        let job = Self {
            id,
            payload,
            reply: Some(tx),
        };
        (job, reply)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn has_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Move the payload out for posting, leaving `null` behind.
    pub(crate) fn take_payload(&mut self) -> Value {
        std::mem::take(&mut self.payload)
    }

    /// Deliver the terminal result, consuming the job.
    ///
    /// Returns `false` if the job has a reply slot whose receiver is gone.
    pub(crate) fn complete(self, result: Value) -> bool {
        match self.reply {
            Some(tx) => tx.send(result).is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("has_reply", &self.has_reply())
            .finish()
    }
}

/// Resolves to the job's terminal result payload.
///
/// Resolves to [`DispatchError::ReplyDropped`] if the job was dropped
/// without a result (rejected as a duplicate, or the worker channel closed).
#[derive(Debug)]
pub struct JobReply {
    id: String,
    rx: oneshot::Receiver<Value>,
}

impl JobReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Non-blocking check. `None` while the job is still pending.
    pub fn try_recv(&mut self) -> Option<Result<Value, DispatchError>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DispatchError::ReplyDropped {
                id: self.id.clone(),
            })),
        }
    }
}

impl Future for JobReply {
    type Output = Result<Value, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.rx).poll(cx).map(|result| {
            result.map_err(|_| DispatchError::ReplyDropped {
                id: this.id.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_job_has_no_reply() {
        let job = Job::new("a", json!({"action": "Import"}));
        assert_eq!(job.id(), "a");
        assert!(!job.has_reply());
        assert!(job.complete(json!("ignored")));
    }

    #[test]
    fn take_payload_leaves_null() {
        let mut job = Job::new("a", json!({"n": 1}));
        assert_eq!(job.take_payload(), json!({"n": 1}));
        assert!(job.payload().is_null());
    }

    #[tokio::test]
    async fn reply_resolves_once() {
        let (job, mut reply) = Job::with_reply("a", json!(null));
        assert_eq!(reply.id(), "a");
        assert!(reply.try_recv().is_none());

        assert!(job.complete(json!({"ok": true})));
        assert_eq!(reply.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn dropped_job_resolves_to_error() {
        let (job, reply) = Job::with_reply("gone", json!(null));
        drop(job);

        match reply.await {
            Err(DispatchError::ReplyDropped { id }) => assert_eq!(id, "gone"),
            other => panic!("Expected ReplyDropped, got {other:?}"),
        }
    }

    #[test]
    fn complete_reports_dropped_receiver() {
        let (job, reply) = Job::with_reply("a", json!(null));
        drop(reply);
        assert!(!job.complete(json!(1)));
    }
}
