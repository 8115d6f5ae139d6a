//! Background worker thread.
//!
//! Runs a [`WorkerHandler`] on a dedicated OS thread. Requests are processed
//! one at a time in arrival order; every request produces exactly one
//! terminal reply, preceded by any progress envelopes the handler emits.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::WorkerOptions;
use crate::error::ChannelError;
use crate::worker::channel::MessageChannel;
use crate::worker::protocol::{failure_envelope, ProgressPayload};

/// The work performed on the background thread.
///
/// Errors are not propagated to the dispatcher as errors: they become the
/// job's terminal payload (see [`failure_envelope`]).
pub trait WorkerHandler: Send + 'static {
    fn handle(&mut self, request: Value, progress: &ProgressReporter) -> anyhow::Result<Value>;
}

impl<F> WorkerHandler for F
where
    F: FnMut(Value, &ProgressReporter) -> anyhow::Result<Value> + Send + 'static,
{
    fn handle(&mut self, request: Value, progress: &ProgressReporter) -> anyhow::Result<Value> {
        self(request, progress)
    }
}

/// Handle given to a [`WorkerHandler`] for reporting task progress.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<Value>,
}

impl ProgressReporter {
    pub fn started(&self, task_id: impl Into<Value>) {
        self.emit(ProgressPayload::Started {
            task_id: task_id.into(),
        });
    }

    /// Report completion percentage of a task.
    pub fn progress(&self, task_id: impl Into<Value>, percentage: f64) {
        self.emit(ProgressPayload::Progress {
            task_id: task_id.into(),
            percentage,
        });
    }

    pub fn finished(&self, task_id: impl Into<Value>) {
        self.emit(ProgressPayload::Finished {
            task_id: task_id.into(),
        });
    }

    fn emit(&self, payload: ProgressPayload) {
        // The dispatcher may already be gone during shutdown
        if self.tx.send(payload.into_envelope()).is_err() {
            debug!("Progress dropped, inbound channel closed");
        }
    }
}

/// A running background worker, reachable only through its channels.
pub struct WorkerThread {
    name: String,
    request_tx: Option<mpsc::UnboundedSender<Value>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Start the worker. Returns the worker (outbound side) and the receiver
    /// of everything it sends back.
    pub fn spawn<H: WorkerHandler>(
        handler: H,
        options: WorkerOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Value>), ChannelError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<Value>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Value>();

        let mut builder = thread::Builder::new().name(options.name.clone());
        if let Some(stack_size) = options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_name = options.name.clone();
        let handle = builder
            .spawn(move || worker_loop(thread_name, handler, request_rx, reply_tx))
            .map_err(|e| ChannelError::StartupFailed {
                name: options.name.clone(),
                reason: e.to_string(),
            })?;

        info!(worker = %options.name, "Worker thread started");

        Ok((
            Self {
                name: options.name,
                request_tx: Some(request_tx),
                handle: Some(handle),
            },
            reply_rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the request channel and wait for the thread to finish its
    /// current request.
    ///
    /// Blocks the calling thread; do not call from inside an async task.
    pub fn terminate(mut self) {
        self.request_tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = %self.name, "Worker thread panicked");
            }
        }
    }
}

impl MessageChannel for WorkerThread {
    fn post(&self, payload: Value) -> Result<(), ChannelError> {
        let tx = self.request_tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(payload).map_err(|_| ChannelError::Closed)
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        // Detach: the thread exits once its request channel drains.
        self.request_tx = None;
    }
}

fn worker_loop<H: WorkerHandler>(
    name: String,
    mut handler: H,
    mut requests: mpsc::UnboundedReceiver<Value>,
    replies: mpsc::UnboundedSender<Value>,
) {
    let reporter = ProgressReporter {
        tx: replies.clone(),
    };

    while let Some(request) = requests.blocking_recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request, &reporter)));

        let reply = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(worker = %name, error = %format!("{e:#}"), "Worker handler failed");
                failure_envelope(format!("{e:#}"))
            }
            Err(_) => {
                error!(worker = %name, "Worker handler panicked");
                failure_envelope("worker handler panicked")
            }
        };

        if replies.send(reply).is_err() {
            debug!(worker = %name, "Inbound channel closed, stopping worker");
            break;
        }
    }

    info!(worker = %name, "Worker thread stopped");
}
