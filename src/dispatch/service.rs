//! Async front end for a [`Dispatcher`].
//!
//! The dispatcher is moved into a single Tokio task that owns it outright.
//! Caller commands and worker messages are both funnelled through one
//! `select!` loop, so a submit never interleaves with message handling.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::controller::Dispatcher;
use crate::dispatch::job::Job;
use crate::error::DispatchError;
use crate::events::TaskEventSink;
use crate::worker::channel::MessageChannel;

/// Requests sent from handles to the service task.
enum Command {
    Submit {
        job: Job,
        ack: oneshot::Sender<bool>,
    },
    IsBusy {
        ack: oneshot::Sender<bool>,
    },
    QueueLen {
        ack: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to a running dispatcher service.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    /// Submit a job.
    ///
    /// `Ok(false)` means the dispatcher rejected it: the id is empty, a
    /// queued job already has it, or (with `reject_in_flight_duplicates`)
    /// the in-flight job has it.
    pub async fn submit(&self, job: Job) -> Result<bool, DispatchError> {
        self.request(|ack| Command::Submit { job, ack }).await
    }

    pub async fn is_busy(&self) -> Result<bool, DispatchError> {
        self.request(|ack| Command::IsBusy { ack }).await
    }

    /// Number of jobs waiting behind the in-flight one.
    pub async fn queue_len(&self) -> Result<usize, DispatchError> {
        self.request(|ack| Command::QueueLen { ack }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DispatchError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(build(ack))
            .await
            .map_err(|_| DispatchError::ServiceStopped)?;
        rx.await.map_err(|_| DispatchError::ServiceStopped)
    }
}

/// Runs a dispatcher on its own task.
pub struct DispatcherService;

impl DispatcherService {
    /// Spawn the service loop.
    ///
    /// The loop stops when the worker's inbound channel closes, or once
    /// every handle is dropped and the last job has finished. A worker
    /// message arriving with no job in flight panics the service task.
    pub fn spawn<C, S>(
        dispatcher: Dispatcher<C, S>,
        inbound: mpsc::UnboundedReceiver<Value>,
    ) -> (DispatcherHandle, JoinHandle<()>)
    where
        C: MessageChannel + 'static,
        S: TaskEventSink + 'static,
    {
        // Tokio rejects a zero-capacity channel
        let (tx, rx) = mpsc::channel(dispatcher.config().command_capacity.max(1));
        let handle = tokio::spawn(run(dispatcher, rx, inbound));
        (DispatcherHandle { tx }, handle)
    }
}

async fn run<C, S>(
    mut dispatcher: Dispatcher<C, S>,
    mut commands: mpsc::Receiver<Command>,
    mut inbound: mpsc::UnboundedReceiver<Value>,
) where
    C: MessageChannel,
    S: TaskEventSink,
{
    info!("Dispatcher service started");
    let mut accepting = true;

    loop {
        if !accepting && !dispatcher.is_busy() {
            info!("All dispatcher handles dropped and queue drained, stopping");
            break;
        }

        tokio::select! {
            command = commands.recv(), if accepting => match command {
                Some(command) => handle_command(&mut dispatcher, command),
                None => {
                    debug!(
                        in_flight = ?dispatcher.in_flight_id(),
                        queued = dispatcher.queue_len(),
                        "Dispatcher handles dropped, draining"
                    );
                    accepting = false;
                }
            },
            message = inbound.recv() => match message {
                Some(raw) => {
                    if let Err(e) = dispatcher.on_channel_message(raw) {
                        warn!(error = %e, "Ignoring invalid worker message");
                    }
                }
                None => {
                    warn!(
                        in_flight = ?dispatcher.in_flight_id(),
                        queued = dispatcher.queue_len(),
                        "Worker channel closed, stopping dispatcher"
                    );
                    break;
                }
            },
        }
    }
}

fn handle_command<C, S>(dispatcher: &mut Dispatcher<C, S>, command: Command)
where
    C: MessageChannel,
    S: TaskEventSink,
{
    // Acks fail only if the caller stopped waiting
    match command {
        Command::Submit { job, ack } => {
            let _ = ack.send(dispatcher.submit(job));
        }
        Command::IsBusy { ack } => {
            let _ = ack.send(dispatcher.is_busy());
        }
        Command::QueueLen { ack } => {
            let _ = ack.send(dispatcher.queue_len());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::config::DispatcherConfig;
    use crate::error::ChannelError;
    use crate::events::{EventBus, TaskEvent};

    /// Loopback channel: posted payloads are visible to the test, which
    /// plays the worker by pushing replies into the inbound sender.
    #[derive(Clone, Default)]
    struct Loopback {
        posted: Arc<Mutex<Vec<Value>>>,
    }

    impl MessageChannel for Loopback {
        fn post(&self, payload: Value) -> Result<(), ChannelError> {
            self.posted.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn spawn_service() -> (
        DispatcherHandle,
        JoinHandle<()>,
        Loopback,
        mpsc::UnboundedSender<Value>,
        Arc<EventBus>,
    ) {
        let channel = Loopback::default();
        let bus = Arc::new(EventBus::default());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(channel.clone(), Arc::clone(&bus), DispatcherConfig::default());
        let (handle, task) = DispatcherService::spawn(dispatcher, inbound_rx);
        (handle, task, channel, inbound_tx, bus)
    }

    #[tokio::test]
    async fn submit_and_complete_through_handle() {
        let (handle, _task, channel, inbound, bus) = spawn_service();
        let mut events = bus.subscribe();

        let (job, reply) = Job::with_reply("a", json!({"action": "Import"}));
        assert!(handle.submit(job).await.unwrap());
        assert!(handle.is_busy().await.unwrap());
        assert_eq!(channel.posted.lock().unwrap().len(), 1);

        inbound
            .send(json!({"action": "Progress", "payload": {"type": "Started", "taskId": "Loading"}}))
            .unwrap();
        inbound.send(json!({"action": "Import", "ok": true})).unwrap();

        assert_eq!(reply.await.unwrap(), json!({"action": "Import", "ok": true}));
        assert_eq!(
            events.recv().await.unwrap(),
            TaskEvent::Started { task_id: json!("Loading") }
        );
        assert!(!handle.is_busy().await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_reported_through_handle() {
        let (handle, _task, _channel, _inbound, _bus) = spawn_service();

        assert!(handle.submit(Job::new("a", json!(1))).await.unwrap());
        assert!(handle.submit(Job::new("b", json!(2))).await.unwrap());
        assert!(!handle.submit(Job::new("b", json!(3))).await.unwrap());
        assert_eq!(handle.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_message_is_skipped() {
        let (handle, _task, _channel, inbound, _bus) = spawn_service();
        let (job, reply) = Job::with_reply("a", json!(1));
        handle.submit(job).await.unwrap();

        inbound.send(json!({"action": "Progress"})).unwrap();
        assert!(handle.is_busy().await.unwrap());

        inbound.send(json!("done")).unwrap();
        assert_eq!(reply.await.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn stops_when_worker_channel_closes() {
        let (handle, task, _channel, inbound, _bus) = spawn_service();
        drop(inbound);

        task.await.unwrap();
        assert!(matches!(
            handle.is_busy().await,
            Err(DispatchError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn drains_in_flight_job_after_handles_drop() {
        let (handle, task, _channel, inbound, _bus) = spawn_service();
        let (job, reply) = Job::with_reply("a", json!(1));
        handle.submit(job).await.unwrap();
        drop(handle);

        inbound.send(json!("late result")).unwrap();
        assert_eq!(reply.await.unwrap(), json!("late result"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_command_capacity_is_usable() {
        let config = DispatcherConfig {
            command_capacity: 0,
            ..DispatcherConfig::default()
        };
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(Loopback::default(), EventBus::default(), config);
        let (handle, _task) = DispatcherService::spawn(dispatcher, inbound_rx);

        let (job, reply) = Job::with_reply("a", json!(1));
        assert!(handle.submit(job).await.unwrap());
        assert!(handle.submit(Job::new("b", json!(2))).await.unwrap());
        assert_eq!(handle.queue_len().await.unwrap(), 1);

        inbound_tx.send(json!("done")).unwrap();
        assert_eq!(reply.await.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn orphan_message_panics_service_task() {
        let (_handle, task, _channel, inbound, _bus) = spawn_service();
        inbound.send(json!("orphan")).unwrap();

        let err = task.await.unwrap_err();
        assert!(err.is_panic());
    }
}
