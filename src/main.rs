use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use uuid::Uuid;

use worker_relay::config::{DispatcherConfig, WorkerOptions, event_capacity_from_env};
use worker_relay::dispatch::{Dispatcher, DispatcherService, Job};
use worker_relay::error::DispatchError;
use worker_relay::events::{EventBus, TaskEvent};
use worker_relay::worker::{ProgressReporter, WorkerHandler, WorkerThread};

/// Demo handler: pretends to work through a few stages per request.
struct StagedWork {
    stage_delay: Duration,
}

impl WorkerHandler for StagedWork {
    fn handle(&mut self, request: Value, progress: &ProgressReporter) -> anyhow::Result<Value> {
        let action = request
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("request has no action"))?
            .to_string();
        let steps = request.get("steps").and_then(Value::as_u64).unwrap_or(4).max(1);

        progress.started(action.as_str());
        for step in 1..=steps {
            std::thread::sleep(self.stage_delay);
            progress.progress(action.as_str(), step as f64 / steps as f64 * 100.0);
        }
        progress.finished(action.as_str());

        Ok(json!({
            "action": action,
            "result": { "steps": steps },
        }))
    }
}

#[tokio::main]
async fn main() -> worker_relay::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DispatcherConfig::try_from_env()?;
    let options = WorkerOptions::from_env();

    eprintln!("Worker Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worker: {}", options.name);
    eprintln!(
        "   Reject in-flight duplicates: {}",
        config.reject_in_flight_duplicates
    );

    let bus = Arc::new(match event_capacity_from_env() {
        Some(capacity) => EventBus::new(capacity),
        None => EventBus::default(),
    });

    // Print task events as they arrive
    let events = bus.stream();
    tokio::spawn(async move {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                TaskEvent::Started { task_id } => eprintln!("   [{task_id}] started"),
                TaskEvent::Progress {
                    task_id,
                    percentage,
                } => eprintln!("   [{task_id}] {percentage:.0}%"),
                TaskEvent::Ended { task_id } => eprintln!("   [{task_id}] ended"),
            }
        }
    });

    let handler = StagedWork {
        stage_delay: Duration::from_millis(100),
    };
    let (worker, inbound) = WorkerThread::spawn(handler, options)?;
    let dispatcher = Dispatcher::new(worker, Arc::clone(&bus), config);
    let (handle, service) = DispatcherService::spawn(dispatcher, inbound);

    let requests = [
        json!({"action": "Import", "steps": 2}),
        json!({"action": "Voxelise", "steps": 4}),
        json!({"unknown": true}),
        json!({"action": "Export", "steps": 3}),
    ];

    let mut replies = Vec::new();
    for request in requests {
        let (job, reply) = Job::with_reply(Uuid::new_v4().to_string(), request);
        if handle.submit(job).await? {
            replies.push(reply);
        }
    }

    for reply in replies {
        let id = reply.id().to_string();
        match reply.await {
            Ok(result) => eprintln!("   Job {id}: {result}"),
            Err(e) => eprintln!("   Job {id}: {e}"),
        }
    }

    drop(handle);
    service
        .await
        .map_err(|e| DispatchError::ServiceFailed(e.to_string()))?;

    Ok(())
}
