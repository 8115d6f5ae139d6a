//! Single-concurrency job dispatcher.
//!
//! Serializes jobs onto one background worker: at most one payload is
//! posted at a time, and the next queued job is only posted once the
//! previous job's terminal result has come back. Because the channel is
//! ordered and only one job is ever in flight, every inbound message
//! belongs to the in-flight job; no id correlation is done.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::dispatch::job::Job;
use crate::error::ChannelError;
use crate::events::{TaskEvent, TaskEventSink};
use crate::worker::channel::MessageChannel;
use crate::worker::protocol::Inbound;

/// Job queue plus in-flight slot. Busy iff a job is in flight.
pub struct Dispatcher<C, S> {
    channel: C,
    sink: S,
    config: DispatcherConfig,
    queue: VecDeque<Job>,
    in_flight: Option<Job>,
    /// Start times keyed by job id.
    timers: HashMap<String, Instant>,
}

impl<C: MessageChannel, S: TaskEventSink> Dispatcher<C, S> {
    pub fn new(channel: C, sink: S, config: DispatcherConfig) -> Self {
        Self {
            channel,
            sink,
            config,
            queue: VecDeque::new(),
            in_flight: None,
            timers: HashMap::new(),
        }
    }

    /// Queue a job, starting it right away if the worker is idle.
    ///
    /// Returns `false` without touching any state when a queued job already
    /// has the same id. The in-flight job only counts as a duplicate when
    /// `reject_in_flight_duplicates` is set.
    pub fn submit(&mut self, job: Job) -> bool {
        if job.id().is_empty() {
            warn!("Rejected job with empty id");
            return false;
        }

        if self.queue.iter().any(|queued| queued.id() == job.id()) {
            warn!(job_id = %job.id(), "Job already queued with this id");
            return false;
        }

        if self.config.reject_in_flight_duplicates && self.in_flight_id() == Some(job.id()) {
            warn!(job_id = %job.id(), "Job already in flight with this id");
            return false;
        }

        debug!(job_id = %job.id(), queued = self.queue.len() + 1, "Job queued");
        self.queue.push_back(job);
        self.advance();

        true
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of jobs waiting behind the in-flight one.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_id(&self) -> Option<&str> {
        self.in_flight.as_ref().map(Job::id)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decode a raw worker message and handle it.
    ///
    /// A malformed progress envelope is returned as an error and leaves
    /// the dispatcher untouched.
    ///
    /// # Panics
    ///
    /// If no job is in flight.
    pub fn on_channel_message(&mut self, raw: Value) -> Result<(), ChannelError> {
        self.assert_in_flight(&raw);
        let message = Inbound::decode(raw)?;
        self.on_message(message);
        Ok(())
    }

    /// Handle a decoded worker message.
    ///
    /// Progress messages are forwarded to the event sink and never end the
    /// job. A result completes the in-flight job and starts the next one.
    ///
    /// # Panics
    ///
    /// If no job is in flight: the message cannot be attributed to any job.
    pub fn on_message(&mut self, message: Inbound) {
        self.assert_in_flight(&message);

        match message {
            Inbound::ProgressStarted { task_id } => {
                self.sink.broadcast(TaskEvent::Started { task_id });
            }
            Inbound::ProgressUpdate {
                task_id,
                percentage,
            } => {
                self.sink.broadcast(TaskEvent::Progress {
                    task_id,
                    percentage,
                });
            }
            Inbound::ProgressFinished { task_id } => {
                self.sink.broadcast(TaskEvent::Ended { task_id });
            }
            Inbound::Result(payload) => self.finish_in_flight(payload),
        }
    }

    fn finish_in_flight(&mut self, payload: Value) {
        let Some(job) = self.in_flight.take() else {
            return;
        };

        let elapsed = self
            .timers
            .remove(job.id())
            .map(|started| started.elapsed())
            .unwrap_or_default();
        info!(
            job_id = %job.id(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Job finished"
        );

        let job_id = job.id().to_string();
        if !job.complete(payload) {
            debug!(job_id = %job_id, "Reply receiver dropped, result discarded");
        }

        self.advance();
    }

    /// Post the next queued job if idle.
    fn advance(&mut self) {
        while !self.is_busy() {
            let Some(mut job) = self.queue.pop_front() else {
                return;
            };

            info!(
                job_id = %job.id(),
                remaining = self.queue.len(),
                "Starting job"
            );
            self.timers.insert(job.id().to_string(), Instant::now());

            let payload = job.take_payload();
            match self.channel.post(payload) {
                Ok(()) => self.in_flight = Some(job),
                Err(e) => {
                    // Dropping the job resolves its reply to `ReplyDropped`
                    self.timers.remove(job.id());
                    error!(job_id = %job.id(), error = %e, "Failed to post job to worker, dropping it");
                }
            }
        }
    }

    fn assert_in_flight(&self, message: &impl std::fmt::Debug) {
        assert!(
            self.in_flight.is_some(),
            "Received worker message when no job is pending: {message:?}"
        );
    }
}
