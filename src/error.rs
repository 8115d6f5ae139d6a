//! Error types for Worker Relay.

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors on the path to and from the background worker.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Worker {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Worker channel closed")]
    Closed,

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job {id} ended without a result")]
    ReplyDropped { id: String },

    #[error("Dispatcher service has stopped")]
    ServiceStopped,

    #[error("Dispatcher service failed: {0}")]
    ServiceFailed(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_into_umbrella() {
        let err: Error = ConfigError::InvalidValue {
            key: "WORKER_RELAY_COMMAND_CAPACITY".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("WORKER_RELAY_COMMAND_CAPACITY"));
    }

    #[test]
    fn channel_and_dispatch_errors_convert_into_umbrella() {
        let err: Error = ChannelError::Closed.into();
        assert!(matches!(err, Error::Channel(ChannelError::Closed)));

        let err: Error = DispatchError::ServiceFailed("task panicked".to_string()).into();
        assert!(matches!(err, Error::Dispatch(DispatchError::ServiceFailed(_))));
        assert_eq!(err.to_string(), "Dispatch error: Dispatcher service failed: task panicked");
    }

    fn start_worker(fail: bool) -> Result<()> {
        if fail {
            Err(ChannelError::StartupFailed {
                name: "relay-worker".to_string(),
                reason: "no threads".to_string(),
            })?;
        }
        Ok(())
    }

    #[test]
    fn question_mark_lifts_into_result_alias() {
        assert!(start_worker(false).is_ok());
        assert!(matches!(
            start_worker(true),
            Err(Error::Channel(ChannelError::StartupFailed { .. }))
        ));
    }
}
