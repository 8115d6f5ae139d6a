//! Configuration types.
//!
//! Every loader reads through a `lookup` function; the `*_from_env` entry
//! points pass one backed by `std::env::var`.

use std::str::FromStr;

use crate::error::ConfigError;

/// Default capacity of the dispatcher service's command channel.
const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default thread name for the background worker.
const DEFAULT_WORKER_NAME: &str = "relay-worker";

pub const REJECT_IN_FLIGHT_DUPLICATES_VAR: &str = "WORKER_RELAY_REJECT_IN_FLIGHT_DUPLICATES";
pub const COMMAND_CAPACITY_VAR: &str = "WORKER_RELAY_COMMAND_CAPACITY";
pub const WORKER_NAME_VAR: &str = "WORKER_RELAY_WORKER_NAME";
pub const WORKER_STACK_SIZE_VAR: &str = "WORKER_RELAY_WORKER_STACK_SIZE";
pub const EVENT_CAPACITY_VAR: &str = "WORKER_RELAY_EVENT_CAPACITY";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Also reject a submission whose id matches the job currently in flight.
    ///
    /// Off by default: only queued jobs take part in the duplicate check.
    pub reject_in_flight_duplicates: bool,
    /// Buffer size of the command channel used by `DispatcherService`.
    /// Zero is treated as one.
    pub command_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            reject_in_flight_duplicates: false,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    /// Load from environment variables, falling back to defaults on
    /// missing or unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Load from environment variables, reporting invalid values instead of
    /// silently using defaults.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let reject_in_flight_duplicates = lookup(REJECT_IN_FLIGHT_DUPLICATES_VAR)
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.reject_in_flight_duplicates);

        let command_capacity: usize = lookup(COMMAND_CAPACITY_VAR)
            .and_then(|s| s.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.command_capacity);

        Self {
            reject_in_flight_duplicates,
            command_capacity,
        }
    }

    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let reject_in_flight_duplicates = match lookup(REJECT_IN_FLIGHT_DUPLICATES_VAR) {
            Some(s) => parse_flag(&s).ok_or_else(|| ConfigError::InvalidValue {
                key: REJECT_IN_FLIGHT_DUPLICATES_VAR.to_string(),
                message: format!("expected a boolean, got {s:?}"),
            })?,
            None => defaults.reject_in_flight_duplicates,
        };

        let command_capacity = parse_positive(&lookup, COMMAND_CAPACITY_VAR)?
            .unwrap_or(defaults.command_capacity);

        Ok(Self {
            reject_in_flight_duplicates,
            command_capacity,
        })
    }
}

/// Options passed through to the background worker thread.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// OS thread name.
    pub name: String,
    /// Stack size in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORKER_NAME.to_string(),
            stack_size: None,
        }
    }
}

impl WorkerOptions {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let name = lookup(WORKER_NAME_VAR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKER_NAME.to_string());

        let stack_size: Option<usize> = lookup(WORKER_STACK_SIZE_VAR)
            .and_then(|s| s.trim().parse().ok())
            .filter(|n| *n > 0);

        Self { name, stack_size }
    }

    /// Set the thread name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Event bus capacity from `WORKER_RELAY_EVENT_CAPACITY`, if set and valid.
pub fn event_capacity_from_env() -> Option<usize> {
    event_capacity_from_lookup(env_lookup)
}

pub fn event_capacity_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<usize> {
    lookup(EVENT_CAPACITY_VAR)
        .and_then(|s| s.trim().parse().ok())
        .filter(|n: &usize| *n > 0)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    let value: T = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(Some(value))
}
