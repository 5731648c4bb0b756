//! Queue configuration loading from environment variables.
//!
//! Construction is programmatic (`QueueConfig::new` plus field updates) or
//! environment-driven via [`QueueConfig::from_env`], which follows the
//! 12-factor convention so deployments can tune the queue without code
//! changes.
//!
//! # Environment Variables
//!
//! ## Required Variables
//! - `RELAYQ_NAME`: queue name, embedded in every derived Redis key
//!
//! ## Optional Variables
//! - `RELAYQ_POP_TIMEOUT_SECONDS`: blocking-pop timeout (default: 5)
//! - `RELAYQ_STATE_TTL_SECONDS`: TTL of content and state records (default: 7200)
//! - `RELAYQ_LOCK_SECONDS`: TTL of the per-document consumer lock (default: 300)
//! - `RELAYQ_DISCARD_SECONDS`: maximum age before a popped document is skipped (default: 3600)
//! - `RELAYQ_REAP_INTERVAL_SECONDS`: pause between recovery sweeps (default: 5)
//! - `RELAYQ_HANDLER_CAPACITY`: concurrent handler executions (default: 4)
//! - `RELAYQ_HANDLER_POLL_DELAY_MS`: wait before a full scheduler rejects (default: 50)

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// The state-record TTL must outlive the lock by more than this margin, so
/// that when the recovery sweep finds an expired lock the state record is
/// still readable.
pub const STATE_TTL_LOCK_MARGIN: Duration = Duration::from_secs(60);

/// Construction-precondition violations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("queue name must not be empty")]
    EmptyName,
    #[error(
        "state TTL ({state_ttl:?}) must exceed the lock TTL ({lock_ttl:?}) \
         by more than {STATE_TTL_LOCK_MARGIN:?}"
    )]
    TtlMargin {
        state_ttl: Duration,
        lock_ttl: Duration,
    },
}

/// Complete queue configuration.
///
/// All durations are wall-clock; Redis TTLs are written in whole seconds, so
/// sub-second values are rounded up to one second at the store boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue name, embedded in every derived Redis key and channel.
    pub name: String,

    /// Timeout of the blocking ready-list pop. Also bounds how long `close`
    /// waits for the consumer loop to notice shutdown.
    pub pop_timeout: Duration,

    /// TTL of the content and state records. Terminal states are evicted by
    /// this TTL rather than deleted.
    pub state_ttl: Duration,

    /// TTL of the per-document lock key. Presence of the lock means a
    /// consumer is working, or expected to start within this window.
    pub lock_ttl: Duration,

    /// Documents older than this at claim time are not dispatched.
    pub discard_after: Duration,

    /// Pause between recovery sweeps over the processing list.
    pub reap_interval: Duration,

    /// Number of handler executions allowed to run concurrently.
    pub handler_capacity: usize,

    /// How long a submission waits for handler capacity before it is
    /// rejected and the document returned to the ready list.
    pub handler_poll_delay: Duration,
}

impl QueueConfig {
    /// Configuration with defaults suitable for minutes-scale jobs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pop_timeout: Duration::from_secs(5),
            state_ttl: Duration::from_secs(2 * 60 * 60),
            lock_ttl: Duration::from_secs(5 * 60),
            discard_after: Duration::from_secs(60 * 60),
            reap_interval: Duration::from_secs(5),
            handler_capacity: 4,
            handler_poll_delay: Duration::from_millis(50),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAYQ_NAME` is missing, if any set variable
    /// cannot be parsed, or if the resulting configuration fails
    /// [`validate`](Self::validate).
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            name: env_required("RELAYQ_NAME")?,
            pop_timeout: Duration::from_secs(env_or("RELAYQ_POP_TIMEOUT_SECONDS", 5)?),
            state_ttl: Duration::from_secs(env_or("RELAYQ_STATE_TTL_SECONDS", 7200)?),
            lock_ttl: Duration::from_secs(env_or("RELAYQ_LOCK_SECONDS", 300)?),
            discard_after: Duration::from_secs(env_or("RELAYQ_DISCARD_SECONDS", 3600)?),
            reap_interval: Duration::from_secs(env_or("RELAYQ_REAP_INTERVAL_SECONDS", 5)?),
            handler_capacity: env_or("RELAYQ_HANDLER_CAPACITY", 4)?,
            handler_poll_delay: Duration::from_millis(env_or("RELAYQ_HANDLER_POLL_DELAY_MS", 50)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the construction preconditions.
    ///
    /// The state TTL must exceed the lock TTL by more than
    /// [`STATE_TTL_LOCK_MARGIN`]: the recovery sweep decides what to do with
    /// an unlocked processing-list entry by reading its state record, which
    /// therefore has to survive the lock expiry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.state_ttl <= self.lock_ttl + STATE_TTL_LOCK_MARGIN {
            return Err(ConfigError::TtlMargin {
                state_ttl: self.state_ttl,
                lock_ttl: self.lock_ttl,
            });
        }
        Ok(())
    }
}

/// Load a required environment variable.
///
/// # Errors
///
/// Returns an error if the variable is not set.
fn env_required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Missing required environment variable: {}", key))
}

/// Load an environment variable with a default value.
///
/// Returns the parsed environment variable if set, otherwise returns the default.
///
/// # Errors
///
/// Returns an error if the variable is set but cannot be parsed.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}
